//! RPC endpoint failover pool
//!
//! An ordered set of endpoints sorted by priority. The active endpoint hands
//! out clients until its retry budget is exhausted, then the pool advances to
//! the next endpoint (wrapping) and announces the failover. All probe workers
//! of a cluster share one pool and serialize through its mutex.

use std::sync::Arc;

use parking_lot::Mutex;
use solana_client::nonblocking::rpc_client::RpcClient;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::classify::ErrorKind;
use crate::config::RpcEndpointConfig;

/// Budget given to the fallback endpoint when no endpoints are configured.
const FALLBACK_MAX_RETRY: u32 = 1000;

/// Side effects the pool emits for the notification worker to deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    Failover { cluster: String, url: String },
}

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    access_token: String,
    priority: i32,
    max_retry: u32,
    retry: u32,
}

impl Endpoint {
    fn connection_url(&self) -> String {
        if self.access_token.is_empty() {
            self.url.clone()
        } else {
            format!("{}/{}", self.url, self.access_token)
        }
    }
}

#[derive(Debug)]
struct PoolState {
    endpoints: Vec<Endpoint>,
    current: usize,
}

/// Mutex-guarded failover pool; see module docs.
pub struct FailoverPool {
    cluster: String,
    state: Mutex<PoolState>,
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl FailoverPool {
    /// Build a pool from configured endpoints, dropping blank entries and
    /// sorting ascending by priority. An empty list falls back to the
    /// cluster's public default endpoint with a generous budget.
    pub fn new(
        cluster: &str,
        configured: &[RpcEndpointConfig],
        fallback_url: &str,
        events: mpsc::UnboundedSender<PoolEvent>,
    ) -> Self {
        let mut endpoints: Vec<Endpoint> = configured
            .iter()
            .filter_map(|e| {
                let url = e.url.trim_end_matches([' ', '/']).to_string();
                if url.is_empty() {
                    return None;
                }
                Some(Endpoint {
                    url,
                    access_token: e.access_token.trim().to_string(),
                    priority: e.priority,
                    max_retry: e.max_retry,
                    retry: 0,
                })
            })
            .collect();
        endpoints.sort_by_key(|e| e.priority);

        if endpoints.is_empty() {
            warn!(cluster, fallback_url, "no usable endpoints configured, using fallback");
            endpoints.push(Endpoint {
                url: fallback_url.trim_end_matches([' ', '/']).to_string(),
                access_token: String::new(),
                priority: 0,
                max_retry: FALLBACK_MAX_RETRY,
                retry: 0,
            });
        }

        Self {
            cluster: cluster.to_string(),
            state: Mutex::new(PoolState {
                endpoints,
                current: 0,
            }),
            events,
        }
    }

    /// Hand out a client bound to the active endpoint. While the active
    /// endpoint still has budget, an existing client is reused as-is; once
    /// the budget is exhausted the pool advances (wrapping past the end) and
    /// builds a client for the new endpoint, announcing the failover.
    pub fn acquire(&self, current: Option<Arc<RpcClient>>) -> Arc<RpcClient> {
        let mut state = self.state.lock();
        let active = &state.endpoints[state.current];
        if active.retry < active.max_retry {
            if let Some(client) = current {
                return client;
            }
            return Arc::new(RpcClient::new(active.connection_url()));
        }

        state.current = if state.current + 1 > state.endpoints.len() - 1 {
            0
        } else {
            state.current + 1
        };
        let next = &state.endpoints[state.current];
        info!(cluster = %self.cluster, url = %next.url, "failover to next endpoint");
        let _ = self.events.send(PoolEvent::Failover {
            cluster: self.cluster.clone(),
            url: next.url.clone(),
        });
        Arc::new(RpcClient::new(next.connection_url()))
    }

    /// Fold a batch outcome into the active endpoint's retry budget. Success
    /// resets the counter; only endpoint-level failure kinds count against
    /// it, one-off hiccups do not.
    pub fn record_outcome(&self, outcome: Option<ErrorKind>) {
        let mut state = self.state.lock();
        let current = state.current;
        let active = &mut state.endpoints[current];
        match outcome {
            None => active.retry = 0,
            Some(kind) if kind.is_endpoint_failure() => active.retry += 1,
            Some(_) => {}
        }
    }

    /// URL of the currently active endpoint (without access token).
    pub fn active_url(&self) -> String {
        let state = self.state.lock();
        state.endpoints[state.current].url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str, priority: i32, max_retry: u32) -> RpcEndpointConfig {
        RpcEndpointConfig {
            url: url.to_string(),
            access_token: String::new(),
            priority,
            max_retry,
        }
    }

    fn pool(configured: &[RpcEndpointConfig]) -> FailoverPool {
        let (tx, _rx) = mpsc::unbounded_channel();
        FailoverPool::new("devnet", configured, "https://fallback.example.org", tx)
    }

    #[test]
    fn advances_after_budget_exhausted() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let p = FailoverPool::new(
            "devnet",
            &[
                endpoint("https://primary.example.org/", 1, 3),
                endpoint("https://secondary.example.org", 2, 3),
            ],
            "https://fallback.example.org",
            tx,
        );

        let first = p.acquire(None);
        assert_eq!(first.url(), "https://primary.example.org");

        for _ in 0..3 {
            p.record_outcome(Some(ErrorKind::TooManyRequests));
        }
        let second = p.acquire(Some(first));
        assert_eq!(second.url(), "https://secondary.example.org");
        assert_eq!(p.active_url(), "https://secondary.example.org");
        assert_eq!(
            rx.try_recv().unwrap(),
            PoolEvent::Failover {
                cluster: "devnet".to_string(),
                url: "https://secondary.example.org".to_string(),
            }
        );
    }

    #[test]
    fn reuses_client_while_budget_remains() {
        let p = pool(&[endpoint("https://primary.example.org", 1, 3)]);
        let first = p.acquire(None);
        p.record_outcome(Some(ErrorKind::TooManyRequests));
        let again = p.acquire(Some(first.clone()));
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn single_endpoint_never_changes_binding() {
        let p = pool(&[endpoint("https://only.example.org", 1, 2)]);
        for _ in 0..10 {
            p.record_outcome(Some(ErrorKind::ServiceUnavailable));
        }
        let client = p.acquire(None);
        assert_eq!(client.url(), "https://only.example.org");
        assert_eq!(p.active_url(), "https://only.example.org");
    }

    #[test]
    fn transient_errors_do_not_consume_budget() {
        let p = pool(&[
            endpoint("https://primary.example.org", 1, 1),
            endpoint("https://secondary.example.org", 2, 1),
        ]);
        for _ in 0..5 {
            p.record_outcome(Some(ErrorKind::RpcDeadlineExceeded));
        }
        assert_eq!(p.acquire(None).url(), "https://primary.example.org");
    }

    #[test]
    fn success_resets_budget() {
        let p = pool(&[
            endpoint("https://primary.example.org", 1, 2),
            endpoint("https://secondary.example.org", 2, 2),
        ]);
        p.record_outcome(Some(ErrorKind::GatewayTimeout));
        p.record_outcome(None);
        p.record_outcome(Some(ErrorKind::GatewayTimeout));
        // Budget of 2 was never exhausted in a row.
        assert_eq!(p.acquire(None).url(), "https://primary.example.org");
    }

    #[test]
    fn empty_config_uses_fallback() {
        let p = pool(&[endpoint("   ", 1, 3)]);
        assert_eq!(p.acquire(None).url(), "https://fallback.example.org");
    }

    #[test]
    fn endpoints_sorted_by_priority() {
        let p = pool(&[
            endpoint("https://low.example.org", 9, 3),
            endpoint("https://high.example.org", 1, 3),
        ]);
        assert_eq!(p.acquire(None).url(), "https://high.example.org");
    }
}
