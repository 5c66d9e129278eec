//! Probe engine
//!
//! One batch = submit N lightweight transactions, wait for each to confirm,
//! time the round trips. Failures never escape: every error is recorded in
//! the returned `ProbeResult` and the batch keeps going.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::classify::{ClassifiedError, ErrorKind, ErrorRegistry};
use crate::ledger::{LedgerClient, LedgerError, SubmittedTx};

/// Collects start/stop brackets for one submission+confirmation cycle and the
/// committed samples of a batch, in milliseconds.
#[derive(Debug, Default, Clone)]
pub struct TakeTime {
    pub times: Vec<i64>,
    start: i64,
    end: i64,
}

/// Descriptive statistics over a sample set.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub min: i64,
    pub mean: f64,
    pub max: i64,
    pub stddev: f64,
    pub sum: i64,
}

impl TakeTime {
    pub fn timer_start(&mut self) {
        self.start = Utc::now().timestamp_millis();
    }

    pub fn timer_stop(&mut self) {
        self.end = Utc::now().timestamp_millis();
    }

    /// Commit the bracketed delta as a sample.
    pub fn commit(&mut self) {
        self.times.push(self.end - self.start);
    }

    /// Append a sample directly.
    pub fn add_sample(&mut self, ms: i64) {
        self.times.push(ms);
    }

    pub fn extend(&mut self, other: &TakeTime) {
        self.times.extend_from_slice(&other.times);
    }

    pub fn total(&self) -> i64 {
        self.times.iter().sum()
    }

    /// Min/mean/max/population-stddev/sum over the valid samples. Samples
    /// <= 0 are bad data and are discarded; with no valid samples every
    /// statistic is zero.
    pub fn statistic(&self) -> LatencyStats {
        let mut stats = LatencyStats::default();
        let mut count = 0i64;
        for &ts in &self.times {
            if ts <= 0 {
                continue;
            }
            if count == 0 || ts < stats.min {
                stats.min = ts;
            }
            if ts > stats.max {
                stats.max = ts;
            }
            stats.sum += ts;
            count += 1;
        }
        if count > 0 {
            stats.mean = stats.sum as f64 / count as f64;
            let mut variance = 0.0;
            for &ts in &self.times {
                if ts > 0 {
                    variance += (ts as f64 - stats.mean).powi(2);
                }
            }
            stats.stddev = (variance / count as f64).sqrt();
        }
        stats
    }
}

/// What a probe batch is for: the continuous per-minute datapoint stream or
/// an on-demand report measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    DataPoint1Min,
    Report,
}

impl ProbeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::DataPoint1Min => "datapoint1min",
            ProbeKind::Report => "report",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "datapoint1min" => Some(ProbeKind::DataPoint1Min),
            "report" => Some(ProbeKind::Report),
            _ => None,
        }
    }
}

/// Where the probe ran.
#[derive(Debug, Clone)]
pub struct ProbeIdentity {
    pub cluster: String,
    pub hostname: String,
}

/// Compute-unit price sourcing for priority-fee submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSource {
    /// Max prioritization fee paid over the most recent slots.
    Recent,
    Fixed(u64),
}

/// Submission strategy for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeMode {
    None,
    Priority {
        compute_unit_limit: u32,
        source: FeeSource,
    },
}

/// Timing knobs for one batch.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_count: u32,
    pub batch_interval: Duration,
    pub tx_timeout: Duration,
    pub wait_confirmation_timeout: Duration,
    pub status_poll_interval: Duration,
    pub fee: FeeMode,
}

/// Outcome of one measurement batch. Immutable once built.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub cluster: String,
    pub hostname: String,
    pub kind: ProbeKind,
    pub timestamp: i64,
    pub submitted: u32,
    pub confirmed: u32,
    /// Fraction of submitted probes that did not confirm, 0..1.
    pub loss: f64,
    pub min_ms: i64,
    pub mean_ms: i64,
    pub max_ms: i64,
    pub stddev_ms: i64,
    pub take_time_ms: i64,
    pub compute_unit_price: u64,
    pub request_compute_units: u32,
    pub errors: Vec<ClassifiedError>,
}

impl ProbeResult {
    /// Comma-joined raw error texts; informational only, never fatal.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(
                self.errors
                    .iter()
                    .map(|e| e.raw.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            )
        }
    }

    /// The error kind the failover pool should judge this batch by: the
    /// first endpoint-level failure if any, otherwise the first error.
    pub fn pool_outcome(&self) -> Option<ErrorKind> {
        self.errors
            .iter()
            .map(|e| e.kind)
            .find(|k| k.is_endpoint_failure())
            .or_else(|| self.errors.first().map(|e| e.kind))
    }
}

/// Run one measurement batch against `client`.
pub async fn run_batch(
    client: &dyn LedgerClient,
    registry: &ErrorRegistry,
    identity: &ProbeIdentity,
    kind: ProbeKind,
    cfg: &BatchConfig,
) -> ProbeResult {
    let mut timer = TakeTime::default();
    let mut errors: Vec<ClassifiedError> = Vec::new();
    let mut confirmed = 0u32;

    let (compute_unit_price, request_compute_units) = match cfg.fee {
        FeeMode::None => (0, 0),
        FeeMode::Priority {
            compute_unit_limit,
            source,
        } => {
            let price = match source {
                FeeSource::Fixed(price) => price,
                // The lookup failing is not a probe failure; fall back to the
                // minimum that still marks the transaction as fee-bearing.
                FeeSource::Recent => client.recent_priority_fee().await.unwrap_or(1),
            };
            (price, compute_unit_limit)
        }
    };

    for i in 0..cfg.batch_count {
        if i > 0 {
            sleep(cfg.batch_interval).await;
        }
        timer.timer_start();

        let wait_outcome = match cfg.fee {
            FeeMode::None => match client.submit_transfer(cfg.tx_timeout).await {
                Err(e) => Err(e),
                Ok(signature) => {
                    wait_confirmed(
                        client,
                        &signature,
                        cfg.wait_confirmation_timeout,
                        cfg.status_poll_interval,
                    )
                    .await
                }
            },
            FeeMode::Priority { .. } => {
                match client
                    .submit_priority_transfer(
                        compute_unit_price,
                        request_compute_units,
                        cfg.tx_timeout,
                    )
                    .await
                {
                    Err(e) => Err(e),
                    Ok(tx) => {
                        wait_confirmed_or_expired(
                            client,
                            &tx,
                            cfg.wait_confirmation_timeout,
                            cfg.status_poll_interval,
                        )
                        .await
                    }
                }
            }
        };

        timer.timer_stop();
        match wait_outcome {
            Ok(()) => {
                timer.commit();
                confirmed += 1;
            }
            Err(e) => {
                let classified = registry.classify_owned(e.0);
                // A failed cycle still took time, unless the failure kind is
                // known to bounce instantly.
                if !registry.is_in_list(classified.kind, &registry.latency_exclusions) {
                    timer.commit();
                }
                debug!(cluster = %identity.cluster, error = %classified.raw, "probe cycle failed");
                errors.push(classified);
            }
        }
    }

    let submitted = cfg.batch_count;
    let loss = if submitted > 0 {
        (submitted - confirmed) as f64 / submitted as f64
    } else {
        0.0
    };
    let stats = timer.statistic();

    ProbeResult {
        cluster: identity.cluster.clone(),
        hostname: identity.hostname.clone(),
        kind,
        timestamp: Utc::now().timestamp(),
        submitted,
        confirmed,
        loss,
        min_ms: stats.min,
        mean_ms: stats.mean as i64,
        max_ms: stats.max,
        stddev_ms: stats.stddev as i64,
        take_time_ms: timer.total(),
        compute_unit_price,
        request_compute_units,
        errors,
    }
}

/// Poll signature status until it reaches confirmed/finalized commitment or
/// the wait timeout elapses. Transient status-query errors only surface once
/// the timeout is spent.
async fn wait_confirmed(
    client: &dyn LedgerClient,
    signature: &str,
    wait_timeout: Duration,
    poll_interval: Duration,
) -> Result<(), LedgerError> {
    let started = Instant::now();
    loop {
        match client.signature_status(signature).await {
            Ok(Some(commitment)) if commitment.is_confirmed() => return Ok(()),
            Ok(_) => {}
            Err(e) => {
                if started.elapsed() >= wait_timeout {
                    return Err(e);
                }
            }
        }
        if started.elapsed() >= wait_timeout {
            return Err(LedgerError(format!(
                "confirmation timed out after {}s",
                wait_timeout.as_secs()
            )));
        }
        sleep(poll_interval).await;
    }
}

/// Poll signature status until confirmation, treating expiry of the
/// submission blockhash as the definitive failure. `wait_timeout` only bounds
/// the case where the endpoint itself stops answering.
async fn wait_confirmed_or_expired(
    client: &dyn LedgerClient,
    tx: &SubmittedTx,
    wait_timeout: Duration,
    poll_interval: Duration,
) -> Result<(), LedgerError> {
    let started = Instant::now();
    loop {
        match client.signature_status(&tx.signature).await {
            Ok(Some(commitment)) if commitment.is_confirmed() => return Ok(()),
            Ok(_) => match client.is_blockhash_valid(&tx.blockhash).await {
                Ok(false) => {
                    return Err(LedgerError(
                        "transaction unconfirmed: blockhash expired".to_string(),
                    ))
                }
                Ok(true) => {}
                Err(e) => {
                    if started.elapsed() >= wait_timeout {
                        return Err(e);
                    }
                }
            },
            Err(e) => {
                if started.elapsed() >= wait_timeout {
                    return Err(e);
                }
            }
        }
        sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Commitment;
    use parking_lot::Mutex;

    #[test]
    fn statistic_over_plain_samples() {
        let mut t = TakeTime::default();
        t.add_sample(100);
        t.add_sample(200);
        t.add_sample(300);
        let s = t.statistic();
        assert_eq!(s.min, 100);
        assert_eq!(s.max, 300);
        assert_eq!(s.mean, 200.0);
        assert_eq!(s.sum, 600);
        assert!((s.stddev - 81.649658).abs() < 1e-5);
    }

    #[test]
    fn statistic_discards_nonpositive_samples() {
        let mut t = TakeTime::default();
        t.add_sample(100);
        t.add_sample(0);
        t.add_sample(200);
        let s = t.statistic();
        assert_eq!(s.min, 100);
        assert_eq!(s.max, 200);
        assert_eq!(s.mean, 150.0);
        assert_eq!(s.sum, 300);
        assert_eq!(s.stddev, 50.0);
    }

    #[test]
    fn statistic_of_empty_set_is_all_zero() {
        let t = TakeTime::default();
        let s = t.statistic();
        assert_eq!(s, LatencyStats::default());
    }

    /// Fails submission a fixed number of times, then submits and confirms
    /// instantly.
    struct FlakyClient {
        failures_left: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl LedgerClient for FlakyClient {
        async fn recent_priority_fee(&self) -> Result<u64, LedgerError> {
            Ok(1)
        }

        async fn submit_transfer(&self, _timeout: Duration) -> Result<String, LedgerError> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                Err(LedgerError("connection refused".to_string()))
            } else {
                Ok("stub-signature".to_string())
            }
        }

        async fn submit_priority_transfer(
            &self,
            _price: u64,
            _limit: u32,
            _timeout: Duration,
        ) -> Result<SubmittedTx, LedgerError> {
            Ok(SubmittedTx {
                signature: "stub-signature".to_string(),
                blockhash: "stub-blockhash".to_string(),
            })
        }

        async fn signature_status(
            &self,
            _signature: &str,
        ) -> Result<Option<Commitment>, LedgerError> {
            Ok(Some(Commitment::Confirmed))
        }

        async fn is_blockhash_valid(&self, _blockhash: &str) -> Result<bool, LedgerError> {
            Ok(true)
        }
    }

    fn batch_config(count: u32) -> BatchConfig {
        BatchConfig {
            batch_count: count,
            batch_interval: Duration::from_millis(0),
            tx_timeout: Duration::from_secs(1),
            wait_confirmation_timeout: Duration::from_secs(1),
            status_poll_interval: Duration::from_millis(0),
            fee: FeeMode::None,
        }
    }

    #[tokio::test]
    async fn batch_counts_failures_and_successes() {
        let client = FlakyClient {
            failures_left: Mutex::new(2),
        };
        let registry = ErrorRegistry::new();
        let identity = ProbeIdentity {
            cluster: "devnet".to_string(),
            hostname: "test-host".to_string(),
        };
        let result = run_batch(
            &client,
            &registry,
            &identity,
            ProbeKind::DataPoint1Min,
            &batch_config(3),
        )
        .await;

        assert_eq!(result.submitted, 3);
        assert_eq!(result.confirmed, 1);
        assert!((result.loss - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.errors.len(), 2);
        assert!(result
            .errors
            .iter()
            .all(|e| e.kind == ErrorKind::ConnectionRefused));
        assert!(result.error_summary().unwrap().contains("connection refused"));
        assert_eq!(result.pool_outcome(), Some(ErrorKind::ConnectionRefused));
    }

    #[tokio::test]
    async fn clean_batch_has_no_summary() {
        let client = FlakyClient {
            failures_left: Mutex::new(0),
        };
        let registry = ErrorRegistry::new();
        let identity = ProbeIdentity {
            cluster: "devnet".to_string(),
            hostname: "test-host".to_string(),
        };
        let result = run_batch(
            &client,
            &registry,
            &identity,
            ProbeKind::DataPoint1Min,
            &batch_config(2),
        )
        .await;

        assert_eq!(result.confirmed, 2);
        assert_eq!(result.loss, 0.0);
        assert!(result.error_summary().is_none());
        assert!(result.pool_outcome().is_none());
    }
}
