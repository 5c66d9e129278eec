//! Cluster orchestration
//!
//! Per cluster: N probe-slot workers feeding the store, one report/alert
//! loop, and a drain for failover notices. A process-wide retention sweep
//! keeps the database bounded. Every loop runs until shutdown; failures are
//! logged and the loop continues.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::alert::{AlertTrigger, FileLevelStore};
use crate::classify::ErrorRegistry;
use crate::config::{ClusterConfig, RetentionConfig};
use crate::failover::{FailoverPool, PoolEvent};
use crate::ledger::SolanaLedgerClient;
use crate::notify::Notifier;
use crate::probe::{run_batch, ProbeIdentity, ProbeKind};
use crate::report::{render_alert, render_failover, render_report, RenderContext};
use crate::store::{FeeFilter, ProbeStore};
use crate::window::{compute_statistics, group_by_window};

/// Everything the workers of one cluster share.
pub struct ClusterRuntime {
    pub config: Arc<ClusterConfig>,
    pub hostname: String,
    pub registry: Arc<ErrorRegistry>,
    pub store: ProbeStore,
    pub notifier: Notifier,
    pub pool: Arc<FailoverPool>,
    pub keypair: Arc<Keypair>,
    pub receiver: Option<Pubkey>,
}

/// Spawn all services for one cluster.
pub fn spawn_cluster(
    runtime: Arc<ClusterRuntime>,
    pool_events: mpsc::UnboundedReceiver<PoolEvent>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for slot in 0..runtime.config.ping.num_slots.max(1) {
        let rt = runtime.clone();
        handles.push(tokio::spawn(async move {
            probe_slot_worker(rt, slot).await;
        }));
    }

    if runtime.config.report.enabled {
        let rt = runtime.clone();
        handles.push(tokio::spawn(async move {
            report_worker(rt).await;
        }));
        let rt = runtime.clone();
        handles.push(tokio::spawn(async move {
            failover_notice_worker(rt, pool_events).await;
        }));
    }

    handles
}

/// Process-wide retention sweep.
pub fn spawn_retention(store: ProbeStore, retention: RetentionConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(retention.update_interval_secs.max(1));
        loop {
            sleep(interval).await;
            let cutoff = Utc::now().timestamp() - retention.keep_hours * 3600;
            match store.delete_before(cutoff).await {
                Ok(removed) if removed > 0 => {
                    info!(removed, "retention sweep removed old probe results");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "retention sweep failed"),
            }
        }
    })
}

/// One probe slot: acquire a client, run the configured batches, feed the
/// pool's health accounting and the store, respect the minimum cadence.
async fn probe_slot_worker(rt: Arc<ClusterRuntime>, slot: usize) {
    let ping = &rt.config.ping;
    let identity = ProbeIdentity {
        cluster: rt.config.id.clone(),
        hostname: rt.hostname.clone(),
    };
    info!(cluster = %identity.cluster, slot, "probe worker started");

    // Fee-enabled clusters probe the priority-fee lane; with dual reporting
    // the plain lane runs alongside it.
    let mut plan = Vec::new();
    if ping.fee.enabled {
        plan.push(ping.batch_config(true));
    }
    if !ping.fee.enabled || ping.fee.dual_reporting {
        plan.push(ping.batch_config(false));
    }

    let min_cadence = Duration::from_secs(ping.min_per_probe_secs);
    let mut client: Option<Arc<RpcClient>> = None;

    loop {
        let started = Instant::now();
        for batch in &plan {
            let rpc = rt.pool.acquire(client.take());
            let ledger = SolanaLedgerClient::new(rpc.clone(), rt.keypair.clone(), rt.receiver);
            let result = run_batch(
                &ledger,
                &rt.registry,
                &identity,
                ProbeKind::DataPoint1Min,
                batch,
            )
            .await;
            rt.pool.record_outcome(result.pool_outcome());
            client = Some(rpc);

            if let Some(summary) = result.error_summary() {
                warn!(cluster = %identity.cluster, slot, errors = %summary, "probe batch finished with errors");
            }
            if let Err(e) = rt.store.insert(&result).await {
                error!(cluster = %identity.cluster, error = %e, "failed to persist probe result");
            }
        }
        let elapsed = started.elapsed();
        if elapsed < min_cadence {
            sleep(min_cadence - elapsed).await;
        }
    }
}

/// Where a lane's trigger persists its ladder position.
fn level_store_path(configured: &str, cluster_id: &str, suffix: &str) -> String {
    if configured.is_empty() {
        format!("{cluster_id}.alert-level{suffix}")
    } else {
        format!("{configured}{suffix}")
    }
}

struct ReportLane {
    label: &'static str,
    filter: FeeFilter,
    trigger: AlertTrigger,
}

/// Periodic report plus the hysteresis-gated alert, per lane. This loop is
/// the only driver of each lane's trigger.
async fn report_worker(rt: Arc<ClusterRuntime>) {
    let cluster_id = rt.config.id.clone();
    let report_cfg = &rt.config.report;
    let interval = Duration::from_secs(report_cfg.interval_secs.max(1));
    info!(cluster = %cluster_id, interval_secs = interval.as_secs(), "report worker started");

    let mut lanes = Vec::new();
    if rt.config.ping.fee.enabled && rt.config.ping.fee.dual_reporting {
        for (label, filter, suffix) in [
            ("fee", FeeFilter::WithFee, ".fee"),
            ("nofee", FeeFilter::NoFee, ".nofee"),
        ] {
            lanes.push(ReportLane {
                label,
                filter,
                trigger: AlertTrigger::new(
                    &format!("{cluster_id}-{label}"),
                    report_cfg.loss_threshold,
                    Box::new(FileLevelStore::new(level_store_path(
                        &report_cfg.level_file_path,
                        &cluster_id,
                        suffix,
                    ))),
                ),
            });
        }
    } else {
        lanes.push(ReportLane {
            label: "",
            filter: FeeFilter::Any,
            trigger: AlertTrigger::new(
                &cluster_id,
                report_cfg.loss_threshold,
                Box::new(FileLevelStore::new(level_store_path(
                    &report_cfg.level_file_path,
                    &cluster_id,
                    "",
                ))),
            ),
        });
    }

    loop {
        sleep(interval).await;
        let now = Utc::now().timestamp();
        let since = now - interval.as_secs() as i64;

        for lane in &mut lanes {
            let records = match rt
                .store
                .query_after(&cluster_id, ProbeKind::DataPoint1Min, since, lane.filter)
                .await
            {
                Ok(records) => records,
                Err(e) => {
                    error!(cluster = %cluster_id, error = %e, "report query failed");
                    continue;
                }
            };
            let groups = group_by_window(&records, since, now);
            let window_report =
                compute_statistics(&rt.registry, rt.config.ping.tx_timeout(), &groups);
            let global = window_report.global(false);

            let memo = if lane.label.is_empty() {
                report_cfg.memo.clone()
            } else if report_cfg.memo.is_empty() {
                lane.label.to_string()
            } else {
                format!("{} {}", report_cfg.memo, lane.label)
            };
            let ctx = RenderContext {
                cluster: &cluster_id,
                hostname: &rt.hostname,
                memo: &memo,
                hide_keywords: &report_cfg.hide_keywords,
            };

            if !report_cfg.webhook.is_empty() {
                let payload = render_report(
                    report_cfg.channel,
                    &ctx,
                    &window_report,
                    &global,
                    &rt.registry,
                );
                if let Err(e) = rt.notifier.send(&report_cfg.webhook, &payload).await {
                    warn!(cluster = %cluster_id, error = %e, "report delivery failed");
                }
            }

            lane.trigger.update(global.loss);
            if lane.trigger.should_send() {
                let webhook = report_cfg.alert_webhook();
                if webhook.is_empty() {
                    continue;
                }
                let payload = render_alert(
                    report_cfg.channel,
                    &ctx,
                    &global,
                    &window_report.error_frequency,
                    lane.trigger.next_threshold(),
                    &rt.registry,
                );
                if let Err(e) = rt.notifier.send(webhook, &payload).await {
                    warn!(cluster = %cluster_id, error = %e, "alert delivery failed");
                }
            }
        }
    }
}

/// Deliver failover notices emitted by the pool.
async fn failover_notice_worker(
    rt: Arc<ClusterRuntime>,
    mut events: mpsc::UnboundedReceiver<PoolEvent>,
) {
    while let Some(PoolEvent::Failover { cluster, url }) = events.recv().await {
        let webhook = rt.config.report.alert_webhook();
        if webhook.is_empty() {
            continue;
        }
        let payload = render_failover(rt.config.report.channel, &rt.hostname, &cluster, &url);
        if let Err(e) = rt.notifier.send(webhook, &payload).await {
            warn!(cluster, error = %e, "failover notice delivery failed");
        }
    }
}
