//! rpc-pulse service binary
//!
//! Loads configuration, starts the per-cluster probe/report/retention
//! workers and serves the read-only query API.
//!
//! Usage:
//!   rpc-pulse --config config.toml [cluster-id]

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signer::keypair::read_keypair_file;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rpc_pulse::api::{self, ApiState, ClusterApiInfo};
use rpc_pulse::classify::ErrorRegistry;
use rpc_pulse::config::Config;
use rpc_pulse::failover::FailoverPool;
use rpc_pulse::notify::Notifier;
use rpc_pulse::store::ProbeStore;
use rpc_pulse::workers::{spawn_cluster, spawn_retention, ClusterRuntime};

#[derive(Parser, Debug)]
#[command(name = "rpc-pulse")]
#[command(about = "Continuous RPC cluster probing with windowed statistics and alerts")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config.toml", env = "RPC_PULSE_CONFIG")]
    config: String,

    /// Restrict to a single configured cluster id
    cluster: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = Config::load(&args.config)?;
    info!(
        hostname = %config.hostname,
        clusters = config.clusters.len(),
        "starting rpc-pulse"
    );

    let registry = Arc::new(ErrorRegistry::new());
    let store =
        ProbeStore::open(&config.database.path, registry.clone()).context("open probe store")?;
    let notifier = Notifier::new();

    let mut started = 0usize;
    for cluster in &config.clusters {
        if !cluster.enabled {
            continue;
        }
        if let Some(only) = &args.cluster {
            if only != &cluster.id {
                continue;
            }
        }

        // A broken identity is a deployment error; refuse to start.
        let keypair = read_keypair_file(&cluster.keypair_path)
            .map_err(|e| anyhow!("read keypair {}: {e}", cluster.keypair_path))?;
        let receiver = match cluster.receiver.trim() {
            "" => None,
            raw => Some(
                Pubkey::from_str(raw)
                    .with_context(|| format!("parse receiver pubkey for {}", cluster.id))?,
            ),
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pool = Arc::new(FailoverPool::new(
            &cluster.id,
            &cluster.endpoints,
            &cluster.fallback_endpoint,
            event_tx,
        ));

        let runtime = Arc::new(ClusterRuntime {
            config: Arc::new(cluster.clone()),
            hostname: config.hostname.clone(),
            registry: registry.clone(),
            store: store.clone(),
            notifier: notifier.clone(),
            pool,
            keypair: Arc::new(keypair),
            receiver,
        });
        spawn_cluster(runtime, event_rx);
        info!(cluster = %cluster.id, slots = cluster.ping.num_slots, "cluster services started");
        started += 1;
    }
    if started == 0 {
        warn!("no enabled cluster matched; only retention and the query API will run");
    }

    spawn_retention(store.clone(), config.retention.clone());

    if config.server.enabled {
        let clusters: Vec<ClusterApiInfo> = config
            .clusters
            .iter()
            .map(|c| ClusterApiInfo {
                id: c.id.clone(),
                tx_timeout: c.ping.tx_timeout(),
            })
            .collect();
        let state = ApiState {
            store,
            registry,
            clusters: Arc::new(clusters),
        };
        let listener = TcpListener::bind(&config.server.listen)
            .await
            .with_context(|| format!("bind {}", config.server.listen))?;
        info!(listen = %config.server.listen, "query API listening");
        axum::serve(listener, api::router(state)).await?;
    } else {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
