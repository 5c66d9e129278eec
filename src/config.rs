//! Service configuration
//!
//! One TOML file describes the server, the database, retention, and every
//! probed cluster. All values are plain data passed into constructors; there
//! is no process-wide config global.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::probe::{BatchConfig, FeeMode, FeeSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Reported in every probe result; defaults to $HOSTNAME.
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parse config file {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Serve the read-only query API.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// How long probe records are kept.
    #[serde(default = "default_keep_hours")]
    pub keep_hours: i64,
    #[serde(default = "default_retention_interval")]
    pub update_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_hours: default_keep_hours(),
            update_interval_secs: default_retention_interval(),
        }
    }
}

/// One probed cluster: its endpoints, probe cadence and reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster id, also the API path segment (e.g. "mainnet-beta").
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fee-payer keypair file; unparseable at startup is fatal.
    pub keypair_path: String,
    /// Transfer receiver pubkey; empty means self-transfer.
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub endpoints: Vec<RpcEndpointConfig>,
    /// Used when `endpoints` is empty.
    #[serde(default = "default_fallback_endpoint")]
    pub fallback_endpoint: String,
    #[serde(default)]
    pub ping: PingConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEndpointConfig {
    pub url: String,
    #[serde(default)]
    pub access_token: String,
    /// Lower is preferred.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingConfig {
    /// Parallel probe workers for this cluster.
    #[serde(default = "default_num_slots")]
    pub num_slots: usize,
    #[serde(default = "default_batch_count")]
    pub batch_count: u32,
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    #[serde(default = "default_tx_timeout_secs")]
    pub tx_timeout_secs: u64,
    #[serde(default = "default_wait_confirmation_timeout_secs")]
    pub wait_confirmation_timeout_secs: u64,
    #[serde(default = "default_status_check_interval_ms")]
    pub status_check_interval_ms: u64,
    /// Minimum wall-clock spacing between batches on one worker.
    #[serde(default = "default_min_per_probe_secs")]
    pub min_per_probe_secs: u64,
    #[serde(default)]
    pub fee: FeeConfig,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            num_slots: default_num_slots(),
            batch_count: default_batch_count(),
            batch_interval_ms: default_batch_interval_ms(),
            tx_timeout_secs: default_tx_timeout_secs(),
            wait_confirmation_timeout_secs: default_wait_confirmation_timeout_secs(),
            status_check_interval_ms: default_status_check_interval_ms(),
            min_per_probe_secs: default_min_per_probe_secs(),
            fee: FeeConfig::default(),
        }
    }
}

impl PingConfig {
    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_timeout_secs)
    }

    /// Engine configuration for one batch; `with_fee` selects the
    /// priority-fee strategy when it is enabled for the cluster.
    pub fn batch_config(&self, with_fee: bool) -> BatchConfig {
        let fee = if with_fee && self.fee.enabled {
            FeeMode::Priority {
                compute_unit_limit: self.fee.compute_unit_limit,
                source: if self.fee.compute_unit_price > 0 {
                    FeeSource::Fixed(self.fee.compute_unit_price)
                } else {
                    FeeSource::Recent
                },
            }
        } else {
            FeeMode::None
        };
        BatchConfig {
            batch_count: self.batch_count,
            batch_interval: Duration::from_millis(self.batch_interval_ms),
            tx_timeout: self.tx_timeout(),
            wait_confirmation_timeout: Duration::from_secs(self.wait_confirmation_timeout_secs),
            status_poll_interval: Duration::from_millis(self.status_check_interval_ms),
            fee,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_compute_unit_limit")]
    pub compute_unit_limit: u32,
    /// Fixed compute-unit price in micro-lamports; 0 selects the recent-fee
    /// lookup.
    #[serde(default)]
    pub compute_unit_price: u64,
    /// Also run plain batches and report fee/no-fee lanes separately.
    #[serde(default)]
    pub dual_reporting: bool,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            compute_unit_limit: default_compute_unit_limit(),
            compute_unit_price: 0,
            dual_reporting: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookKind {
    Slack,
    Discord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_webhook_kind")]
    pub channel: WebhookKind,
    /// Periodic report webhook.
    #[serde(default)]
    pub webhook: String,
    /// Alert webhook; falls back to `webhook` when empty.
    #[serde(default)]
    pub alert_webhook: String,
    #[serde(default = "default_report_interval")]
    pub interval_secs: u64,
    /// Base alert threshold, percent loss.
    #[serde(default = "default_loss_threshold")]
    pub loss_threshold: f64,
    #[serde(default)]
    pub level_file_path: String,
    /// Substrings scrubbed out of rendered error text (tokens, hostnames).
    #[serde(default)]
    pub hide_keywords: Vec<String>,
    #[serde(default)]
    pub memo: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: default_webhook_kind(),
            webhook: String::new(),
            alert_webhook: String::new(),
            interval_secs: default_report_interval(),
            loss_threshold: default_loss_threshold(),
            level_file_path: String::new(),
            hide_keywords: Vec::new(),
            memo: String::new(),
        }
    }
}

impl ReportConfig {
    pub fn alert_webhook(&self) -> &str {
        if self.alert_webhook.is_empty() {
            &self.webhook
        } else {
            &self.alert_webhook
        }
    }
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

fn default_true() -> bool {
    true
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_db_path() -> String {
    "probe_results.db".to_string()
}

fn default_keep_hours() -> i64 {
    6
}

fn default_retention_interval() -> u64 {
    3600
}

fn default_fallback_endpoint() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

fn default_max_retry() -> u32 {
    30
}

fn default_num_slots() -> usize {
    1
}

fn default_batch_count() -> u32 {
    10
}

fn default_batch_interval_ms() -> u64 {
    1000
}

fn default_tx_timeout_secs() -> u64 {
    10
}

fn default_wait_confirmation_timeout_secs() -> u64 {
    50
}

fn default_status_check_interval_ms() -> u64 {
    1000
}

fn default_min_per_probe_secs() -> u64 {
    10
}

fn default_compute_unit_limit() -> u32 {
    450
}

fn default_webhook_kind() -> WebhookKind {
    WebhookKind::Slack
}

fn default_report_interval() -> u64 {
    600
}

fn default_loss_threshold() -> f64 {
    5.0
}
