//! RPC Pulse
//!
//! Continuously probes distributed-ledger RPC clusters with lightweight
//! transactions, measures confirmation latency and loss, aggregates the
//! telemetry into per-minute windows and drives hysteresis-gated alerts and
//! periodic webhook reports.

pub mod alert;
pub mod api;
pub mod classify;
pub mod config;
pub mod failover;
pub mod ledger;
pub mod notify;
pub mod probe;
pub mod report;
pub mod store;
pub mod window;
pub mod workers;
