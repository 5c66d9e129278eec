//! Read-only query surface
//!
//! Serves the latest probe datapoint and the rolling six-hour windowed
//! statistics per cluster, plus a health endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::classify::ErrorRegistry;
use crate::probe::{ProbeKind, ProbeResult};
use crate::store::{FeeFilter, ProbeStore};
use crate::window::{compute_statistics, group_by_window, WindowStatistic};

const SIX_HOURS_SECS: i64 = 6 * 60 * 60;

/// Per-cluster knobs the API needs for aggregation.
#[derive(Debug, Clone)]
pub struct ClusterApiInfo {
    pub id: String,
    pub tx_timeout: Duration,
}

#[derive(Clone)]
pub struct ApiState {
    pub store: ProbeStore,
    pub registry: Arc<ErrorRegistry>,
    pub clusters: Arc<Vec<ClusterApiInfo>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/:cluster/latest", get(latest))
        .route("/:cluster/last6hours", get(last6hours))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// One datapoint as served to clients.
#[derive(Debug, Default, Serialize)]
pub struct DataPointJson {
    pub submitted: u32,
    pub confirmed: u32,
    pub loss: String,
    pub mean_ms: i64,
    pub ts: String,
    pub error_count: usize,
    pub error: String,
}

fn rfc3339(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

impl DataPointJson {
    pub fn from_result(result: &ProbeResult) -> Self {
        Self {
            submitted: result.submitted,
            confirmed: result.confirmed,
            loss: format!("{:3.1}%", result.loss * 100.0),
            mean_ms: result.mean_ms,
            ts: rfc3339(result.timestamp),
            error_count: result.errors.len(),
            error: result
                .errors
                .iter()
                .map(|e| e.raw.as_str())
                .collect::<Vec<_>>()
                .join(";"),
        }
    }

    pub fn from_window(stat: &WindowStatistic) -> Self {
        let (loss, error) = if stat.count == 0 {
            (format!("{:3.1}%", 0.0), "No Data".to_string())
        } else {
            (format!("{:3.1}%", stat.loss * 100.0), String::new())
        };
        Self {
            submitted: stat.submitted as u32,
            confirmed: stat.confirmed as u32,
            loss,
            mean_ms: stat.latency.mean as i64,
            ts: rfc3339(stat.timestamp),
            error_count: stat.errors.len(),
            error,
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn latest(Path(cluster): Path<String>, State(state): State<ApiState>) -> Response {
    if !state.clusters.iter().any(|c| c.id == cluster) {
        return StatusCode::NOT_FOUND.into_response();
    }
    match state
        .store
        .query_latest(&cluster, ProbeKind::DataPoint1Min, 1, FeeFilter::Any)
        .await
    {
        Ok(rows) => {
            let point = rows
                .first()
                .map(DataPointJson::from_result)
                .unwrap_or_default();
            Json(point).into_response()
        }
        Err(e) => {
            error!(cluster, error = %e, "latest query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn last6hours(Path(cluster): Path<String>, State(state): State<ApiState>) -> Response {
    let Some(info) = state.clusters.iter().find(|c| c.id == cluster) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let query = async {
        // Anchor the window at the newest record so a paused prober still
        // returns its last six probed hours.
        let newest = state
            .store
            .query_latest(&cluster, ProbeKind::DataPoint1Min, 1, FeeFilter::Any)
            .await?;
        let end = newest
            .first()
            .map(|r| r.timestamp)
            .unwrap_or_else(|| Utc::now().timestamp());
        let since = end - SIX_HOURS_SECS;
        let records = state
            .store
            .query_after(&cluster, ProbeKind::DataPoint1Min, since, FeeFilter::Any)
            .await?;
        anyhow::Ok((records, since, end))
    };

    match query.await {
        Ok((records, since, end)) => {
            if records.is_empty() {
                return Json(Vec::<DataPointJson>::new()).into_response();
            }
            let groups = group_by_window(&records, since, end);
            let report = compute_statistics(&state.registry, info.tx_timeout, &groups);
            let points: Vec<DataPointJson> = report
                .filtered
                .iter()
                .map(DataPointJson::from_window)
                .collect();
            Json(points).into_response()
        }
        Err(e) => {
            error!(cluster, error = %e, "last6hours query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
