//! Probe result persistence
//!
//! SQLite-backed sink shared by every probe worker. Each batch is one
//! independent insert; readers get results back with their error lists
//! re-classified, so downstream code never touches raw substrings.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tokio::sync::Mutex;

use crate::classify::ErrorRegistry;
use crate::probe::{ProbeKind, ProbeResult};

/// Partition of records by submission strategy, for dual fee/no-fee
/// reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeFilter {
    Any,
    WithFee,
    NoFee,
}

impl FeeFilter {
    fn clause(self) -> &'static str {
        match self {
            FeeFilter::Any => "",
            FeeFilter::WithFee => " AND compute_unit_price > 0",
            FeeFilter::NoFee => " AND compute_unit_price = 0",
        }
    }
}

#[derive(Clone)]
pub struct ProbeStore {
    conn: Arc<Mutex<Connection>>,
    registry: Arc<ErrorRegistry>,
}

impl ProbeStore {
    pub fn open(db_path: &str, registry: Arc<ErrorRegistry>) -> Result<Self> {
        let conn = Connection::open(db_path).context("open probe db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS probe_results (
                ts INTEGER NOT NULL,
                cluster TEXT NOT NULL,
                hostname TEXT NOT NULL,
                kind TEXT NOT NULL,
                submitted INTEGER NOT NULL,
                confirmed INTEGER NOT NULL,
                loss REAL NOT NULL,
                min_ms INTEGER NOT NULL,
                mean_ms INTEGER NOT NULL,
                max_ms INTEGER NOT NULL,
                stddev_ms INTEGER NOT NULL,
                take_time_ms INTEGER NOT NULL,
                compute_unit_price INTEGER NOT NULL,
                request_compute_units INTEGER NOT NULL,
                errors TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_probe_results_cluster_kind_ts
             ON probe_results(cluster, kind, ts DESC)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            registry,
        })
    }

    pub async fn insert(&self, result: &ProbeResult) -> Result<()> {
        let errors: Vec<&str> = result.errors.iter().map(|e| e.raw.as_str()).collect();
        let errors_json = serde_json::to_string(&errors)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO probe_results (
                ts, cluster, hostname, kind, submitted, confirmed, loss,
                min_ms, mean_ms, max_ms, stddev_ms, take_time_ms,
                compute_unit_price, request_compute_units, errors, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                result.timestamp,
                result.cluster,
                result.hostname,
                result.kind.as_str(),
                result.submitted,
                result.confirmed,
                result.loss,
                result.min_ms,
                result.mean_ms,
                result.max_ms,
                result.stddev_ms,
                result.take_time_ms,
                result.compute_unit_price as i64,
                result.request_compute_units,
                errors_json,
                Utc::now().timestamp(),
            ],
        )
        .context("insert probe result")?;
        Ok(())
    }

    /// Latest `limit` results, newest first.
    pub async fn query_latest(
        &self,
        cluster: &str,
        kind: ProbeKind,
        limit: u32,
        fee: FeeFilter,
    ) -> Result<Vec<ProbeResult>> {
        let sql = format!(
            "SELECT ts, cluster, hostname, kind, submitted, confirmed, loss,
                    min_ms, mean_ms, max_ms, stddev_ms, take_time_ms,
                    compute_unit_price, request_compute_units, errors
             FROM probe_results
             WHERE cluster = ?1 AND kind = ?2{}
             ORDER BY ts DESC LIMIT ?3",
            fee.clause()
        );
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cluster, kind.as_str(), limit], |row| {
            self.row_to_result(row)
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Results strictly newer than `since`, newest first.
    pub async fn query_after(
        &self,
        cluster: &str,
        kind: ProbeKind,
        since: i64,
        fee: FeeFilter,
    ) -> Result<Vec<ProbeResult>> {
        let sql = format!(
            "SELECT ts, cluster, hostname, kind, submitted, confirmed, loss,
                    min_ms, mean_ms, max_ms, stddev_ms, take_time_ms,
                    compute_unit_price, request_compute_units, errors
             FROM probe_results
             WHERE cluster = ?1 AND kind = ?2 AND ts > ?3{}
             ORDER BY ts DESC",
            fee.clause()
        );
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cluster, kind.as_str(), since], |row| {
            self.row_to_result(row)
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Drop records with `ts` older than the cutoff; returns how many went.
    pub async fn delete_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute("DELETE FROM probe_results WHERE ts < ?1", params![cutoff])
            .context("delete old probe results")?;
        Ok(removed)
    }

    fn row_to_result(&self, row: &Row<'_>) -> rusqlite::Result<ProbeResult> {
        let kind: String = row.get(3)?;
        let errors_json: String = row.get(14)?;
        let raw_errors: Vec<String> = serde_json::from_str(&errors_json).unwrap_or_default();
        Ok(ProbeResult {
            timestamp: row.get(0)?,
            cluster: row.get(1)?,
            hostname: row.get(2)?,
            kind: ProbeKind::parse(&kind).unwrap_or(ProbeKind::DataPoint1Min),
            submitted: row.get(4)?,
            confirmed: row.get(5)?,
            loss: row.get(6)?,
            min_ms: row.get(7)?,
            mean_ms: row.get(8)?,
            max_ms: row.get(9)?,
            stddev_ms: row.get(10)?,
            take_time_ms: row.get(11)?,
            compute_unit_price: row.get::<_, i64>(12)? as u64,
            request_compute_units: row.get(13)?,
            errors: raw_errors
                .into_iter()
                .map(|raw| self.registry.classify_owned(raw))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorKind;

    fn store() -> (tempfile::TempDir, ProbeStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probes.db");
        let s = ProbeStore::open(path.to_str().unwrap(), Arc::new(ErrorRegistry::new())).unwrap();
        (dir, s)
    }

    fn result(ts: i64, price: u64, errors: &[&str]) -> ProbeResult {
        let registry = ErrorRegistry::new();
        ProbeResult {
            cluster: "devnet".to_string(),
            hostname: "test-host".to_string(),
            kind: ProbeKind::DataPoint1Min,
            timestamp: ts,
            submitted: 10,
            confirmed: 9,
            loss: 0.1,
            min_ms: 40,
            mean_ms: 50,
            max_ms: 60,
            stddev_ms: 5,
            take_time_ms: 500,
            compute_unit_price: price,
            request_compute_units: if price > 0 { 450 } else { 0 },
            errors: errors
                .iter()
                .map(|e| registry.classify_owned(e.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn roundtrip_preserves_fields_and_classification() {
        let (_dir, store) = store();
        store
            .insert(&result(100, 0, &["connection refused", "weird failure"]))
            .await
            .unwrap();

        let rows = store
            .query_latest("devnet", ProbeKind::DataPoint1Min, 10, FeeFilter::Any)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.timestamp, 100);
        assert_eq!(r.submitted, 10);
        assert_eq!(r.confirmed, 9);
        assert_eq!(r.take_time_ms, 500);
        assert_eq!(r.errors.len(), 2);
        assert_eq!(r.errors[0].kind, ErrorKind::ConnectionRefused);
        assert_eq!(r.errors[1].kind, ErrorKind::Unclassified);
        assert_eq!(r.errors[1].raw, "weird failure");
    }

    #[tokio::test]
    async fn latest_is_newest_first_and_limited() {
        let (_dir, store) = store();
        for ts in [100, 300, 200] {
            store.insert(&result(ts, 0, &[])).await.unwrap();
        }
        let rows = store
            .query_latest("devnet", ProbeKind::DataPoint1Min, 2, FeeFilter::Any)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, 300);
        assert_eq!(rows[1].timestamp, 200);
    }

    #[tokio::test]
    async fn query_after_is_strictly_after() {
        let (_dir, store) = store();
        for ts in [100, 200, 300] {
            store.insert(&result(ts, 0, &[])).await.unwrap();
        }
        let rows = store
            .query_after("devnet", ProbeKind::DataPoint1Min, 200, FeeFilter::Any)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, 300);
    }

    #[tokio::test]
    async fn fee_filter_partitions_records() {
        let (_dir, store) = store();
        store.insert(&result(100, 0, &[])).await.unwrap();
        store.insert(&result(110, 1000, &[])).await.unwrap();

        let with_fee = store
            .query_latest("devnet", ProbeKind::DataPoint1Min, 10, FeeFilter::WithFee)
            .await
            .unwrap();
        assert_eq!(with_fee.len(), 1);
        assert_eq!(with_fee[0].compute_unit_price, 1000);

        let no_fee = store
            .query_latest("devnet", ProbeKind::DataPoint1Min, 10, FeeFilter::NoFee)
            .await
            .unwrap();
        assert_eq!(no_fee.len(), 1);
        assert_eq!(no_fee[0].timestamp, 100);
    }

    #[tokio::test]
    async fn delete_before_removes_only_older_rows() {
        let (_dir, store) = store();
        for ts in [100, 200, 300] {
            store.insert(&result(ts, 0, &[])).await.unwrap();
        }
        let removed = store.delete_before(200).await.unwrap();
        assert_eq!(removed, 1);
        let rows = store
            .query_latest("devnet", ProbeKind::DataPoint1Min, 10, FeeFilter::Any)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }
}
