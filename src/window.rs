//! Windowed statistics
//!
//! Groups probe results into 60-second buckets and computes two parallel
//! statistics per bucket: raw (everything counts) and filtered (results whose
//! errors are statistic-excluded are dropped from the denominators). A pooled
//! global statistic is re-derived from the union of samples, never from
//! per-bucket means.

use std::collections::HashMap;
use std::time::Duration;

use crate::classify::{ClassifiedError, ErrorRegistry};
use crate::probe::{LatencyStats, ProbeResult, TakeTime};

/// Bucket width in seconds.
pub const WINDOW_SECS: i64 = 60;

/// Probe results whose timestamp falls in `(end_ts - 60, end_ts]`.
#[derive(Debug, Default, Clone)]
pub struct WindowGroup {
    pub results: Vec<ProbeResult>,
    pub end_ts: i64,
}

/// Partition results into 60-second buckets walking backward from `end` to
/// `start`. Arrival order is irrelevant; only each result's own timestamp
/// decides its bucket.
pub fn group_by_window(results: &[ProbeResult], start: i64, end: i64) -> Vec<WindowGroup> {
    let mut groups = Vec::new();
    let mut period_end = end;
    while period_end > start {
        let members = results
            .iter()
            .filter(|r| r.timestamp <= period_end && r.timestamp > period_end - WINDOW_SECS)
            .cloned()
            .collect();
        groups.push(WindowGroup {
            results: members,
            end_ts: period_end,
        });
        period_end -= WINDOW_SECS;
    }
    groups
}

/// Statistics for one bucket.
#[derive(Debug, Default, Clone)]
pub struct WindowStatistic {
    pub submitted: f64,
    pub confirmed: f64,
    pub loss: f64,
    pub count: u32,
    pub samples: TakeTime,
    pub latency: LatencyStats,
    pub errors: Vec<ClassifiedError>,
    pub timestamp: i64,
}

impl WindowStatistic {
    fn finalize(&mut self) {
        self.loss = if self.submitted > 0.0 {
            (self.submitted - self.confirmed) / self.submitted
        } else {
            // No data is indistinguishable from total loss here; callers
            // separate the two via `count`.
            1.0
        };
        self.latency = self.samples.statistic();
    }
}

/// Pooled statistic across every bucket of a reporting period.
#[derive(Debug, Default, Clone)]
pub struct GlobalStatistic {
    pub submitted: f64,
    pub confirmed: f64,
    pub loss: f64,
    pub count: u32,
    pub latency: LatencyStats,
}

/// Raw and filtered bucket statistics plus the period-wide error frequency
/// map, keyed by raw error text.
#[derive(Debug, Default)]
pub struct WindowReport {
    pub filtered: Vec<WindowStatistic>,
    pub raw: Vec<WindowStatistic>,
    pub error_frequency: HashMap<String, u32>,
}

/// Compute per-bucket statistics. `tx_timeout` is the latency charge assigned
/// to an errored-but-not-excluded result in the filtered statistic: a generic
/// failure is accounted as a timeout.
pub fn compute_statistics(
    registry: &ErrorRegistry,
    tx_timeout: Duration,
    groups: &[WindowGroup],
) -> WindowReport {
    let mut report = WindowReport::default();

    for group in groups {
        let mut filtered = WindowStatistic {
            timestamp: group.end_ts,
            ..Default::default()
        };
        let mut raw = WindowStatistic {
            timestamp: group.end_ts,
            ..Default::default()
        };

        for result in &group.results {
            let mut excluded = false;
            for error in &result.errors {
                *report.error_frequency.entry(error.raw.clone()).or_insert(0) += 1;
                if registry.is_in_list(error.kind, &registry.statistic_exclusions) {
                    excluded = true;
                } else {
                    filtered.errors.push(error.clone());
                }
                raw.errors.push(error.clone());
            }

            raw.submitted += result.submitted as f64;
            raw.confirmed += result.confirmed as f64;
            raw.count += 1;
            raw.samples.add_sample(result.take_time_ms);

            if !excluded {
                filtered.submitted += result.submitted as f64;
                filtered.confirmed += result.confirmed as f64;
                filtered.count += 1;
                if result.errors.is_empty() {
                    filtered.samples.add_sample(result.take_time_ms);
                } else {
                    filtered.samples.add_sample(tx_timeout.as_millis() as i64);
                }
            }
        }

        raw.finalize();
        filtered.finalize();
        report.raw.push(raw);
        report.filtered.push(filtered);
    }

    report
}

impl WindowReport {
    /// Pool every bucket of the selected kind into one statistic. Latency is
    /// re-derived from the pooled sample set.
    pub fn global(&self, raw: bool) -> GlobalStatistic {
        let buckets = if raw { &self.raw } else { &self.filtered };

        let mut global = GlobalStatistic::default();
        let mut pooled = TakeTime::default();
        for bucket in buckets {
            global.submitted += bucket.submitted;
            global.confirmed += bucket.confirmed;
            global.count += bucket.count;
            pooled.extend(&bucket.samples);
        }

        global.loss = if global.submitted > 0.0 {
            (global.submitted - global.confirmed) / global.submitted
        } else if self.error_frequency.is_empty() {
            // Nothing ran at all.
            0.0
        } else {
            1.0
        };
        global.latency = pooled.statistic();
        global
    }
}
