//! Passive sync health monitoring: a rolling per-table window of outcomes,
//! threshold checks, and a snapshot report. Never mutates replication state
//! itself -- only the kill switch (owned by `ReplicationManager`) acts on
//! what this module reports.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::events::AlertLevel;

const DEFAULT_WINDOW_SIZE: usize = 200;
const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 5;
const SUCCESS_RATE_WARN_THRESHOLD: f64 = 0.95;
const SUCCESS_RATE_ERROR_THRESHOLD: f64 = 0.5;
const SUCCESS_RATE_CRITICAL_THRESHOLD: f64 = 0.2;
const P95_DURATION_WARN_MS: u64 = 500;
const P95_DURATION_CRITICAL_MS: u64 = 1_000;

/// One recorded sync attempt outcome.
#[derive(Debug, Clone, Copy)]
pub struct SyncSample {
    pub success: bool,
    pub duration_ms: u64,
    pub bytes: u64,
}

/// A point-in-time health summary for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableHealth {
    pub table_name: String,
    pub sample_count: usize,
    pub success_rate: f64,
    pub p95_duration_ms: u64,
    pub consecutive_failures: u32,
    pub alert: Option<AlertLevel>,
}

struct TableWindow {
    samples: VecDeque<SyncSample>,
    consecutive_failures: u32,
}

impl TableWindow {
    fn new() -> Self {
        Self { samples: VecDeque::new(), consecutive_failures: 0 }
    }
}

/// Bounded rolling-window monitor over every registered table's recent sync
/// outcomes.
pub struct SyncMonitor {
    window_size: usize,
    tables: Mutex<HashMap<String, TableWindow>>,
}

impl SyncMonitor {
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        Self { window_size: window_size.max(1), tables: Mutex::new(HashMap::new()) }
    }

    pub fn record(&self, table_name: &str, sample: SyncSample) {
        let mut tables = self.tables.lock();
        let window = tables.entry(table_name.to_string()).or_insert_with(TableWindow::new);
        if sample.success {
            window.consecutive_failures = 0;
        } else {
            window.consecutive_failures = window.consecutive_failures.saturating_add(1);
        }
        window.samples.push_back(sample);
        while window.samples.len() > self.window_size {
            window.samples.pop_front();
        }
    }

    /// Snapshot of current health for one table, or `None` if it has no
    /// recorded samples yet.
    #[must_use]
    pub fn health_report(&self, table_name: &str) -> Option<TableHealth> {
        let tables = self.tables.lock();
        let window = tables.get(table_name)?;
        if window.samples.is_empty() {
            return None;
        }

        let total = window.samples.len();
        let successes = window.samples.iter().filter(|s| s.success).count();
        let success_rate = successes as f64 / total as f64;

        let mut durations: Vec<u64> = window.samples.iter().map(|s| s.duration_ms).collect();
        durations.sort_unstable();
        let p95_index = ((durations.len() as f64) * 0.95).ceil() as usize;
        let p95_duration_ms = durations[p95_index.saturating_sub(1).min(durations.len() - 1)];

        let alert = if success_rate < SUCCESS_RATE_CRITICAL_THRESHOLD
            || p95_duration_ms >= P95_DURATION_CRITICAL_MS
        {
            Some(AlertLevel::Critical)
        } else if window.consecutive_failures >= CONSECUTIVE_FAILURE_THRESHOLD
            || success_rate < SUCCESS_RATE_ERROR_THRESHOLD
        {
            Some(AlertLevel::Error)
        } else if success_rate < SUCCESS_RATE_WARN_THRESHOLD || p95_duration_ms >= P95_DURATION_WARN_MS {
            Some(AlertLevel::Warning)
        } else {
            None
        };

        Some(TableHealth {
            table_name: table_name.to_string(),
            sample_count: total,
            success_rate,
            p95_duration_ms,
            consecutive_failures: window.consecutive_failures,
            alert,
        })
    }

    /// Snapshot of every table with at least one recorded sample.
    #[must_use]
    pub fn health_report_all(&self) -> Vec<TableHealth> {
        let names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.into_iter().filter_map(|name| self.health_report(&name)).collect()
    }
}

impl Default for SyncMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_computed_over_window() {
        let m = SyncMonitor::new(10);
        for _ in 0..8 {
            m.record("todos", SyncSample { success: true, duration_ms: 10, bytes: 100 });
        }
        for _ in 0..2 {
            m.record("todos", SyncSample { success: false, duration_ms: 10, bytes: 0 });
        }
        let report = m.health_report("todos").unwrap();
        assert_eq!(report.success_rate, 0.8);
        // below the 95% warn threshold, even though well above the 50% error one.
        assert_eq!(report.alert, Some(AlertLevel::Warning));
    }

    #[test]
    fn low_success_rate_raises_error_alert() {
        let m = SyncMonitor::new(10);
        for _ in 0..3 {
            m.record("todos", SyncSample { success: true, duration_ms: 10, bytes: 1 });
        }
        for _ in 0..7 {
            m.record("todos", SyncSample { success: false, duration_ms: 10, bytes: 0 });
        }
        let report = m.health_report("todos").unwrap();
        assert_eq!(report.alert, Some(AlertLevel::Error));
    }

    #[test]
    fn window_evicts_oldest_samples() {
        let m = SyncMonitor::new(3);
        for i in 0..5 {
            m.record("todos", SyncSample { success: i % 2 == 0, duration_ms: 1, bytes: 0 });
        }
        let report = m.health_report("todos").unwrap();
        assert_eq!(report.sample_count, 3);
    }

    #[test]
    fn consecutive_failures_reset_on_success() {
        let m = SyncMonitor::new(10);
        m.record("todos", SyncSample { success: false, duration_ms: 1, bytes: 0 });
        m.record("todos", SyncSample { success: false, duration_ms: 1, bytes: 0 });
        m.record("todos", SyncSample { success: true, duration_ms: 1, bytes: 0 });
        let report = m.health_report("todos").unwrap();
        assert_eq!(report.consecutive_failures, 0);
    }

    #[test]
    fn unknown_table_has_no_report() {
        let m = SyncMonitor::new(10);
        assert!(m.health_report("ghost").is_none());
    }

    #[test]
    fn catastrophic_failure_rate_raises_critical_alert() {
        let m = SyncMonitor::new(10);
        m.record("todos", SyncSample { success: true, duration_ms: 10, bytes: 1 });
        for _ in 0..9 {
            m.record("todos", SyncSample { success: false, duration_ms: 10, bytes: 0 });
        }
        let report = m.health_report("todos").unwrap();
        assert!(report.success_rate < 0.2);
        assert_eq!(report.alert, Some(AlertLevel::Critical));
    }

    #[test]
    fn sustained_high_latency_raises_critical_alert_despite_perfect_success_rate() {
        let m = SyncMonitor::new(10);
        for _ in 0..10 {
            m.record("todos", SyncSample { success: true, duration_ms: 1_500, bytes: 100 });
        }
        let report = m.health_report("todos").unwrap();
        assert_eq!(report.success_rate, 1.0);
        assert!(report.p95_duration_ms >= 1_000);
        assert_eq!(report.alert, Some(AlertLevel::Critical));
    }
}
