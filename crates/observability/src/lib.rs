//! Metric-style structured log events for warehouse loads.
//!
//! Every event carries a `metric` field so log pipelines can pick them out.
//! Process-wide totals are plain atomics; `totals()` reads them back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

static LOADS_SUCCEEDED_TOTAL: AtomicU64 = AtomicU64::new(0);
static LOADS_FAILED_TOTAL: AtomicU64 = AtomicU64::new(0);
static RECORDS_INSERTED_TOTAL: AtomicU64 = AtomicU64::new(0);
static RECORDS_REJECTED_TOTAL: AtomicU64 = AtomicU64::new(0);
static ORPHANED_RUNS_TOTAL: AtomicU64 = AtomicU64::new(0);

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Snapshot of the process-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub loads_succeeded: u64,
    pub loads_failed: u64,
    pub records_inserted: u64,
    pub records_rejected: u64,
    pub orphaned_runs: u64,
}

/// Read the current counter values.
pub fn totals() -> Totals {
    Totals {
        loads_succeeded: LOADS_SUCCEEDED_TOTAL.load(Ordering::Relaxed),
        loads_failed: LOADS_FAILED_TOTAL.load(Ordering::Relaxed),
        records_inserted: RECORDS_INSERTED_TOTAL.load(Ordering::Relaxed),
        records_rejected: RECORDS_REJECTED_TOTAL.load(Ordering::Relaxed),
        orphaned_runs: ORPHANED_RUNS_TOTAL.load(Ordering::Relaxed),
    }
}

/// Records how long one load stage took.
pub fn record_stage_latency(run_id: i64, stage: &str, duration: Duration) {
    info!(
        metric = "load_stage_latency_ms",
        run_id,
        stage,
        latency_ms = duration_ms(duration)
    );
}

/// Records a finished load and bumps the load and record totals.
pub fn record_load_summary(
    run_id: i64,
    processed: u64,
    inserted: u64,
    rejected: u64,
    duration: Duration,
) {
    let loads = LOADS_SUCCEEDED_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    let inserted_total = RECORDS_INSERTED_TOTAL.fetch_add(inserted, Ordering::Relaxed) + inserted;
    info!(
        metric = "load_summary",
        run_id,
        processed,
        inserted,
        rejected,
        latency_ms = duration_ms(duration),
        loads_succeeded_total = loads,
        records_inserted_total = inserted_total
    );
}

/// Marks a failed load.
pub fn record_load_failure(run_id: i64, reason: &str) {
    let total = LOADS_FAILED_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    warn!(metric = "load_failure", run_id, reason, loads_failed_total = total);
}

/// Records one fact record that was not loaded.
pub fn record_rejected_record(run_id: i64, row: usize, reason: &str) {
    let total = RECORDS_REJECTED_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    warn!(
        metric = "record_rejected",
        run_id,
        row,
        reason,
        records_rejected_total = total
    );
}

/// Records a run left RUNNING because neither completion write succeeded.
pub fn record_run_orphaned(run_id: i64, error: &str) {
    let total = ORPHANED_RUNS_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    error!(metric = "run_orphaned", run_id, error, orphaned_runs_total = total);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_only_grow() {
        let before = totals();
        record_load_summary(1, 3, 2, 1, Duration::from_millis(5));
        record_rejected_record(1, 2, "missing customer id");
        record_run_orphaned(2, "connection reset");
        record_load_failure(3, "dimension resolution failed");

        let after = totals();
        assert!(after.loads_succeeded > before.loads_succeeded);
        assert!(after.records_inserted >= before.records_inserted + 2);
        assert!(after.records_rejected > before.records_rejected);
        assert!(after.orphaned_runs > before.orphaned_runs);
        assert!(after.loads_failed > before.loads_failed);
    }

    #[test]
    fn test_duration_in_milliseconds() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500.0);
    }
}
