// =============================================================================
// Metrics — process-wide counters for the publish path
// =============================================================================
//
// A single injected handle (shared via `Arc`) carries both the per-publisher
// counters and the contract-level totals so tests can construct a fresh set
// per case instead of fighting global state. Mutation is lock-free.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::timefmt;

/// Seconds a closed bar may trail wall clock before it counts as late.
pub const DEFAULT_LATE_THRESHOLD_SECS: i64 = 3;

/// Thread-safe counter set shared across the engine, publisher, and health
/// reporter.
#[derive(Debug, Default)]
pub struct Metrics {
    // Per-publisher counters.
    published: AtomicU64,
    publish_fail: AtomicU64,
    dedup_hit: AtomicU64,

    // Contract totals surfaced in health records.
    bars_published_total: AtomicU64,
    schema_drop_total: AtomicU64,
    late_bars_total: AtomicU64,
}

/// Point-in-time copy of every counter, as embedded in health records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub publish_fail: u64,
    pub dedup_hit: u64,
    pub bars_published_total: u64,
    pub schema_drop_total: u64,
    pub late_bars_total: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A successful publish bumps both the instance counter and the total.
    pub fn inc_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.bars_published_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_publish_fail(&self) {
        self.publish_fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dedup_hit(&self) {
        self.dedup_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_schema_drop(&self) {
        self.schema_drop_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_late_bars(&self) {
        self.late_bars_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Compare `bar_end_ts` against the Asia/Shanghai wall clock and count
    /// the bar as late when the delta exceeds `threshold_secs`. Unparseable
    /// timestamps are ignored rather than polluting the counter.
    pub fn maybe_mark_late(&self, bar_end_ts: &str, threshold_secs: i64) {
        let value = serde_json::Value::String(bar_end_ts.to_string());
        if let Ok(end) = timefmt::parse_bar_end(&value) {
            let delta = timefmt::now_cn().signed_duration_since(end);
            if delta.num_seconds() > threshold_secs {
                self.inc_late_bars();
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_fail: self.publish_fail.load(Ordering::Relaxed),
            dedup_hit: self.dedup_hit.load(Ordering::Relaxed),
            bars_published_total: self.bars_published_total.load(Ordering::Relaxed),
            schema_drop_total: self.schema_drop_total.load(Ordering::Relaxed),
            late_bars_total: self.late_bars_total.load(Ordering::Relaxed),
        }
    }
}
