//! Pipeline counters
//!
//! Lock-free counters shared by the ingest path and every writer task.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    ticks_accepted: AtomicU64,
    duplicates: AtomicU64,
    unrouted: AtomicU64,
    malformed: AtomicU64,
    late_drops: AtomicU64,
    revised_bars: AtomicU64,
    queue_drops: AtomicU64,
    bars_closed: AtomicU64,
    store_failures: AtomicU64,
    store_retries: AtomicU64,
    pending_drops: AtomicU64,
    disconnects: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ticks_accepted: u64,
    pub duplicates: u64,
    /// Ticks for symbols that are not tracked
    pub unrouted: u64,
    pub malformed: u64,
    pub late_drops: u64,
    pub revised_bars: u64,
    /// Ticks overwritten in a full per-symbol queue
    pub queue_drops: u64,
    pub bars_closed: u64,
    pub store_failures: u64,
    pub store_retries: u64,
    /// Unwritten bars discarded to keep the retry queue bounded
    pub pending_drops: u64,
    pub disconnects: u64,
}

fn add(counter: &AtomicU64, delta: u64) {
    if delta > 0 {
        counter.fetch_add(delta, Ordering::Relaxed);
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        add(&self.ticks_accepted, 1);
    }

    pub fn record_duplicate(&self) {
        add(&self.duplicates, 1);
    }

    pub fn record_unrouted(&self) {
        add(&self.unrouted, 1);
    }

    pub fn record_malformed(&self) {
        add(&self.malformed, 1);
    }

    pub fn record_late_drops(&self, count: u64) {
        add(&self.late_drops, count);
    }

    pub fn record_revised(&self, count: u64) {
        add(&self.revised_bars, count);
    }

    pub fn record_queue_drops(&self, count: u64) {
        add(&self.queue_drops, count);
    }

    pub fn record_closed(&self, count: u64) {
        add(&self.bars_closed, count);
    }

    pub fn record_store_failure(&self) {
        add(&self.store_failures, 1);
    }

    pub fn record_store_retry(&self) {
        add(&self.store_retries, 1);
    }

    pub fn record_pending_drop(&self) {
        add(&self.pending_drops, 1);
    }

    pub fn record_disconnect(&self) {
        add(&self.disconnects, 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            ticks_accepted: load(&self.ticks_accepted),
            duplicates: load(&self.duplicates),
            unrouted: load(&self.unrouted),
            malformed: load(&self.malformed),
            late_drops: load(&self.late_drops),
            revised_bars: load(&self.revised_bars),
            queue_drops: load(&self.queue_drops),
            bars_closed: load(&self.bars_closed),
            store_failures: load(&self.store_failures),
            store_retries: load(&self.store_retries),
            pending_drops: load(&self.pending_drops),
            disconnects: load(&self.disconnects),
        }
    }
}
