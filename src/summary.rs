//! Operation counters and the summary returned when an operation ends

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Live counters, shared by the dispatcher, jobs and the delivery drain
#[derive(Debug, Default)]
pub struct WalkStats {
    pub roots: AtomicU64,
    pub listings: AtomicU64,
    pub leaves_dispatched: AtomicU64,
    pub leaves_completed: AtomicU64,
    /// Items handed to the consumer callback
    pub delivered: AtomicU64,
    /// Items dropped because their job was already stopped
    pub discarded: AtomicU64,
    /// Records dropped by the query filter
    pub records_filtered: AtomicU64,
    pub bytes_transferred: AtomicU64,
    pub jobs_transferred: AtomicU64,
    pub jobs_skipped: AtomicU64,
    cancelled: AtomicBool,
    errors: Mutex<BTreeMap<&'static str, u64>>,
}

impl WalkStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: &'static str) {
        *self.errors.lock().entry(kind).or_insert(0) += 1;
    }

    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn snapshot(&self, elapsed: Duration) -> WalkSummary {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        WalkSummary {
            roots: load(&self.roots),
            listings: load(&self.listings),
            leaves_dispatched: load(&self.leaves_dispatched),
            leaves_completed: load(&self.leaves_completed),
            delivered: load(&self.delivered),
            discarded: load(&self.discarded),
            records_filtered: load(&self.records_filtered),
            bytes_transferred: load(&self.bytes_transferred),
            jobs_transferred: load(&self.jobs_transferred),
            jobs_skipped: load(&self.jobs_skipped),
            errors: self
                .errors
                .lock()
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// What an operation did, returned when it finishes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkSummary {
    pub roots: u64,
    pub listings: u64,
    pub leaves_dispatched: u64,
    pub leaves_completed: u64,
    pub delivered: u64,
    pub discarded: u64,
    pub records_filtered: u64,
    pub bytes_transferred: u64,
    pub jobs_transferred: u64,
    pub jobs_skipped: u64,
    /// Delivered errors by kind name
    pub errors: BTreeMap<String, u64>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl WalkSummary {
    pub fn total_errors(&self) -> u64 {
        self.errors.values().sum()
    }

    pub fn errors_of(&self, kind: &str) -> u64 {
        self.errors.get(kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = WalkStats::default();
        WalkStats::incr(&stats.leaves_dispatched);
        WalkStats::add(&stats.bytes_transferred, 512);
        stats.record_error("parse");
        stats.record_error("parse");
        stats.record_error("listing");
        stats.mark_cancelled();

        let summary = stats.snapshot(Duration::from_millis(1500));
        assert_eq!(summary.leaves_dispatched, 1);
        assert_eq!(summary.bytes_transferred, 512);
        assert_eq!(summary.errors_of("parse"), 2);
        assert_eq!(summary.errors_of("read"), 0);
        assert_eq!(summary.total_errors(), 3);
        assert!(summary.cancelled);
        assert_eq!(summary.elapsed_ms, 1500);
    }
}
