//! Conflict and write engine statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! let transactor = Transactor::new(store.clone());
//! transactor.process_batch(&partition, txn_id, &column, &pairs, None)?;
//!
//! let stats = transactor.stats().snapshot();
//! println!("written: {}", stats.rows_written);
//! println!("conflicts: {}", stats.write_conflicts);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by the write engine.
///
/// All counters are atomic and can be read while batches are in flight.
#[derive(Debug, Default)]
pub struct WriteEngineStats {
    /// Batches processed.
    batches: AtomicU64,
    /// Rows written successfully.
    rows_written: AtomicU64,
    /// Rows skipped because their lock was busy.
    not_run: AtomicU64,
    /// Rows rejected with a write/write conflict.
    write_conflicts: AtomicU64,
    /// Rows that met an additive writer.
    additive_conflicts: AtomicU64,
    /// Rows rejected by a constraint checker.
    constraint_failures: AtomicU64,
    /// Child-conflict cleanups issued.
    child_cleanups: AtomicU64,
    /// Child-conflict cleanups that failed.
    cleanup_failures: AtomicU64,
}

impl WriteEngineStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self, rows: u64) {
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_not_run(&self) {
        self.not_run.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_conflict(&self) {
        self.write_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_additive_conflict(&self) {
        self.additive_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_constraint_failure(&self) {
        self.constraint_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_child_cleanup(&self, failed: bool) {
        self.child_cleanups.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    // === Getter methods (public API) ===

    /// Batches processed.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Rows written successfully.
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    /// Rows skipped because their lock was busy.
    pub fn not_run(&self) -> u64 {
        self.not_run.load(Ordering::Relaxed)
    }

    /// Rows rejected with a write/write conflict.
    pub fn write_conflicts(&self) -> u64 {
        self.write_conflicts.load(Ordering::Relaxed)
    }

    /// Rows that met an additive writer.
    pub fn additive_conflicts(&self) -> u64 {
        self.additive_conflicts.load(Ordering::Relaxed)
    }

    /// Rows rejected by a constraint checker.
    pub fn constraint_failures(&self) -> u64 {
        self.constraint_failures.load(Ordering::Relaxed)
    }

    /// Child-conflict cleanups issued.
    pub fn child_cleanups(&self) -> u64 {
        self.child_cleanups.load(Ordering::Relaxed)
    }

    /// Child-conflict cleanups that failed.
    pub fn cleanup_failures(&self) -> u64 {
        self.cleanup_failures.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> WriteEngineSnapshot {
        WriteEngineSnapshot {
            batches: self.batches(),
            rows_written: self.rows_written(),
            not_run: self.not_run(),
            write_conflicts: self.write_conflicts(),
            additive_conflicts: self.additive_conflicts(),
            constraint_failures: self.constraint_failures(),
            child_cleanups: self.child_cleanups(),
            cleanup_failures: self.cleanup_failures(),
        }
    }
}

/// A point-in-time copy of [`WriteEngineStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteEngineSnapshot {
    /// Batches processed.
    pub batches: u64,
    /// Rows written successfully.
    pub rows_written: u64,
    /// Rows skipped because their lock was busy.
    pub not_run: u64,
    /// Rows rejected with a write/write conflict.
    pub write_conflicts: u64,
    /// Rows that met an additive writer.
    pub additive_conflicts: u64,
    /// Rows rejected by a constraint checker.
    pub constraint_failures: u64,
    /// Child-conflict cleanups issued.
    pub child_cleanups: u64,
    /// Child-conflict cleanups that failed.
    pub cleanup_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = WriteEngineStats::new();
        assert_eq!(stats.snapshot(), WriteEngineSnapshot::default());
    }

    #[test]
    fn cleanup_failures_count_as_cleanups() {
        let stats = WriteEngineStats::new();
        stats.record_child_cleanup(false);
        stats.record_child_cleanup(true);
        assert_eq!(stats.child_cleanups(), 2);
        assert_eq!(stats.cleanup_failures(), 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(WriteEngineStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_written(2);
                        s.record_not_run();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.rows_written(), 1_600);
        assert_eq!(stats.not_run(), 800);
    }
}
