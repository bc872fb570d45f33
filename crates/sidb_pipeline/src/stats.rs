//! Pipeline statistics.
//!
//! [`WriteStats`] describes one finished bulk write. [`PipelineStatus`] is
//! shared by every write of a process and aggregates flush sizes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Statistics of one bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Rows submitted.
    pub rows_submitted: u64,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Attempts that were resubmissions.
    pub retries: u32,
    /// Errors raised by the invoker.
    pub global_errors: u32,
    /// Partition responses with failed rows.
    pub partial_failures: u32,
    /// Attempts rejected by a partition.
    pub rejected: u32,
    /// Time spent sleeping between attempts.
    pub sleep_time: Duration,
    /// Time spent inside the invoker.
    pub write_time: Duration,
}

/// Process-wide flush counters.
#[derive(Debug)]
pub struct PipelineStatus {
    executing_flushes: AtomicU64,
    completed_flushes: AtomicU64,
    total_flush_entries: AtomicU64,
    min_flush_entries: AtomicU64,
    max_flush_entries: AtomicU64,
    total_flush_regions: AtomicU64,
    min_flush_regions: AtomicU64,
    max_flush_regions: AtomicU64,
    total_flush_bytes: AtomicU64,
    min_flush_bytes: AtomicU64,
    max_flush_bytes: AtomicU64,
    rejected_count: AtomicU64,
    total_flush_time_ms: AtomicU64,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            executing_flushes: AtomicU64::new(0),
            completed_flushes: AtomicU64::new(0),
            total_flush_entries: AtomicU64::new(0),
            min_flush_entries: AtomicU64::new(u64::MAX),
            max_flush_entries: AtomicU64::new(0),
            total_flush_regions: AtomicU64::new(0),
            min_flush_regions: AtomicU64::new(u64::MAX),
            max_flush_regions: AtomicU64::new(0),
            total_flush_bytes: AtomicU64::new(0),
            min_flush_bytes: AtomicU64::new(u64::MAX),
            max_flush_bytes: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            total_flush_time_ms: AtomicU64::new(0),
        }
    }
}

fn min_or_zero(value: &AtomicU64) -> u64 {
    match value.load(Ordering::Relaxed) {
        u64::MAX => 0,
        v => v,
    }
}

impl PipelineStatus {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_start(&self, entries: u64, regions: u64, bytes: u64) {
        self.executing_flushes.fetch_add(1, Ordering::Relaxed);
        self.total_flush_entries.fetch_add(entries, Ordering::Relaxed);
        self.min_flush_entries.fetch_min(entries, Ordering::Relaxed);
        self.max_flush_entries.fetch_max(entries, Ordering::Relaxed);
        self.total_flush_regions.fetch_add(regions, Ordering::Relaxed);
        self.min_flush_regions.fetch_min(regions, Ordering::Relaxed);
        self.max_flush_regions.fetch_max(regions, Ordering::Relaxed);
        self.total_flush_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.min_flush_bytes.fetch_min(bytes, Ordering::Relaxed);
        self.max_flush_bytes.fetch_max(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_complete(&self, elapsed: Duration) {
        self.executing_flushes.fetch_sub(1, Ordering::Relaxed);
        self.completed_flushes.fetch_add(1, Ordering::Relaxed);
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.total_flush_time_ms.fetch_add(ms, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Writes in flight.
    pub fn executing_flushes(&self) -> u64 {
        self.executing_flushes.load(Ordering::Relaxed)
    }

    /// Writes finished, successfully or not.
    pub fn completed_flushes(&self) -> u64 {
        self.completed_flushes.load(Ordering::Relaxed)
    }

    /// Rows across all writes.
    pub fn total_flush_entries(&self) -> u64 {
        self.total_flush_entries.load(Ordering::Relaxed)
    }

    /// Smallest write, in rows.
    pub fn min_flush_entries(&self) -> u64 {
        min_or_zero(&self.min_flush_entries)
    }

    /// Largest write, in rows.
    pub fn max_flush_entries(&self) -> u64 {
        self.max_flush_entries.load(Ordering::Relaxed)
    }

    /// Partitions addressed across all writes.
    pub fn total_flush_regions(&self) -> u64 {
        self.total_flush_regions.load(Ordering::Relaxed)
    }

    /// Fewest partitions addressed by one write.
    pub fn min_flush_regions(&self) -> u64 {
        min_or_zero(&self.min_flush_regions)
    }

    /// Most partitions addressed by one write.
    pub fn max_flush_regions(&self) -> u64 {
        self.max_flush_regions.load(Ordering::Relaxed)
    }

    /// Payload bytes across all writes.
    pub fn total_flush_bytes(&self) -> u64 {
        self.total_flush_bytes.load(Ordering::Relaxed)
    }

    /// Smallest write, in bytes.
    pub fn min_flush_bytes(&self) -> u64 {
        min_or_zero(&self.min_flush_bytes)
    }

    /// Largest write, in bytes.
    pub fn max_flush_bytes(&self) -> u64 {
        self.max_flush_bytes.load(Ordering::Relaxed)
    }

    /// Rejected attempts across all writes.
    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    /// Wall time spent in writes, in milliseconds.
    pub fn total_flush_time_ms(&self) -> u64 {
        self.total_flush_time_ms.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_status_reports_zero_minimums() {
        let status = PipelineStatus::new();
        assert_eq!(status.min_flush_entries(), 0);
        assert_eq!(status.min_flush_bytes(), 0);
        assert_eq!(status.executing_flushes(), 0);
    }

    #[test]
    fn flush_sizes_track_extremes() {
        let status = PipelineStatus::new();
        status.record_start(10, 2, 100);
        status.record_start(3, 1, 40);
        assert_eq!(status.executing_flushes(), 2);
        assert_eq!(status.total_flush_entries(), 13);
        assert_eq!(status.min_flush_entries(), 3);
        assert_eq!(status.max_flush_entries(), 10);
        assert_eq!(status.min_flush_regions(), 1);
        assert_eq!(status.max_flush_bytes(), 100);
        status.record_complete(Duration::from_millis(7));
        status.record_complete(Duration::from_millis(5));
        assert_eq!(status.executing_flushes(), 0);
        assert_eq!(status.completed_flushes(), 2);
        assert_eq!(status.total_flush_time_ms(), 12);
    }
}
