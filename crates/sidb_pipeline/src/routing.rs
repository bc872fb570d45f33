//! Row-to-partition routing.

use crate::error::{to_hex, PipelineError, PipelineResult};
use crate::write::BulkWrites;
use bytes::Bytes;
use parking_lot::RwLock;
use sidb_core::{KvPair, TxnId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Locates the partition holding a row.
pub trait RegionCache: Send + Sync {
    /// Name of the partition of `table` holding `row`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoPartition`] if no partition covers the row.
    fn locate(&self, table: &str, row: &[u8]) -> PipelineResult<String>;

    /// Drops cached routing for `table`.
    fn invalidate(&self, table: &str);
}

/// Splits `pairs` into per-partition writes through `cache`, keeping the
/// submission order within each partition.
///
/// # Errors
///
/// Fails if a row cannot be located.
pub fn partition_rows(
    cache: &dyn RegionCache,
    table: &str,
    txn_id: TxnId,
    pairs: impl IntoIterator<Item = KvPair>,
) -> PipelineResult<BulkWrites> {
    let mut writes = BulkWrites::new(table, txn_id);
    for pair in pairs {
        let partition = cache.locate(table, &pair.row)?;
        writes.add(&partition, pair);
    }
    Ok(writes)
}

/// A routing table of split points per table.
///
/// Each table is a list of `(start_key, partition)` pairs; a row belongs to
/// the partition with the greatest start key not above it.
#[derive(Debug, Default)]
pub struct StaticRegionCache {
    tables: RwLock<HashMap<String, Vec<(Bytes, String)>>>,
    invalidations: AtomicU64,
}

impl StaticRegionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the split points of `table`.
    pub fn set_partitions(&self, table: impl Into<String>, splits: Vec<(Bytes, String)>) {
        let mut splits = splits;
        splits.sort_by(|a, b| a.0.cmp(&b.0));
        self.tables.write().insert(table.into(), splits);
    }

    /// Number of invalidations so far.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

impl RegionCache for StaticRegionCache {
    fn locate(&self, table: &str, row: &[u8]) -> PipelineResult<String> {
        let tables = self.tables.read();
        tables
            .get(table)
            .and_then(|splits| {
                splits
                    .iter()
                    .rev()
                    .find(|(start, _)| start.as_ref() <= row)
                    .map(|(_, name)| name.clone())
            })
            .ok_or_else(|| PipelineError::NoPartition {
                table: table.to_string(),
                row: to_hex(row),
            })
    }

    fn invalidate(&self, table: &str) {
        tracing::debug!(table, "invalidating routing cache");
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }
}
