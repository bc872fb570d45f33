//! Row store trait definition.

use crate::cell::{Cell, Column, Delete, KeyRange, Put};
use crate::error::StorageResult;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A partition of a versioned key-value table.
///
/// Row stores are **opaque cell stores**. They know rows, columns and
/// versions, but nothing about transactions: version numbers, tombstones and
/// commit markers are interpreted by the layers above.
///
/// # Invariants
///
/// - Every row handled by a store lies inside its [`key_range`](Self::key_range)
/// - A single [`put`](Self::put) is applied atomically with respect to readers
/// - A [`batch_put`](Self::batch_put) is applied under one write section, with
///   one outcome per put
/// - [`try_lock_row`](Self::try_lock_row) never blocks
/// - Stores must be `Send + Sync` for concurrent access
pub trait RowStore: Send + Sync {
    /// Returns the partition name.
    fn name(&self) -> &str;

    /// Returns the row-key range owned by this partition.
    fn key_range(&self) -> &KeyRange;

    /// Reads cells of `row`.
    ///
    /// Only `columns` are returned, or every column if `columns` is empty.
    /// At most `max_versions` versions per column are returned, newest first.
    /// Cells are sorted by column.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is outside this partition.
    fn get(&self, row: &[u8], columns: &[Column], max_versions: usize) -> StorageResult<Vec<Cell>>;

    /// Writes all cells of `put` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is outside this partition.
    fn put(&self, put: &Put) -> StorageResult<()>;

    /// Writes a batch of puts, returning one outcome per put in input order.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store as a whole cannot accept writes.
    fn batch_put(&self, puts: &[Put]) -> StorageResult<Vec<RowOutcome>>;

    /// Removes the exact cell versions addressed by `delete`.
    ///
    /// Missing versions are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is outside this partition.
    fn delete(&self, delete: &Delete) -> StorageResult<()>;

    /// Atomically adds `delta` to the 8-byte big-endian counter at
    /// `(row, column)` and returns the new value. A missing cell counts as 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not 8 bytes long.
    fn increment(&self, row: &[u8], column: &Column, delta: i64) -> StorageResult<i64>;

    /// Scans rows in `[start, stop)` intersected with the partition range.
    ///
    /// An empty `stop` is unbounded. The newest version of each column is
    /// offered to `filter` in column order. Rows the filter excludes are not
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn scan(&self, start: &[u8], stop: &[u8], filter: &mut dyn ScanFilter)
        -> StorageResult<Vec<ScannedRow>>;

    /// Attempts to take the exclusive lock for `row` without blocking.
    ///
    /// Returns `None` if another holder owns the lock. The lock is released
    /// when the returned guard is dropped. Locks are not reentrant.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is outside this partition.
    fn try_lock_row(&self, row: &[u8]) -> StorageResult<Option<RowGuard>>;
}

/// Outcome of one put inside a [`RowStore::batch_put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// The put was applied.
    Applied,
    /// The put was rejected with a reason.
    Failed(String),
}

impl RowOutcome {
    /// Returns true if the put was applied.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, RowOutcome::Applied)
    }
}

/// A row returned from a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRow {
    /// Row key.
    pub row: Bytes,
    /// Cells the filter included, in column order.
    pub cells: Vec<Cell>,
}

/// What a [`ScanFilter`] wants done with a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Keep the cell and continue with the row.
    Include,
    /// Drop the cell and continue with the row.
    Skip,
    /// Drop the cell and stop reading this row.
    NextRow,
}

/// Per-row streaming filter applied during [`RowStore::scan`].
///
/// For every row the store calls [`reset`](Self::reset), then
/// [`filter_row_key`](Self::filter_row_key), then
/// [`filter_cell`](Self::filter_cell) for each cell until it returns
/// [`FilterAction::NextRow`], and finally [`filter_row`](Self::filter_row).
pub trait ScanFilter {
    /// Clears per-row state before a new row.
    fn reset(&mut self) {}

    /// Returns true to exclude the row based on its key alone.
    fn filter_row_key(&mut self, _row: &[u8]) -> bool {
        false
    }

    /// Classifies a single cell.
    fn filter_cell(&mut self, _cell: &Cell) -> FilterAction {
        FilterAction::Include
    }

    /// Returns true to exclude the row after all its cells were seen.
    fn filter_row(&mut self) -> bool {
        false
    }
}

/// A filter that includes everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllRows;

impl ScanFilter for AllRows {}

/// Non-blocking per-row lock table.
///
/// Shared between a store and the guards it hands out.
#[derive(Debug, Default, Clone)]
pub struct RowLockTable {
    held: Arc<Mutex<HashSet<Bytes>>>,
}

impl RowLockTable {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock for `row` if nobody holds it.
    #[must_use]
    pub fn try_lock(&self, row: &[u8]) -> Option<RowGuard> {
        let key = Bytes::copy_from_slice(row);
        let mut held = self.held.lock();
        if !held.insert(key.clone()) {
            return None;
        }
        Some(RowGuard {
            row: key,
            held: Arc::clone(&self.held),
        })
    }

    /// Returns true if `row` is currently locked.
    #[must_use]
    pub fn is_locked(&self, row: &[u8]) -> bool {
        self.held.lock().contains(row)
    }

    /// Number of rows currently locked.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

/// Exclusive hold on one row. Released on drop.
pub struct RowGuard {
    row: Bytes,
    held: Arc<Mutex<HashSet<Bytes>>>,
}

impl RowGuard {
    /// The locked row key.
    #[must_use]
    pub fn row(&self) -> &Bytes {
        &self.row
    }
}

impl fmt::Debug for RowGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowGuard").field("row", &self.row).finish()
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.row);
    }
}
