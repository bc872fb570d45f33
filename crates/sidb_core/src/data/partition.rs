//! Capability interface of one data-table partition.

use crate::data::columns::fk_counter_column;
use crate::error::CoreResult;
use sidb_storage::{Cell, Column, Delete, Put, RowGuard, RowOutcome, RowStore};
use std::fmt;
use std::sync::Arc;

/// What the conflict engine and readers need from a partition.
pub trait Partition: Send + Sync {
    /// Partition name.
    fn name(&self) -> &str;

    /// Returns true if `row` belongs to this partition.
    fn contains_row(&self, row: &[u8]) -> bool;

    /// Newest version of every column of `row`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read.
    fn get_latest(&self, row: &[u8]) -> CoreResult<Vec<Cell>>;

    /// Every version of `columns` on `row`, newest first per column.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read.
    fn get_versions(&self, row: &[u8], columns: &[Column]) -> CoreResult<Vec<Cell>>;

    /// Takes the row lock without blocking. `None` if it is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is outside the partition.
    fn try_row_lock(&self, row: &[u8]) -> CoreResult<Option<RowGuard>>;

    /// Writes puts as one batch, one outcome per put.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch as a whole fails.
    fn write_batch(&self, puts: &[Put]) -> CoreResult<Vec<RowOutcome>>;

    /// Writes a single put.
    ///
    /// # Errors
    ///
    /// Returns an error if the put fails.
    fn put(&self, put: &Put) -> CoreResult<()>;

    /// Removes exact cell versions.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&self, delete: &Delete) -> CoreResult<()>;

    /// Adds `delta` to a counter cell, returning the new value.
    ///
    /// # Errors
    ///
    /// Returns an error if the cell is not a counter.
    fn increment(&self, row: &[u8], column: &Column, delta: i64) -> CoreResult<i64>;

    /// Current foreign-key counter of `row`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read or the counter is malformed.
    fn get_fk_counter(&self, row: &[u8]) -> CoreResult<Option<i64>>;
}

/// [`Partition`] over a [`RowStore`].
#[derive(Clone)]
pub struct StorePartition {
    store: Arc<dyn RowStore>,
}

impl StorePartition {
    /// Wraps a row store.
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    /// The wrapped store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }
}

impl fmt::Debug for StorePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorePartition")
            .field("name", &self.store.name())
            .finish()
    }
}

impl Partition for StorePartition {
    fn name(&self) -> &str {
        self.store.name()
    }

    fn contains_row(&self, row: &[u8]) -> bool {
        self.store.key_range().contains(row)
    }

    fn get_latest(&self, row: &[u8]) -> CoreResult<Vec<Cell>> {
        Ok(self.store.get(row, &[], 1)?)
    }

    fn get_versions(&self, row: &[u8], columns: &[Column]) -> CoreResult<Vec<Cell>> {
        Ok(self.store.get(row, columns, usize::MAX)?)
    }

    fn try_row_lock(&self, row: &[u8]) -> CoreResult<Option<RowGuard>> {
        Ok(self.store.try_lock_row(row)?)
    }

    fn write_batch(&self, puts: &[Put]) -> CoreResult<Vec<RowOutcome>> {
        Ok(self.store.batch_put(puts)?)
    }

    fn put(&self, put: &Put) -> CoreResult<()> {
        Ok(self.store.put(put)?)
    }

    fn delete(&self, delete: &Delete) -> CoreResult<()> {
        Ok(self.store.delete(delete)?)
    }

    fn increment(&self, row: &[u8], column: &Column, delta: i64) -> CoreResult<i64> {
        Ok(self.store.increment(row, column, delta)?)
    }

    fn get_fk_counter(&self, row: &[u8]) -> CoreResult<Option<i64>> {
        let cells = self.store.get(row, &[fk_counter_column()], 1)?;
        let Some(cell) = cells.first() else {
            return Ok(None);
        };
        let raw: [u8; 8] = cell.value.as_ref().try_into().map_err(|_| {
            sidb_storage::StorageError::InvalidIncrement {
                len: cell.value.len(),
            }
        })?;
        Ok(Some(i64::from_be_bytes(raw)))
    }
}
