//! In-memory row store.

use crate::backend::{FilterAction, RowGuard, RowLockTable, RowOutcome, RowStore, ScanFilter, ScannedRow};
use crate::cell::{Cell, Column, Delete, KeyRange, Put};
use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

type Versions = BTreeMap<Reverse<u64>, Bytes>;
type RowCells = BTreeMap<Column, Versions>;

/// An in-memory row store.
///
/// This store keeps every version of every cell in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Single-process deployments that don't need persistence
///
/// # Thread Safety
///
/// Reads share a read lock, writes take the write lock for the duration of
/// one put or one batch. Row locks live in a separate [`RowLockTable`].
///
/// # Example
///
/// ```rust
/// use sidb_storage::{Column, MemoryStore, Put, RowStore};
///
/// let store = MemoryStore::new("users");
/// let col = Column::new("V", "7");
/// store.put(&Put::new("k").with_cell(col.clone(), 10, "v1")).unwrap();
/// let cells = store.get(b"k", &[col], 1).unwrap();
/// assert_eq!(cells[0].value.as_ref(), b"v1");
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    range: KeyRange,
    rows: RwLock<BTreeMap<Bytes, RowCells>>,
    locks: RowLockTable,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates a store owning the whole key space.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_range(name, KeyRange::full())
    }

    /// Creates a store owning `range`.
    pub fn with_range(name: impl Into<String>, range: KeyRange) -> Self {
        Self {
            name: name.into(),
            range,
            rows: RwLock::new(BTreeMap::new()),
            locks: RowLockTable::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the row lock table.
    #[must_use]
    pub fn locks(&self) -> &RowLockTable {
        &self.locks
    }

    /// Number of rows holding at least one cell.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Number of stored cell versions.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.rows
            .read()
            .values()
            .flat_map(|cols| cols.values())
            .map(BTreeMap::len)
            .sum()
    }

    /// Rejects all further operations.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn check_row(&self, row: &[u8]) -> StorageResult<()> {
        self.check_open()?;
        if !self.range.contains(row) {
            return Err(StorageError::wrong_partition(&self.name, row));
        }
        Ok(())
    }

    fn apply_put(rows: &mut BTreeMap<Bytes, RowCells>, put: &Put) {
        if put.cells.is_empty() {
            return;
        }
        let row = rows.entry(put.row.clone()).or_default();
        for (column, version, value) in &put.cells {
            row.entry(column.clone())
                .or_default()
                .insert(Reverse(*version), value.clone());
        }
    }
}

impl RowStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_range(&self) -> &KeyRange {
        &self.range
    }

    fn get(&self, row: &[u8], columns: &[Column], max_versions: usize) -> StorageResult<Vec<Cell>> {
        self.check_row(row)?;
        let rows = self.rows.read();
        let Some(cells) = rows.get(row) else {
            return Ok(Vec::new());
        };
        let row_key = Bytes::copy_from_slice(row);
        let mut out = Vec::new();
        for (column, versions) in cells {
            if !columns.is_empty() && !columns.contains(column) {
                continue;
            }
            for (Reverse(version), value) in versions.iter().take(max_versions) {
                out.push(Cell::new(row_key.clone(), column.clone(), *version, value.clone()));
            }
        }
        Ok(out)
    }

    fn put(&self, put: &Put) -> StorageResult<()> {
        self.check_row(&put.row)?;
        Self::apply_put(&mut self.rows.write(), put);
        Ok(())
    }

    fn batch_put(&self, puts: &[Put]) -> StorageResult<Vec<RowOutcome>> {
        self.check_open()?;
        let mut rows = self.rows.write();
        let outcomes = puts
            .iter()
            .map(|put| match self.check_row(&put.row) {
                Ok(()) => {
                    Self::apply_put(&mut rows, put);
                    RowOutcome::Applied
                }
                Err(e) => RowOutcome::Failed(e.to_string()),
            })
            .collect();
        Ok(outcomes)
    }

    fn delete(&self, delete: &Delete) -> StorageResult<()> {
        self.check_row(&delete.row)?;
        let mut rows = self.rows.write();
        let Some(cells) = rows.get_mut(&delete.row) else {
            return Ok(());
        };
        for (column, version) in &delete.versions {
            if let Some(versions) = cells.get_mut(column) {
                versions.remove(&Reverse(*version));
                if versions.is_empty() {
                    cells.remove(column);
                }
            }
        }
        if cells.is_empty() {
            rows.remove(&delete.row);
        }
        Ok(())
    }

    fn increment(&self, row: &[u8], column: &Column, delta: i64) -> StorageResult<i64> {
        self.check_row(row)?;
        let mut rows = self.rows.write();
        let versions = rows
            .entry(Bytes::copy_from_slice(row))
            .or_default()
            .entry(column.clone())
            .or_default();
        let current = match versions.get(&Reverse(0)) {
            None => 0,
            Some(value) => {
                let raw: [u8; 8] = value
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::InvalidIncrement { len: value.len() })?;
                i64::from_be_bytes(raw)
            }
        };
        let next = current.wrapping_add(delta);
        versions.insert(Reverse(0), Bytes::copy_from_slice(&next.to_be_bytes()));
        Ok(next)
    }

    fn scan(
        &self,
        start: &[u8],
        stop: &[u8],
        filter: &mut dyn ScanFilter,
    ) -> StorageResult<Vec<ScannedRow>> {
        self.check_open()?;
        let Some(bounds) = self.range.clip(start, stop) else {
            return Ok(Vec::new());
        };
        let upper = if bounds.end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(bounds.end.as_ref())
        };
        let rows = self.rows.read();
        let mut out = Vec::new();
        for (row, cells) in rows.range::<[u8], _>((Bound::Included(bounds.start.as_ref()), upper)) {
            filter.reset();
            if filter.filter_row_key(row) {
                continue;
            }
            let mut kept = Vec::new();
            for (column, versions) in cells {
                let Some((Reverse(version), value)) = versions.iter().next() else {
                    continue;
                };
                let cell = Cell::new(row.clone(), column.clone(), *version, value.clone());
                match filter.filter_cell(&cell) {
                    FilterAction::Include => kept.push(cell),
                    FilterAction::Skip => {}
                    FilterAction::NextRow => break,
                }
            }
            if filter.filter_row() {
                continue;
            }
            out.push(ScannedRow {
                row: row.clone(),
                cells: kept,
            });
        }
        Ok(out)
    }

    fn try_lock_row(&self, row: &[u8]) -> StorageResult<Option<RowGuard>> {
        self.check_row(row)?;
        Ok(self.locks.try_lock(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AllRows;
    use proptest::prelude::*;

    fn data() -> Column {
        Column::new("V", "7")
    }

    fn tombstone() -> Column {
        Column::new("V", "1")
    }

    #[test]
    fn memory_new_is_empty() {
        let store = MemoryStore::new("t");
        assert_eq!(store.row_count(), 0);
        assert_eq!(store.cell_count(), 0);
        assert!(store.get(b"missing", &[], 1).unwrap().is_empty());
    }

    #[test]
    fn get_returns_newest_versions_first() {
        let store = MemoryStore::new("t");
        store.put(&Put::new("k").with_cell(data(), 5, "old")).unwrap();
        store.put(&Put::new("k").with_cell(data(), 9, "new")).unwrap();

        let latest = store.get(b"k", &[data()], 1).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version, 9);
        assert_eq!(latest[0].value.as_ref(), b"new");

        let all = store.get(b"k", &[data()], usize::MAX).unwrap();
        let versions: Vec<u64> = all.iter().map(|c| c.version).collect();
        assert_eq!(versions, vec![9, 5]);
    }

    #[test]
    fn get_filters_columns() {
        let store = MemoryStore::new("t");
        store
            .put(
                &Put::new("k")
                    .with_cell(data(), 5, "v")
                    .with_cell(tombstone(), 6, ""),
            )
            .unwrap();
        let cells = store.get(b"k", &[tombstone()], 1).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].column, tombstone());
        assert_eq!(store.get(b"k", &[], 1).unwrap().len(), 2);
    }

    #[test]
    fn delete_removes_exact_versions() {
        let store = MemoryStore::new("t");
        store
            .put(&Put::new("k").with_cell(data(), 5, "a").with_cell(data(), 6, "b"))
            .unwrap();
        let mut delete = Delete::new("k");
        delete.add_version(data(), 6);
        delete.add_version(tombstone(), 6);
        store.delete(&delete).unwrap();

        let cells = store.get(b"k", &[], usize::MAX).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].version, 5);

        let mut delete = Delete::new("k");
        delete.add_version(data(), 5);
        store.delete(&delete).unwrap();
        assert_eq!(store.row_count(), 0);
    }

    #[test]
    fn increment_starts_at_zero() {
        let store = MemoryStore::new("t");
        let fk = Column::new("V", "6");
        assert_eq!(store.increment(b"p", &fk, 7).unwrap(), 7);
        assert_eq!(store.increment(b"p", &fk, 3).unwrap(), 10);
        let cells = store.get(b"p", &[fk], 1).unwrap();
        assert_eq!(cells[0].value.as_ref(), &10i64.to_be_bytes());
    }

    #[test]
    fn increment_rejects_non_counter_values() {
        let store = MemoryStore::new("t");
        store.put(&Put::new("p").with_cell(data(), 0, "abc")).unwrap();
        let err = store.increment(b"p", &data(), 1).unwrap_err();
        assert!(matches!(err, StorageError::InvalidIncrement { len: 3 }));
    }

    #[test]
    fn rows_outside_range_are_rejected() {
        let store = MemoryStore::with_range("b1", KeyRange::new(vec![1u8], vec![2u8]));
        let err = store.put(&Put::new(vec![3u8]).with_cell(data(), 1, "x")).unwrap_err();
        assert!(matches!(err, StorageError::WrongPartition { .. }));
        assert!(store.try_lock_row(&[3u8]).is_err());

        let outcomes = store
            .batch_put(&[
                Put::new(vec![1u8, 0]).with_cell(data(), 1, "in"),
                Put::new(vec![5u8]).with_cell(data(), 1, "out"),
            ])
            .unwrap();
        assert!(outcomes[0].is_applied());
        assert!(!outcomes[1].is_applied());
    }

    #[test]
    fn closed_store_rejects_operations() {
        let store = MemoryStore::new("t");
        store.close();
        assert!(matches!(store.get(b"k", &[], 1), Err(StorageError::Closed)));
        assert!(matches!(store.scan(b"", b"", &mut AllRows), Err(StorageError::Closed)));
    }

    #[test]
    fn scan_respects_bounds_and_filter() {
        struct SkipKeyB;
        impl ScanFilter for SkipKeyB {
            fn filter_row_key(&mut self, row: &[u8]) -> bool {
                row == b"b"
            }
        }

        let store = MemoryStore::new("t");
        for key in ["a", "b", "c", "d"] {
            store.put(&Put::new(key).with_cell(data(), 1, key)).unwrap();
        }
        let rows = store.scan(b"a", b"d", &mut SkipKeyB).unwrap();
        let keys: Vec<&[u8]> = rows.iter().map(|r| r.row.as_ref()).collect();
        assert_eq!(keys, vec![&b"a"[..], &b"c"[..]]);
    }

    #[test]
    fn scan_stops_row_on_next_row() {
        struct StopAtTombstone {
            excluded: bool,
        }
        impl ScanFilter for StopAtTombstone {
            fn reset(&mut self) {
                self.excluded = false;
            }
            fn filter_cell(&mut self, cell: &Cell) -> FilterAction {
                if cell.qualifier() == b"1" {
                    self.excluded = true;
                    FilterAction::NextRow
                } else {
                    FilterAction::Include
                }
            }
            fn filter_row(&mut self) -> bool {
                self.excluded
            }
        }

        let store = MemoryStore::new("t");
        store.put(&Put::new("live").with_cell(data(), 1, "x")).unwrap();
        store
            .put(&Put::new("dead").with_cell(data(), 1, "x").with_cell(tombstone(), 2, ""))
            .unwrap();
        let rows = store
            .scan(b"", b"", &mut StopAtTombstone { excluded: false })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row.as_ref(), b"live");
    }

    #[test]
    fn try_lock_row_is_non_blocking() {
        let store = MemoryStore::new("t");
        let guard = store.try_lock_row(b"k").unwrap();
        assert!(guard.is_some());
        assert!(store.try_lock_row(b"k").unwrap().is_none());
        drop(guard);
        assert!(store.try_lock_row(b"k").unwrap().is_some());
    }

    proptest! {
        #[test]
        fn latest_version_is_maximum(versions in proptest::collection::vec(1u64..1000, 1..20)) {
            let store = MemoryStore::new("t");
            for v in &versions {
                store.put(&Put::new("k").with_cell(data(), *v, v.to_string())).unwrap();
            }
            let latest = store.get(b"k", &[data()], 1).unwrap();
            let max = *versions.iter().max().unwrap();
            prop_assert_eq!(latest[0].version, max);
        }
    }
}
