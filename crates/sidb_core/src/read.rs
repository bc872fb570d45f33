//! Snapshot reads and read resolution.
//!
//! A reader sees its own versions, its ancestors' versions, and versions of
//! other transactions its isolation level admits. The newest visible
//! tombstone hides every older user version; an anti-tombstone lifts it.
//!
//! While reading, versions whose owner has since finished are handed to a
//! [`ReadResolver`]: committed owners get a commit-timestamp cell, rolled
//! back owners lose their cells.

use crate::data::{cell_role, commit_timestamp_column, tombstone_column, Partition};
use crate::error::CoreResult;
use crate::txn::{TxnSupplier, TxnView};
use crate::types::IsolationLevel;
use bytes::Bytes;
use sidb_codec::{decode_timestamp, encode_timestamp, CellType, TxnState};
use sidb_storage::{Cell, Column, Delete, Put};
use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::{trace, warn};

/// Finalizes versions discovered during reads.
pub trait ReadResolver: Send + Sync + Debug {
    /// Records `commit_ts` for a version whose owner is effectively committed.
    fn resolve_committed(&self, partition: &dyn Partition, row: &[u8], version: u64, commit_ts: i64);

    /// Removes a version whose owner is effectively rolled back.
    fn resolve_rolled_back(&self, partition: &dyn Partition, row: &[u8], version: u64, columns: &[Column]);
}

/// Resolver that leaves versions alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpReadResolver;

impl ReadResolver for NoOpReadResolver {
    fn resolve_committed(&self, _: &dyn Partition, _: &[u8], _: u64, _: i64) {}

    fn resolve_rolled_back(&self, _: &dyn Partition, _: &[u8], _: u64, _: &[Column]) {}
}

/// Resolver that writes to the partition on the reading thread.
///
/// Failures are logged; the read itself never fails because of them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynchronousReadResolver;

impl ReadResolver for SynchronousReadResolver {
    fn resolve_committed(&self, partition: &dyn Partition, row: &[u8], version: u64, commit_ts: i64) {
        let put = Put::new(Bytes::copy_from_slice(row)).with_cell(
            commit_timestamp_column(),
            version,
            encode_timestamp(commit_ts),
        );
        match partition.put(&put) {
            Ok(()) => trace!(version, commit_ts, "rolled forward"),
            Err(e) => warn!(version, error = %e, "failed to write commit timestamp"),
        }
    }

    fn resolve_rolled_back(&self, partition: &dyn Partition, row: &[u8], version: u64, columns: &[Column]) {
        let mut delete = Delete::new(Bytes::copy_from_slice(row));
        for column in columns {
            delete.add_version(column.clone(), version);
        }
        match partition.delete(&delete) {
            Ok(()) => trace!(version, "removed rolled back version"),
            Err(e) => warn!(version, error = %e, "failed to remove rolled back version"),
        }
    }
}

/// Per-read memo of version owners.
struct Visibility<'a> {
    supplier: &'a dyn TxnSupplier,
    reader: &'a TxnView,
    owners: HashMap<u64, Arc<TxnView>>,
    commit_ts: HashMap<u64, i64>,
}

impl<'a> Visibility<'a> {
    fn new(supplier: &'a dyn TxnSupplier, reader: &'a TxnView, cells: &[Cell], user: &Column) -> Self {
        let commit_ts = cells
            .iter()
            .filter(|c| cell_role(c, user) == CellType::CommitTimestamp)
            .filter_map(|c| decode_timestamp(&c.value).ok().map(|ts| (c.version, ts)))
            .collect();
        Self {
            supplier,
            reader,
            owners: HashMap::new(),
            commit_ts,
        }
    }

    fn owner(&mut self, version: u64) -> CoreResult<Arc<TxnView>> {
        if let Some(view) = self.owners.get(&version) {
            return Ok(Arc::clone(view));
        }
        let view = self.supplier.get_transaction(version.into())?;
        self.owners.insert(version, Arc::clone(&view));
        Ok(view)
    }

    fn is_visible(&mut self, version: u64) -> CoreResult<bool> {
        if version == self.reader.id().as_u64() {
            return Ok(true);
        }
        if let Some(&ts) = self.commit_ts.get(&version) {
            if ts >= 0
                && self.reader.parent().is_none()
                && self.reader.isolation_level() == IsolationLevel::SnapshotIsolation
            {
                return Ok(ts < self.reader.begin_timestamp());
            }
        }
        let owner = self.owner(version)?;
        Ok(self.reader.can_see(&owner))
    }

    fn newest_visible<'c>(
        &mut self,
        cells: &'c [Cell],
        user: &Column,
        roles: &[CellType],
    ) -> CoreResult<Option<&'c Cell>> {
        let mut candidates: Vec<&Cell> = cells
            .iter()
            .filter(|c| roles.contains(&cell_role(c, user)))
            .collect();
        candidates.sort_by(|a, b| b.version.cmp(&a.version));
        for cell in candidates {
            if self.is_visible(cell.version)? {
                return Ok(Some(cell));
            }
        }
        Ok(None)
    }

    fn visible_user_cell<'c>(&mut self, cells: &'c [Cell], user: &Column) -> CoreResult<Option<&'c Cell>> {
        let tombstone = self.newest_visible(
            cells,
            user,
            &[CellType::Tombstone, CellType::AntiTombstone],
        )?;
        let data = self.newest_visible(cells, user, &[CellType::UserData])?;
        match (data, tombstone) {
            (Some(data), Some(tomb))
                if cell_role(tomb, user) == CellType::Tombstone && tomb.version >= data.version =>
            {
                Ok(None)
            }
            (data, _) => Ok(data),
        }
    }
}

/// Newest user cell of `cells` visible to `reader`, without resolution.
///
/// `cells` must hold every version of the user and tombstone columns.
///
/// # Errors
///
/// Returns an error if a version owner cannot be looked up.
pub fn visible_user_cell(
    supplier: &dyn TxnSupplier,
    reader: &TxnView,
    cells: &[Cell],
    user: &Column,
) -> CoreResult<Option<Cell>> {
    let mut visibility = Visibility::new(supplier, reader, cells, user);
    Ok(visibility.visible_user_cell(cells, user)?.cloned())
}

/// Reads rows as of a transaction's snapshot.
#[derive(Clone)]
pub struct SnapshotReader {
    supplier: Arc<dyn TxnSupplier>,
    resolver: Arc<dyn ReadResolver>,
}

impl fmt::Debug for SnapshotReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotReader")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl SnapshotReader {
    /// Creates a reader.
    pub fn new(supplier: Arc<dyn TxnSupplier>, resolver: Arc<dyn ReadResolver>) -> Self {
        Self { supplier, resolver }
    }

    /// Returns the user value of `row` visible to `reader`.
    ///
    /// Deleted rows and empty values read as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row or a version owner cannot be read.
    pub fn read(
        &self,
        partition: &dyn Partition,
        reader: &TxnView,
        row: &[u8],
        user: &Column,
    ) -> CoreResult<Option<Bytes>> {
        let columns = [user.clone(), tombstone_column(), commit_timestamp_column()];
        let cells = partition.get_versions(row, &columns)?;
        if cells.is_empty() {
            return Ok(None);
        }
        let mut visibility = Visibility::new(&*self.supplier, reader, &cells, user);
        self.resolve(partition, row, &columns, &cells, &mut visibility)?;
        Ok(visibility
            .visible_user_cell(&cells, user)?
            .map(|cell| cell.value.clone())
            .filter(|value| !value.is_empty()))
    }

    fn resolve(
        &self,
        partition: &dyn Partition,
        row: &[u8],
        columns: &[Column],
        cells: &[Cell],
        visibility: &mut Visibility<'_>,
    ) -> CoreResult<()> {
        let user = &columns[0];
        let versions: BTreeSet<u64> = cells
            .iter()
            .filter(|c| cell_role(c, user) != CellType::CommitTimestamp)
            .map(|c| c.version)
            .collect();
        for version in versions {
            if version == visibility.reader.id().as_u64() {
                continue;
            }
            if visibility.commit_ts.get(&version).is_some_and(|ts| *ts >= 0) {
                continue;
            }
            let owner = visibility.owner(version)?;
            match owner.effective_state() {
                TxnState::RolledBack => {
                    self.resolver.resolve_rolled_back(partition, row, version, columns);
                }
                TxnState::Committed => {
                    let ts = owner.effective_commit_timestamp();
                    self.resolver.resolve_committed(partition, row, version, ts);
                }
                TxnState::Active => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TxnConfig;
    use crate::data::{default_user_column, StorePartition};
    use crate::store::TxnStore;
    use crate::txn::TxnRecord;
    use crate::types::TxnId;
    use sidb_codec::{ANTI_TOMBSTONE_VALUE, TOMBSTONE_VALUE};
    use sidb_storage::MemoryStore;

    struct Fixture {
        store: Arc<TxnStore>,
        partition: StorePartition,
        memory: Arc<MemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(0));
            let store = Arc::new(TxnStore::in_memory(TxnConfig::new().bucket_count(2), clock).unwrap());
            let memory = Arc::new(MemoryStore::new("data"));
            Self {
                store,
                partition: StorePartition::new(memory.clone()),
                memory,
            }
        }

        fn begin(&self, id: u64) -> TxnId {
            let id = TxnId::new(id);
            self.store.record_transaction(&TxnRecord::new(id)).unwrap();
            id
        }

        fn write(&self, id: TxnId, column: Column, value: &'static [u8]) {
            let put = Put::new(&b"a"[..]).with_cell(column, id.as_u64(), value);
            self.partition.put(&put).unwrap();
        }

        fn reader(&self, resolver: Arc<dyn ReadResolver>) -> SnapshotReader {
            SnapshotReader::new(self.store.clone(), resolver)
        }

        fn read_as(&self, reader: &TxnView) -> Option<Bytes> {
            self.reader(Arc::new(NoOpReadResolver))
                .read(&self.partition, reader, b"a", &default_user_column())
                .unwrap()
        }
    }

    #[test]
    fn snapshot_sees_only_earlier_commits() {
        let fx = Fixture::new();
        let writer = fx.begin(100);
        fx.write(writer, default_user_column(), b"v1");
        assert_eq!(fx.read_as(&TxnView::read_only(TxnId::new(101), None)), None);

        fx.store.record_commit(writer, 105).unwrap();
        assert_eq!(
            fx.read_as(&TxnView::read_only(TxnId::new(106), None)),
            Some(Bytes::from_static(b"v1"))
        );
        assert_eq!(fx.read_as(&TxnView::read_only(TxnId::new(103), None)), None);
        let own = fx.store.find_transaction(writer).unwrap().unwrap();
        assert_eq!(fx.read_as(&own), Some(Bytes::from_static(b"v1")));
    }

    #[test]
    fn tombstones_hide_and_anti_tombstones_revive() {
        let fx = Fixture::new();
        let first = fx.begin(10);
        fx.write(first, default_user_column(), b"old");
        fx.store.record_commit(first, 11).unwrap();

        let deleter = fx.begin(13);
        fx.write(deleter, tombstone_column(), TOMBSTONE_VALUE);
        fx.store.record_commit(deleter, 14).unwrap();
        assert_eq!(fx.read_as(&TxnView::read_only(TxnId::new(15), None)), None);
        assert_eq!(
            fx.read_as(&TxnView::read_only(TxnId::new(12), None)),
            Some(Bytes::from_static(b"old"))
        );

        let inserter = fx.begin(16);
        fx.write(inserter, default_user_column(), b"new");
        fx.write(inserter, tombstone_column(), ANTI_TOMBSTONE_VALUE);
        fx.store.record_commit(inserter, 17).unwrap();
        assert_eq!(
            fx.read_as(&TxnView::read_only(TxnId::new(18), None)),
            Some(Bytes::from_static(b"new"))
        );
    }

    #[test]
    fn read_resolution_rolls_forward_and_cleans_up() {
        let fx = Fixture::new();
        let committed = fx.begin(20);
        fx.write(committed, default_user_column(), b"keep");
        fx.store.record_commit(committed, 21).unwrap();
        let aborted = fx.begin(22);
        fx.write(aborted, default_user_column(), b"drop");
        fx.store.record_rollback(aborted).unwrap();

        let reader = fx.reader(Arc::new(SynchronousReadResolver));
        let value = reader
            .read(
                &fx.partition,
                &TxnView::read_only(TxnId::new(30), None),
                b"a",
                &default_user_column(),
            )
            .unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"keep")));

        let cells = fx
            .partition
            .get_versions(b"a", &[default_user_column(), commit_timestamp_column()])
            .unwrap();
        let versions: Vec<(u64, bool)> = cells
            .iter()
            .map(|c| (c.version, c.column == commit_timestamp_column()))
            .collect();
        assert_eq!(versions, vec![(20, true), (20, false)]);
        assert_eq!(fx.memory.cell_count(), 2);
    }

    #[test]
    fn commit_timestamp_cells_short_circuit_lookups() {
        let fx = Fixture::new();
        // version 50 has no transaction record; its commit cell alone decides
        fx.write(TxnId::new(50), default_user_column(), b"x");
        fx.write(TxnId::new(50), commit_timestamp_column(), b"\0\0\0\0\0\0\0\x3c");
        assert_eq!(
            fx.read_as(&TxnView::read_only(TxnId::new(61), None)),
            Some(Bytes::from_static(b"x"))
        );
        assert_eq!(fx.read_as(&TxnView::read_only(TxnId::new(55), None)), None);
    }
}
