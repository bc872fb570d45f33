//! Write/write conflict detection against the newest versions of a row.

use crate::data::{KvType, LatestRow};
use crate::error::{CoreError, CoreResult};
use crate::txn::{ConflictType, TxnSupplier, TxnView};
use crate::types::TxnId;
use sidb_codec::{decode_timestamp, ANTI_TOMBSTONE_VALUE};
use sidb_storage::Cell;
use std::collections::BTreeSet;
use tracing::trace;

/// What a write must do about the versions it will shadow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictResults {
    /// Descendant transactions whose versions of the row are deleted after
    /// the write lands.
    pub children: BTreeSet<TxnId>,
    /// Additive writers met on the row.
    pub additive: BTreeSet<TxnId>,
    /// The newest tombstone is live for the writer, so the write needs an
    /// anti-tombstone.
    pub has_tombstone: bool,
}

impl ConflictResults {
    /// Returns true if any additive writer was met.
    #[must_use]
    pub fn has_additive_conflicts(&self) -> bool {
        !self.additive.is_empty()
    }

    fn classify(&mut self, txn: &TxnView, owner: &TxnView) -> CoreResult<()> {
        match txn.conflicts(owner) {
            ConflictType::None => {}
            ConflictType::Child => {
                self.children.insert(owner.id());
            }
            ConflictType::Additive => {
                self.additive.insert(owner.id());
            }
            ConflictType::Sibling => {
                trace!(txn_id = %txn.id(), existing = %owner.id(), "sibling conflict");
                return Err(CoreError::write_conflict(owner.id(), txn.id()));
            }
        }
        Ok(())
    }
}

/// Checks that `txn` may write over `row`.
///
/// # Errors
///
/// Returns [`CoreError::WriteConflict`] if an unrelated transaction wrote the
/// row after `txn` began or is still writing it. Other errors come from
/// looking up version owners.
pub fn ensure_no_write_conflict(
    supplier: &dyn TxnSupplier,
    txn: &TxnView,
    kind: KvType,
    row: &LatestRow,
) -> CoreResult<ConflictResults> {
    let mut results = ConflictResults::default();
    if let Some(cell) = &row.commit_timestamp {
        check_commit_timestamp(supplier, txn, cell, &mut results)?;
    }
    if let Some(cell) = &row.tombstone {
        check_owner(supplier, txn, cell.version, &mut results)?;
        results.has_tombstone = is_live_tombstone(supplier, txn, cell)?;
    }
    if let Some(cell) = &row.user_data {
        check_owner(supplier, txn, cell.version, &mut results)?;
    }
    if kind == KvType::Delete {
        if let Some(owner) = row.fk_counter.as_ref().and_then(counter_owner) {
            check_owner(supplier, txn, owner, &mut results)?;
        }
    }
    Ok(results)
}

fn check_commit_timestamp(
    supplier: &dyn TxnSupplier,
    txn: &TxnView,
    cell: &Cell,
    results: &mut ConflictResults,
) -> CoreResult<()> {
    if cell.value.is_empty() {
        return Ok(());
    }
    let commit_ts = decode_timestamp(&cell.value)?;
    if commit_ts < 0 {
        return check_owner(supplier, txn, cell.version, results);
    }
    if commit_ts > txn.begin_timestamp() {
        let existing = TxnId::new(cell.version);
        trace!(txn_id = %txn.id(), %existing, commit_ts, "committed after begin");
        return Err(CoreError::write_conflict(existing, txn.id()));
    }
    Ok(())
}

fn check_owner(
    supplier: &dyn TxnSupplier,
    txn: &TxnView,
    version: u64,
    results: &mut ConflictResults,
) -> CoreResult<()> {
    if version == txn.id().as_u64() {
        return Ok(());
    }
    let owner = supplier.get_transaction(TxnId::new(version))?;
    results.classify(txn, &owner)
}

fn is_live_tombstone(supplier: &dyn TxnSupplier, txn: &TxnView, cell: &Cell) -> CoreResult<bool> {
    if cell.value.as_ref() == ANTI_TOMBSTONE_VALUE {
        return Ok(false);
    }
    if cell.version == txn.id().as_u64() {
        return Ok(true);
    }
    let owner = supplier.get_transaction(TxnId::new(cell.version))?;
    Ok(txn.conflicts(&owner) == ConflictType::None)
}

fn counter_owner(cell: &Cell) -> Option<u64> {
    let raw: [u8; 8] = cell.value.as_ref().try_into().ok()?;
    u64::try_from(i64::from_be_bytes(raw)).ok().filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{commit_timestamp_column, default_user_column, fk_counter_column, tombstone_column};
    use crate::txn::TxnRecord;
    use bytes::Bytes;
    use sidb_codec::{encode_timestamp, TxnState, TOMBSTONE_VALUE};
    use sidb_storage::Column;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct Views(HashMap<TxnId, Arc<TxnView>>);

    impl Views {
        fn add(&mut self, id: u64, state: TxnState, commit_ts: i64, additive: bool) -> Arc<TxnView> {
            let mut record = TxnRecord::new(TxnId::new(id)).additive(additive);
            record.state = state;
            record.commit_ts = commit_ts;
            let view = Arc::new(TxnView::new(record, state, None));
            self.0.insert(view.id(), Arc::clone(&view));
            view
        }

        fn add_child(&mut self, id: u64, parent: &Arc<TxnView>) -> Arc<TxnView> {
            let record = TxnRecord::new(TxnId::new(id)).with_parent(parent.id());
            let view = Arc::new(TxnView::new(record, TxnState::Active, Some(Arc::clone(parent))));
            self.0.insert(view.id(), Arc::clone(&view));
            view
        }
    }

    impl TxnSupplier for Views {
        fn find_transaction(&self, id: TxnId) -> CoreResult<Option<Arc<TxnView>>> {
            Ok(self.0.get(&id).cloned())
        }
    }

    fn cell(column: Column, version: u64, value: impl Into<Bytes>) -> Cell {
        Cell::new(&b"a"[..], column, version, value)
    }

    fn data_row(version: u64) -> LatestRow {
        LatestRow {
            user_data: Some(cell(default_user_column(), version, &b"v"[..])),
            ..LatestRow::default()
        }
    }

    #[test]
    fn committed_after_begin_conflicts() {
        let mut views = Views::default();
        views.add(100, TxnState::Committed, 105, false);
        let writer = views.add(102, TxnState::Active, -1, false);
        let err = ensure_no_write_conflict(&views, &writer, KvType::Upsert, &data_row(100)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::WriteConflict { existing, updating }
                if existing == TxnId::new(100) && updating == TxnId::new(102)
        ));

        let later = views.add(106, TxnState::Active, -1, false);
        let results = ensure_no_write_conflict(&views, &later, KvType::Upsert, &data_row(100)).unwrap();
        assert_eq!(results, ConflictResults::default());
    }

    #[test]
    fn commit_timestamp_cell_decides_without_lookup() {
        let views = Views::default();
        let mut writer_views = Views::default();
        let writer = writer_views.add(102, TxnState::Active, -1, false);
        let row = LatestRow {
            commit_timestamp: Some(cell(commit_timestamp_column(), 100, encode_timestamp(105))),
            ..LatestRow::default()
        };
        assert!(matches!(
            ensure_no_write_conflict(&views, &writer, KvType::Insert, &row),
            Err(CoreError::WriteConflict { .. })
        ));
    }

    #[test]
    fn children_and_additive_writers_are_recorded() {
        let mut views = Views::default();
        let parent = views.add(10, TxnState::Active, -1, false);
        views.add_child(11, &parent);
        let results = ensure_no_write_conflict(&views, &parent, KvType::Upsert, &data_row(11)).unwrap();
        assert_eq!(results.children, BTreeSet::from([TxnId::new(11)]));

        views.add(20, TxnState::Active, -1, true);
        let additive = views.add(21, TxnState::Active, -1, true);
        let results = ensure_no_write_conflict(&views, &additive, KvType::Upsert, &data_row(20)).unwrap();
        assert!(results.has_additive_conflicts());
        assert!(results.children.is_empty());
    }

    #[test]
    fn rolled_back_owners_never_conflict() {
        let mut views = Views::default();
        views.add(30, TxnState::RolledBack, -1, false);
        let writer = views.add(31, TxnState::Active, -1, false);
        assert!(ensure_no_write_conflict(&views, &writer, KvType::Delete, &data_row(30)).is_ok());
    }

    #[test]
    fn visible_tombstone_requests_anti_tombstone() {
        let mut views = Views::default();
        views.add(40, TxnState::Committed, 41, false);
        let writer = views.add(42, TxnState::Active, -1, false);
        let mut row = LatestRow {
            tombstone: Some(cell(tombstone_column(), 40, TOMBSTONE_VALUE)),
            ..LatestRow::default()
        };
        let results = ensure_no_write_conflict(&views, &writer, KvType::Insert, &row).unwrap();
        assert!(results.has_tombstone);

        row.tombstone = Some(cell(tombstone_column(), 40, ANTI_TOMBSTONE_VALUE));
        let results = ensure_no_write_conflict(&views, &writer, KvType::Insert, &row).unwrap();
        assert!(!results.has_tombstone);
    }

    #[test]
    fn fk_counter_only_matters_for_deletes() {
        let mut views = Views::default();
        views.add(50, TxnState::Active, -1, false);
        let deleter = views.add(51, TxnState::Active, -1, false);
        let row = LatestRow {
            fk_counter: Some(cell(fk_counter_column(), 0, Bytes::copy_from_slice(&50i64.to_be_bytes()))),
            ..LatestRow::default()
        };
        assert!(ensure_no_write_conflict(&views, &deleter, KvType::Upsert, &row).is_ok());
        assert!(matches!(
            ensure_no_write_conflict(&views, &deleter, KvType::Delete, &row),
            Err(CoreError::WriteConflict { .. })
        ));
    }
}
