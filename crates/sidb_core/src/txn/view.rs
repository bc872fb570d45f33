//! Resolved view of a transaction and its ancestors.

use crate::txn::record::TxnRecord;
use crate::types::{IsolationLevel, TxnId, UNKNOWN_TIMESTAMP};
use bytes::Bytes;
use sidb_codec::TxnState;
use std::sync::Arc;

/// How a write by one transaction relates to a version owned by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictType {
    /// No conflict.
    None,
    /// The other transaction is a descendant of the writer.
    Child,
    /// Both transactions are additive.
    Additive,
    /// A true write/write conflict.
    Sibling,
}

/// A transaction record together with its resolved parent chain.
///
/// `state` is the record's own state after keep-alive adjustment, captured
/// when the view was built. The effective state also folds in the ancestors.
#[derive(Debug, Clone)]
pub struct TxnView {
    record: TxnRecord,
    state: TxnState,
    parent: Option<Arc<TxnView>>,
    writable: bool,
}

impl TxnView {
    /// Builds a view of a stored record.
    #[must_use]
    pub fn new(record: TxnRecord, state: TxnState, parent: Option<Arc<TxnView>>) -> Self {
        Self {
            record,
            state,
            parent,
            writable: true,
        }
    }

    /// A read-only transaction that was never recorded.
    #[must_use]
    pub fn read_only(id: TxnId, parent: Option<Arc<TxnView>>) -> Self {
        let mut record = TxnRecord::new(id);
        record.parent_id = parent.as_ref().map(|p| p.id());
        Self {
            record,
            state: TxnState::Active,
            parent,
            writable: false,
        }
    }

    /// A read-only transaction with an explicit isolation level.
    #[must_use]
    pub fn read_only_with_isolation(id: TxnId, level: IsolationLevel) -> Self {
        let mut view = Self::read_only(id, None);
        view.record.isolation_level = level;
        view
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.record.id
    }

    /// Begin timestamp.
    #[must_use]
    pub fn begin_timestamp(&self) -> i64 {
        self.record.id.begin_timestamp()
    }

    /// The underlying record.
    #[must_use]
    pub fn record(&self) -> &TxnRecord {
        &self.record
    }

    /// Parent view, if nested.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<TxnView>> {
        self.parent.as_ref()
    }

    /// Own state with keep-alive timeout applied.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Own commit timestamp, or -1.
    #[must_use]
    pub fn commit_timestamp(&self) -> i64 {
        self.record.commit_ts
    }

    /// Recorded global commit timestamp, or -1.
    #[must_use]
    pub fn global_commit_timestamp(&self) -> i64 {
        self.record.global_commit_ts
    }

    /// Whether the transaction writes additively.
    #[must_use]
    pub fn is_additive(&self) -> bool {
        self.record.additive
    }

    /// Read isolation.
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.record.isolation_level
    }

    /// Tables written by the transaction.
    #[must_use]
    pub fn destination_tables(&self) -> &[Bytes] {
        &self.record.destination_tables
    }

    /// State folding in every ancestor.
    ///
    /// Rolled back if this transaction or any ancestor rolled back. Committed
    /// only if this transaction and every ancestor committed. Active otherwise.
    #[must_use]
    pub fn effective_state(&self) -> TxnState {
        match (self.state, self.parent.as_deref().map(TxnView::effective_state)) {
            (TxnState::RolledBack, _) | (_, Some(TxnState::RolledBack)) => TxnState::RolledBack,
            (TxnState::Committed, None | Some(TxnState::Committed)) => TxnState::Committed,
            _ => TxnState::Active,
        }
    }

    /// Commit timestamp at which this transaction's writes became visible to
    /// unrelated transactions, or -1 if not effectively committed.
    ///
    /// For a nested transaction this is the commit timestamp of its root.
    #[must_use]
    pub fn effective_commit_timestamp(&self) -> i64 {
        if self.record.global_commit_ts >= 0 {
            return self.record.global_commit_ts;
        }
        if self.effective_state() != TxnState::Committed {
            return UNKNOWN_TIMESTAMP;
        }
        match &self.parent {
            Some(parent) => parent.effective_commit_timestamp(),
            None => self.record.commit_ts,
        }
    }

    /// Returns true if `ancestor` is a strict ancestor of this transaction.
    #[must_use]
    pub fn descends_from(&self, ancestor: TxnId) -> bool {
        let mut current = self.parent.as_deref();
        while let Some(view) = current {
            if view.id() == ancestor {
                return true;
            }
            current = view.parent.as_deref();
        }
        false
    }

    /// Returns true if the transaction may write.
    #[must_use]
    pub fn allows_writes(&self) -> bool {
        self.writable && self.state == TxnState::Active && self.effective_state() == TxnState::Active
    }

    /// Classifies a write by this transaction against a version owned by `other`.
    #[must_use]
    pub fn conflicts(&self, other: &TxnView) -> ConflictType {
        if self.id() == other.id() {
            return ConflictType::None;
        }
        match other.effective_state() {
            TxnState::RolledBack => return ConflictType::None,
            TxnState::Committed => {
                let ts = other.effective_commit_timestamp();
                if ts >= 0 && ts < self.begin_timestamp() {
                    return ConflictType::None;
                }
            }
            TxnState::Active => {}
        }
        if self.descends_from(other.id()) {
            return ConflictType::None;
        }
        if other.descends_from(self.id()) {
            return ConflictType::Child;
        }
        if self.is_additive() && other.is_additive() {
            return ConflictType::Additive;
        }
        ConflictType::Sibling
    }

    /// Returns true if versions written by `other` are visible to this
    /// transaction.
    #[must_use]
    pub fn can_see(&self, other: &TxnView) -> bool {
        if self.id() == other.id() {
            return true;
        }
        if other.effective_state() == TxnState::RolledBack {
            return false;
        }
        if self.descends_from(other.id()) {
            return true;
        }
        if other.descends_from(self.id()) {
            return other.committed_up_to(self.id());
        }
        match self.isolation_level() {
            IsolationLevel::ReadUncommitted => true,
            IsolationLevel::ReadCommitted => other.effective_state() == TxnState::Committed,
            IsolationLevel::SnapshotIsolation => {
                let ts = other.effective_commit_timestamp();
                other.effective_state() == TxnState::Committed && ts >= 0 && ts < self.begin_timestamp()
            }
        }
    }

    /// Returns true if this transaction and every ancestor below `ancestor`
    /// committed.
    fn committed_up_to(&self, ancestor: TxnId) -> bool {
        let mut current = Some(self);
        while let Some(view) = current {
            if view.id() == ancestor {
                return true;
            }
            if view.state != TxnState::Committed {
                return false;
            }
            current = view.parent.as_deref();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(id: u64, state: TxnState, parent: Option<Arc<TxnView>>) -> Arc<TxnView> {
        let mut record = TxnRecord::new(TxnId::new(id));
        record.parent_id = parent.as_ref().map(|p| p.id());
        record.state = state;
        Arc::new(TxnView::new(record, state, parent))
    }

    fn committed(id: u64, commit_ts: i64, parent: Option<Arc<TxnView>>) -> Arc<TxnView> {
        let mut record = TxnRecord::new(TxnId::new(id));
        record.parent_id = parent.as_ref().map(|p| p.id());
        record.state = TxnState::Committed;
        record.commit_ts = commit_ts;
        Arc::new(TxnView::new(record, TxnState::Committed, parent))
    }

    fn additive(id: u64) -> Arc<TxnView> {
        let record = TxnRecord::new(TxnId::new(id)).additive(true);
        Arc::new(TxnView::new(record, TxnState::Active, None))
    }

    // === Effective State ===

    #[test]
    fn child_of_rolled_back_parent_is_rolled_back() {
        let parent = view(200, TxnState::RolledBack, None);
        let child = view(201, TxnState::Active, Some(parent));
        assert_eq!(child.effective_state(), TxnState::RolledBack);
        assert!(!child.allows_writes());
    }

    #[test]
    fn committed_child_of_active_parent_is_active() {
        let parent = view(10, TxnState::Active, None);
        let child = committed(11, 12, Some(parent));
        assert_eq!(child.effective_state(), TxnState::Active);
        assert_eq!(child.effective_commit_timestamp(), UNKNOWN_TIMESTAMP);
    }

    #[test]
    fn nested_commit_timestamp_comes_from_root() {
        let parent = committed(10, 20, None);
        let child = committed(11, 12, Some(parent));
        assert_eq!(child.effective_state(), TxnState::Committed);
        assert_eq!(child.effective_commit_timestamp(), 20);
    }

    #[test]
    fn descends_from_walks_the_chain() {
        let root = view(1, TxnState::Active, None);
        let mid = view(2, TxnState::Active, Some(root));
        let leaf = view(3, TxnState::Active, Some(mid));
        assert!(leaf.descends_from(TxnId::new(1)));
        assert!(leaf.descends_from(TxnId::new(2)));
        assert!(!leaf.descends_from(TxnId::new(3)));
    }

    // === Conflict Relation ===

    #[test]
    fn conflict_relation_cases() {
        let me = view(100, TxnState::Active, None);
        assert_eq!(me.conflicts(&me), ConflictType::None);

        let rolled_back = view(90, TxnState::RolledBack, None);
        assert_eq!(me.conflicts(&rolled_back), ConflictType::None);

        let committed_before = committed(50, 60, None);
        assert_eq!(me.conflicts(&committed_before), ConflictType::None);

        let committed_after = committed(50, 105, None);
        assert_eq!(me.conflicts(&committed_after), ConflictType::Sibling);

        let concurrent = view(101, TxnState::Active, None);
        assert_eq!(me.conflicts(&concurrent), ConflictType::Sibling);

        let child = view(102, TxnState::Active, Some(Arc::clone(&me)));
        assert_eq!(me.conflicts(&child), ConflictType::Child);
        assert_eq!(child.conflicts(&me), ConflictType::None);

        assert_eq!(additive(1).conflicts(&additive(2)), ConflictType::Additive);
        assert_eq!(additive(1).conflicts(&concurrent), ConflictType::Sibling);
    }

    // === Visibility ===

    #[test]
    fn snapshot_visibility() {
        let writer = committed(100, 105, None);
        assert!(TxnView::read_only(TxnId::new(106), None).can_see(&writer));
        assert!(!TxnView::read_only(TxnId::new(103), None).can_see(&writer));

        let reader =
            TxnView::read_only_with_isolation(TxnId::new(103), IsolationLevel::ReadCommitted);
        assert!(reader.can_see(&writer));

        let active = view(104, TxnState::Active, None);
        let dirty =
            TxnView::read_only_with_isolation(TxnId::new(103), IsolationLevel::ReadUncommitted);
        assert!(dirty.can_see(&active));
        assert!(!reader.can_see(&active));
    }

    #[test]
    fn family_visibility() {
        let parent = view(10, TxnState::Active, None);
        let child = view(11, TxnState::Active, Some(Arc::clone(&parent)));
        assert!(child.can_see(&parent));
        assert!(!parent.can_see(&child));

        let done = committed(12, 13, Some(Arc::clone(&parent)));
        assert!(parent.can_see(&done));
    }
}
