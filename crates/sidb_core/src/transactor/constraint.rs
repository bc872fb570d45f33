//! Row constraints checked before a write.

use crate::data::{KvPair, KvType, MutationStatus};
use sidb_storage::Cell;

/// Predicate applied to a row before it is written.
///
/// Only consulted when the row has a visible user value or an additive
/// writer was met. A non-success status drops the row from the batch.
pub trait ConstraintChecker: Send + Sync {
    /// Checks `pair` against the value currently visible to the writer.
    fn check(&self, pair: &KvPair, visible: Option<&Cell>, additive_conflict: bool) -> MutationStatus;
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpConstraintChecker;

impl ConstraintChecker for NoOpConstraintChecker {
    fn check(&self, _pair: &KvPair, _visible: Option<&Cell>, _additive: bool) -> MutationStatus {
        MutationStatus::Success
    }
}

/// Rejects inserts of keys that already hold a live row.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniqueConstraintChecker;

impl ConstraintChecker for UniqueConstraintChecker {
    fn check(&self, pair: &KvPair, visible: Option<&Cell>, additive_conflict: bool) -> MutationStatus {
        if pair.kind != KvType::Insert {
            return MutationStatus::Success;
        }
        let live = visible.is_some_and(|cell| !cell.value.is_empty());
        if live || additive_conflict {
            MutationStatus::UniqueViolation
        } else {
            MutationStatus::Success
        }
    }
}
