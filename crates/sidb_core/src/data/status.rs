//! Per-row outcomes of a batch write.

use crate::types::TxnId;
use std::fmt;

/// Outcome of one row of a batch write.
///
/// Row-scoped failures are reported here and never abort sibling rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStatus {
    /// The row was written.
    Success,
    /// The row lock was busy; retry later.
    NotRun,
    /// The row lies outside the partition.
    WrongPartition,
    /// The row was written concurrently by an unrelated transaction.
    WriteConflict {
        /// Owner of the conflicting version.
        existing: TxnId,
    },
    /// An upsert met an additive writer.
    AdditiveUpsertConflict,
    /// The row violates a uniqueness constraint.
    UniqueViolation,
    /// The write or its cleanup failed.
    Failed(String),
}

impl MutationStatus {
    /// Returns true if the row was written successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, MutationStatus::Success)
    }

    /// Returns true if the row may succeed when resubmitted unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, MutationStatus::NotRun | MutationStatus::WrongPartition)
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationStatus::Success => write!(f, "success"),
            MutationStatus::NotRun => write!(f, "not run"),
            MutationStatus::WrongPartition => write!(f, "wrong partition"),
            MutationStatus::WriteConflict { existing } => {
                write!(f, "write/write conflict with {existing}")
            }
            MutationStatus::AdditiveUpsertConflict => write!(f, "additive conflict during upsert"),
            MutationStatus::UniqueViolation => write!(f, "unique constraint violated"),
            MutationStatus::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}
