//! Error types for sidb core.

use crate::types::TxnId;
use sidb_codec::TxnState;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in sidb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] sidb_storage::StorageError),

    /// Layout codec error.
    #[error("codec error: {0}")]
    Codec(#[from] sidb_codec::CodecError),

    /// Two unrelated transactions wrote the same row with overlapping snapshots.
    #[error("write/write conflict between {existing} and {updating}")]
    WriteConflict {
        /// The transaction owning the conflicting version.
        existing: TxnId,
        /// The transaction attempting the write.
        updating: TxnId,
    },

    /// The transaction missed its keep-alive deadline.
    #[error("transaction {txn_id} timed out")]
    TransactionTimeout {
        /// The timed-out transaction.
        txn_id: TxnId,
    },

    /// A write was attempted through a transaction that cannot write.
    #[error("read-only modification by {txn_id}: {message}")]
    ReadOnlyModification {
        /// The offending transaction.
        txn_id: TxnId,
        /// Why the transaction cannot write.
        message: String,
    },

    /// No record exists for the transaction.
    #[error("transaction {txn_id} not found")]
    TransactionNotFound {
        /// The missing transaction.
        txn_id: TxnId,
    },

    /// The transaction is not in a state that permits the transition.
    #[error("cannot commit {txn_id}: state is {state:?}")]
    CannotCommit {
        /// The transaction.
        txn_id: TxnId,
        /// Its current state.
        state: TxnState,
    },

    /// A transaction row stayed locked by another writer.
    #[error("row lock unavailable for {txn_id}")]
    RowLockUnavailable {
        /// The transaction whose row could not be locked.
        txn_id: TxnId,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a write/write conflict error.
    pub fn write_conflict(existing: TxnId, updating: TxnId) -> Self {
        Self::WriteConflict { existing, updating }
    }

    /// Creates a read-only modification error.
    pub fn read_only_modification(txn_id: TxnId, message: impl Into<String>) -> Self {
        Self::ReadOnlyModification {
            txn_id,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error ends the transaction.
    #[must_use]
    pub fn is_fatal_to_transaction(&self) -> bool {
        matches!(
            self,
            CoreError::WriteConflict { .. } | CoreError::TransactionTimeout { .. }
        )
    }
}
