//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The row does not belong to this partition.
    #[error("row {row} is outside partition {partition}")]
    WrongPartition {
        /// Name of the partition that rejected the row.
        partition: String,
        /// Hex rendering of the row key.
        row: String,
    },

    /// A stored value could not be interpreted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The counter cell does not hold an 8-byte integer.
    #[error("cannot increment a {len}-byte value")]
    InvalidIncrement {
        /// Length of the stored value.
        len: usize,
    },

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Creates a wrong-partition error for `row`.
    pub fn wrong_partition(partition: impl Into<String>, row: &[u8]) -> Self {
        Self::WrongPartition {
            partition: partition.into(),
            row: to_hex(row),
        }
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_partition_renders_hex_row() {
        let err = StorageError::wrong_partition("txn-3", &[0x03, 0xff]);
        assert_eq!(err.to_string(), "row 03ff is outside partition txn-3");
    }
}
