//! Error types for the write pipeline.

use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur while driving a bulk write.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Partitions kept rejecting the write.
    #[error("capacity exhausted writing to {table}")]
    CapacityExhausted {
        /// Target table.
        table: String,
    },

    /// Rows kept failing after every allowed retry.
    #[error("write to {table} failed after {attempts} attempts: {causes:?}")]
    WriteFailed {
        /// Target table.
        table: String,
        /// Failed attempts made.
        attempts: u32,
        /// Distinct causes accumulated across attempts.
        causes: Vec<String>,
    },

    /// A partition reported row failures that cannot be retried.
    #[error("write to {table} failed: {causes:?}")]
    RowFailures {
        /// Target table.
        table: String,
        /// Distinct per-row causes.
        causes: Vec<String>,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The partition server asked the caller to back off.
    #[error("partition {partition} is too busy")]
    RegionTooBusy {
        /// Busy partition.
        partition: String,
    },

    /// No partition is known for a row.
    #[error("no partition of {table} holds row {row}")]
    NoPartition {
        /// Target table.
        table: String,
        /// Hex rendering of the row key.
        row: String,
    },

    /// The invoker returned a malformed result.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Error from the transactional core.
    #[error("core error: {0}")]
    Core(#[from] sidb_core::CoreError),
}

impl PipelineError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a too-busy signal for `partition`.
    pub fn too_busy(partition: impl Into<String>) -> Self {
        Self::RegionTooBusy {
            partition: partition.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Transport { retryable, .. } => *retryable,
            PipelineError::RegionTooBusy { .. } => true,
            _ => false,
        }
    }

    /// Returns true for the transport-level back-off signal.
    pub fn is_too_busy(&self) -> bool {
        matches!(self, PipelineError::RegionTooBusy { .. })
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
