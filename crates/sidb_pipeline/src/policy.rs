//! How the pipeline reacts to partition responses.

use crate::error::PipelineError;
use crate::write::{BulkWrite, BulkWriteResult, WriteCode};

/// Pipeline reaction to one partition's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResponse {
    /// Nothing to do.
    Success,
    /// Abort the write with the response's causes.
    ThrowError,
    /// Resubmit every row of the partition write.
    Retry,
    /// Some rows failed; ask the partial-failure policy.
    Partial,
    /// Drop the failures.
    Ignore,
}

/// Maps partition responses and invoker errors to [`WriteResponse`]s.
pub trait WritePolicy: Send + Sync {
    /// Reaction to a partition-level result.
    fn process_global_result(&self, result: &BulkWriteResult) -> WriteResponse {
        match result.global.code {
            WriteCode::Success if result.failed_rows.is_empty() => WriteResponse::Success,
            WriteCode::Success | WriteCode::Partial => WriteResponse::Partial,
            WriteCode::NotServingPartition
            | WriteCode::WrongPartition
            | WriteCode::PartitionTooBusy
            | WriteCode::PipelineTooBusy => WriteResponse::Retry,
            _ => WriteResponse::ThrowError,
        }
    }

    /// Reaction to a result with failed rows. May return
    /// [`ThrowError`](WriteResponse::ThrowError), [`Retry`](WriteResponse::Retry)
    /// or [`Ignore`](WriteResponse::Ignore).
    fn partial_failure(&self, result: &BulkWriteResult, _write: &BulkWrite) -> WriteResponse {
        let mut retry = false;
        for row in result.failed_rows.values() {
            if !row.code.is_retryable() {
                return WriteResponse::ThrowError;
            }
            retry = true;
        }
        if retry {
            WriteResponse::Retry
        } else {
            WriteResponse::Ignore
        }
    }

    /// Reaction to an error raised by the invoker itself.
    fn global_error(&self, error: &PipelineError) -> WriteResponse {
        if error.is_retryable() {
            WriteResponse::Retry
        } else {
            WriteResponse::ThrowError
        }
    }
}

/// The standard reactions.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultWritePolicy;

impl WritePolicy for DefaultWritePolicy {}
