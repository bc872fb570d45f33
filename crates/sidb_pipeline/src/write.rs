//! Bulk write requests and their structured results.

use sidb_core::{KvPair, MutationStatus, TxnId};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome code of a row or of a whole partition write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WriteCode {
    /// Written.
    Success,
    /// Some rows failed; see the per-row results.
    Partial,
    /// Failed for a reason carried in the message.
    Failed,
    /// Write/write conflict with another transaction.
    WriteConflict,
    /// Uniqueness constraint violated.
    UniqueViolation,
    /// Upsert met an additive writer.
    AdditiveUpsertConflict,
    /// Row lock was busy.
    NotRun,
    /// The row belongs to another partition.
    WrongPartition,
    /// The partition is not served here.
    NotServingPartition,
    /// The partition is overloaded.
    PartitionTooBusy,
    /// The write pipeline on the server is overloaded.
    PipelineTooBusy,
}

impl WriteCode {
    /// Returns true if resubmitting the row unchanged may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            WriteCode::NotRun
                | WriteCode::WrongPartition
                | WriteCode::NotServingPartition
                | WriteCode::PartitionTooBusy
                | WriteCode::PipelineTooBusy
        )
    }

    /// Returns true if routing information is stale.
    pub fn refresh_cache(self) -> bool {
        matches!(self, WriteCode::WrongPartition | WriteCode::NotServingPartition)
    }
}

/// Result of one row or one partition write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    /// Outcome code.
    pub code: WriteCode,
    /// Optional detail.
    pub message: Option<String>,
}

impl WriteResult {
    /// Creates a result with no message.
    pub fn new(code: WriteCode) -> Self {
        Self { code, message: None }
    }

    /// A success.
    pub fn success() -> Self {
        Self::new(WriteCode::Success)
    }

    /// Creates a result carrying `message`.
    pub fn with_message(code: WriteCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Returns true if routing information is stale.
    pub fn refresh_cache(&self) -> bool {
        self.code.refresh_cache()
    }

    /// Human readable cause.
    pub fn cause(&self) -> String {
        match &self.message {
            Some(message) => format!("{:?}: {message}", self.code),
            None => format!("{:?}", self.code),
        }
    }
}

impl From<&MutationStatus> for WriteResult {
    fn from(status: &MutationStatus) -> Self {
        match status {
            MutationStatus::Success => WriteResult::success(),
            MutationStatus::NotRun => WriteResult::new(WriteCode::NotRun),
            MutationStatus::WrongPartition => WriteResult::new(WriteCode::WrongPartition),
            MutationStatus::WriteConflict { .. } => {
                WriteResult::with_message(WriteCode::WriteConflict, status.to_string())
            }
            MutationStatus::AdditiveUpsertConflict => {
                WriteResult::new(WriteCode::AdditiveUpsertConflict)
            }
            MutationStatus::UniqueViolation => WriteResult::new(WriteCode::UniqueViolation),
            MutationStatus::Failed(message) => WriteResult::with_message(WriteCode::Failed, message),
        }
    }
}

/// Rows of one transaction bound for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkWrite {
    /// Target partition name.
    pub partition: String,
    /// Row mutations, in submission order.
    pub mutations: Vec<KvPair>,
}

impl BulkWrite {
    /// Creates a bulk write.
    pub fn new(partition: impl Into<String>, mutations: Vec<KvPair>) -> Self {
        Self {
            partition: partition.into(),
            mutations,
        }
    }

    /// Approximate payload size in bytes.
    pub fn heap_size(&self) -> usize {
        self.mutations.iter().map(KvPair::size).sum()
    }
}

/// One submission: a transaction's rows for one table, split by partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkWrites {
    /// Target table.
    pub table: String,
    /// Writing transaction.
    pub txn_id: TxnId,
    /// Per-partition writes.
    pub writes: Vec<BulkWrite>,
}

impl BulkWrites {
    /// Creates an empty submission.
    pub fn new(table: impl Into<String>, txn_id: TxnId) -> Self {
        Self {
            table: table.into(),
            txn_id,
            writes: Vec::new(),
        }
    }

    /// Appends `pair` to the write for `partition`.
    pub fn add(&mut self, partition: &str, pair: KvPair) {
        match self.writes.iter_mut().find(|w| w.partition == partition) {
            Some(write) => write.mutations.push(pair),
            None => self.writes.push(BulkWrite::new(partition, vec![pair])),
        }
    }

    /// Total rows across partitions.
    pub fn num_entries(&self) -> usize {
        self.writes.iter().map(|w| w.mutations.len()).sum()
    }

    /// Number of partitions addressed.
    pub fn num_partitions(&self) -> usize {
        self.writes.len()
    }

    /// Approximate payload size in bytes.
    pub fn heap_size(&self) -> usize {
        self.writes.iter().map(BulkWrite::heap_size).sum()
    }
}

impl fmt::Display for BulkWrites {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BulkWrites{{table={}, txn={}, partitions={}, rows={}}}",
            self.table,
            self.txn_id,
            self.num_partitions(),
            self.num_entries()
        )
    }
}

/// Result of one [`BulkWrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkWriteResult {
    /// Partition-level outcome.
    pub global: WriteResult,
    /// Failed rows by index into [`BulkWrite::mutations`].
    pub failed_rows: BTreeMap<usize, WriteResult>,
}

impl BulkWriteResult {
    /// Every row succeeded.
    pub fn success() -> Self {
        Self::global(WriteResult::success())
    }

    /// The partition answered with `global` for the whole write.
    pub fn global(global: WriteResult) -> Self {
        Self {
            global,
            failed_rows: BTreeMap::new(),
        }
    }

    /// Adds a failed row.
    #[must_use]
    pub fn with_failed_row(mut self, index: usize, result: WriteResult) -> Self {
        self.failed_rows.insert(index, result);
        self
    }

    /// Builds a result from per-row statuses.
    pub fn from_statuses(statuses: &[MutationStatus]) -> Self {
        let failed_rows = statuses
            .iter()
            .enumerate()
            .filter(|(_, status)| !status.is_success())
            .map(|(index, status)| (index, WriteResult::from(status)))
            .collect();
        Self {
            global: WriteResult::success(),
            failed_rows,
        }
    }

    /// Distinct causes of the failed rows, sorted.
    pub fn causes(&self) -> Vec<String> {
        let mut causes: Vec<String> = self.failed_rows.values().map(WriteResult::cause).collect();
        if causes.is_empty() && self.global.code != WriteCode::Success {
            causes.push(self.global.cause());
        }
        causes.sort();
        causes.dedup();
        causes
    }
}

/// Results of one submission, one per [`BulkWrite`] in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWritesResult {
    /// Per-partition results.
    pub results: Vec<BulkWriteResult>,
}

impl BulkWritesResult {
    /// Creates a result set.
    pub fn new(results: Vec<BulkWriteResult>) -> Self {
        Self { results }
    }

    /// A success for every write of `writes`.
    pub fn all_success(writes: &BulkWrites) -> Self {
        Self::new(writes.writes.iter().map(|_| BulkWriteResult::success()).collect())
    }
}
