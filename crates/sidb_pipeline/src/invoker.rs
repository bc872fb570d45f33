//! Sending bulk writes to partitions.

use crate::error::{PipelineError, PipelineResult};
use crate::write::{BulkWriteResult, BulkWrites, BulkWritesResult, WriteCode, WriteResult};
use parking_lot::{Mutex, RwLock};
use sidb_core::{ConstraintChecker, CoreError, Partition, Transactor};
use sidb_storage::{Column, StorageError};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Delivers a submission to its partitions.
///
/// Implementations return one [`BulkWriteResult`] per write, in order. An
/// `Err` stands for a transport-level failure of the whole submission.
pub trait BulkWritesInvoker: Send + Sync {
    /// Sends `writes`. `refresh_cache` is set when the caller re-routed rows
    /// after stale routing.
    fn invoke(&self, writes: &BulkWrites, refresh_cache: bool) -> PipelineResult<BulkWritesResult>;
}

type Responder = Box<dyn Fn(&BulkWrites) -> PipelineResult<BulkWritesResult> + Send + Sync>;

/// A scripted invoker for testing.
///
/// Scripted responses are returned first, in order; after that the
/// fallback answers. The default fallback succeeds every write.
pub struct MockInvoker {
    script: Mutex<VecDeque<PipelineResult<BulkWritesResult>>>,
    fallback: Responder,
    calls: Mutex<Vec<(BulkWrites, bool)>>,
}

impl MockInvoker {
    /// Creates an invoker that succeeds every write.
    pub fn new() -> Self {
        Self::with_fallback(|writes| Ok(BulkWritesResult::all_success(writes)))
    }

    /// Creates an invoker answering with `fallback` once the script runs out.
    pub fn with_fallback(
        fallback: impl Fn(&BulkWrites) -> PipelineResult<BulkWritesResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Box::new(fallback),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a response.
    pub fn push_result(&self, result: BulkWritesResult) {
        self.script.lock().push_back(Ok(result));
    }

    /// Queues an error.
    pub fn push_error(&self, error: PipelineError) {
        self.script.lock().push_back(Err(error));
    }

    /// Submissions received so far, with their refresh hints.
    pub fn calls(&self) -> Vec<(BulkWrites, bool)> {
        self.calls.lock().clone()
    }

    /// Number of submissions received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Default for MockInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockInvoker")
            .field("scripted", &self.script.lock().len())
            .field("calls", &self.call_count())
            .finish()
    }
}

impl BulkWritesInvoker for MockInvoker {
    fn invoke(&self, writes: &BulkWrites, refresh_cache: bool) -> PipelineResult<BulkWritesResult> {
        self.calls.lock().push((writes.clone(), refresh_cache));
        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => (self.fallback)(writes),
        }
    }
}

/// Applies writes in-process through the conflict & write engine.
pub struct PartitionInvoker {
    partitions: RwLock<HashMap<String, Arc<dyn Partition>>>,
    transactor: Transactor,
    column: Column,
    checker: Option<Arc<dyn ConstraintChecker>>,
}

impl PartitionInvoker {
    /// Creates an invoker writing user values to `column`.
    pub fn new(transactor: Transactor, column: Column) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            transactor,
            column,
            checker: None,
        }
    }

    /// Sets the constraint checker applied to every batch.
    #[must_use]
    pub fn with_checker(mut self, checker: Arc<dyn ConstraintChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Serves `partition`.
    pub fn add_partition(&self, partition: Arc<dyn Partition>) {
        let name = partition.name().to_string();
        self.partitions.write().insert(name, partition);
    }

    /// Stops serving the partition named `name`.
    pub fn remove_partition(&self, name: &str) -> bool {
        self.partitions.write().remove(name).is_some()
    }

    /// The engine behind this invoker.
    pub fn transactor(&self) -> &Transactor {
        &self.transactor
    }

    fn apply(&self, writes: &BulkWrites, index: usize) -> BulkWriteResult {
        let write = &writes.writes[index];
        let partition = self.partitions.read().get(&write.partition).cloned();
        let Some(partition) = partition else {
            debug!(partition = %write.partition, "partition not served");
            return BulkWriteResult::global(WriteResult::new(WriteCode::NotServingPartition));
        };
        let checker = self.checker.as_deref();
        match self.transactor.process_batch(
            &*partition,
            writes.txn_id,
            &self.column,
            &write.mutations,
            checker,
        ) {
            Ok(statuses) => BulkWriteResult::from_statuses(&statuses),
            Err(e) => BulkWriteResult::global(global_failure(&e)),
        }
    }
}

fn global_failure(error: &CoreError) -> WriteResult {
    match error {
        CoreError::Storage(StorageError::WrongPartition { .. }) => {
            WriteResult::new(WriteCode::WrongPartition)
        }
        CoreError::Storage(StorageError::Closed) => WriteResult::new(WriteCode::NotServingPartition),
        CoreError::WriteConflict { .. } => {
            WriteResult::with_message(WriteCode::WriteConflict, error.to_string())
        }
        _ => WriteResult::with_message(WriteCode::Failed, error.to_string()),
    }
}

impl fmt::Debug for PartitionInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.partitions.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("PartitionInvoker")
            .field("partitions", &names)
            .field("column", &self.column)
            .finish_non_exhaustive()
    }
}

impl BulkWritesInvoker for PartitionInvoker {
    fn invoke(&self, writes: &BulkWrites, refresh_cache: bool) -> PipelineResult<BulkWritesResult> {
        trace!(%writes, refresh_cache, "invoking locally");
        let results = (0..writes.writes.len())
            .map(|index| self.apply(writes, index))
            .collect();
        Ok(BulkWritesResult::new(results))
    }
}
