//! Test fixtures and cluster helpers.
//!
//! Provides an in-memory cluster (transaction table, two data partitions,
//! a manual clock and a write engine) plus failure-injecting wrappers.

use bytes::Bytes;
use sidb_core::{
    commit_timestamp_column, default_user_column, tombstone_column, CoreResult, KvPair,
    ManualClock, MutationStatus, Partition, ResolverWorker, SnapshotReader, StorePartition,
    SynchronousReadResolver, Transactor, TxnConfig, TxnId, TxnRecord, TxnStore, TxnView,
};
use sidb_pipeline::{
    PartitionInvoker, RecordingSleeper, StaticRegionCache, WriteConfig, WritePipeline,
};
use sidb_storage::{Cell, Column, Delete, KeyRange, MemoryStore, Put, RowGuard, RowOutcome, StorageError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Rows below this key live in the first data partition.
pub const SPLIT_KEY: &[u8] = b"m";

/// Table name the cluster's partitions serve.
pub const TABLE: &str = "data";

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// An in-memory cluster.
pub struct TestCluster {
    /// Clock driving keep-alive timeouts.
    pub clock: Arc<ManualClock>,
    /// The transaction table.
    pub store: Arc<TxnStore>,
    /// Backing stores of the data partitions.
    pub stores: Vec<Arc<MemoryStore>>,
    /// Data partitions, split at [`SPLIT_KEY`].
    pub partitions: Vec<Arc<dyn Partition>>,
    /// The write engine.
    pub transactor: Transactor,
}

impl TestCluster {
    /// Creates a cluster with four transaction buckets.
    pub fn new() -> Self {
        Self::with_config(TxnConfig::new().bucket_count(4))
    }

    /// Creates a cluster with a custom transaction table configuration.
    pub fn with_config(config: TxnConfig) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(
            TxnStore::in_memory(config, clock.clone()).expect("Failed to create transaction table"),
        );
        let stores = vec![
            Arc::new(MemoryStore::with_range(
                format!("{TABLE}-0"),
                KeyRange::new(Bytes::new(), SPLIT_KEY),
            )),
            Arc::new(MemoryStore::with_range(
                format!("{TABLE}-1"),
                KeyRange::new(SPLIT_KEY, Bytes::new()),
            )),
        ];
        let partitions = stores
            .iter()
            .map(|s| Arc::new(StorePartition::new(s.clone())) as Arc<dyn Partition>)
            .collect();
        Self {
            transactor: Transactor::new(store.clone()),
            clock,
            store,
            stores,
            partitions,
        }
    }

    /// The partition holding `row`.
    pub fn partition_for(&self, row: &[u8]) -> &Arc<dyn Partition> {
        if row < SPLIT_KEY {
            &self.partitions[0]
        } else {
            &self.partitions[1]
        }
    }

    /// Begins a root transaction.
    pub fn begin(&self, id: u64) -> TxnId {
        self.begin_with(TxnRecord::new(TxnId::new(id)))
    }

    /// Begins a child of `parent`.
    pub fn begin_child(&self, id: u64, parent: TxnId) -> TxnId {
        self.begin_with(TxnRecord::new(TxnId::new(id)).with_parent(parent))
    }

    /// Begins an additive root transaction.
    pub fn begin_additive(&self, id: u64) -> TxnId {
        self.begin_with(TxnRecord::new(TxnId::new(id)).additive(true))
    }

    /// Records `record` as a new transaction.
    pub fn begin_with(&self, record: TxnRecord) -> TxnId {
        self.store
            .record_transaction(&record)
            .expect("Failed to record transaction");
        record.id
    }

    /// Commits `id` at `commit_ts`.
    pub fn commit(&self, id: TxnId, commit_ts: i64) {
        self.store
            .record_commit(id, commit_ts)
            .expect("Failed to commit");
    }

    /// Rolls `id` back.
    pub fn rollback(&self, id: TxnId) {
        self.store.record_rollback(id).expect("Failed to roll back");
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Runs queued transaction resolutions.
    pub fn resolve(&self) -> usize {
        let resolved = self.store.run_pending_resolutions();
        debug!(resolved, "ran pending resolutions");
        resolved
    }

    /// Starts a background worker draining the cluster's resolution queue.
    pub fn spawn_resolver(&self) -> ResolverWorker {
        ResolverWorker::spawn(&self.store, Duration::from_millis(5))
            .expect("Failed to spawn resolver")
    }

    /// Writes `pairs` as `txn`, routing each row to its partition.
    ///
    /// Statuses come back in input order.
    pub fn write(&self, txn: TxnId, pairs: Vec<KvPair>) -> CoreResult<Vec<MutationStatus>> {
        let mut statuses = vec![MutationStatus::NotRun; pairs.len()];
        for partition in &self.partitions {
            let (positions, batch): (Vec<usize>, Vec<KvPair>) = pairs
                .iter()
                .enumerate()
                .filter(|(_, p)| self.partition_for(&p.row).name() == partition.name())
                .map(|(i, p)| (i, p.clone()))
                .unzip();
            if batch.is_empty() {
                continue;
            }
            let results = self.transactor.process_batch(
                &**partition,
                txn,
                &default_user_column(),
                &batch,
                None,
            )?;
            for (position, status) in positions.into_iter().zip(results) {
                statuses[position] = status;
            }
        }
        Ok(statuses)
    }

    /// Reads `row` as a fresh read-only transaction beginning at `reader`,
    /// resolving versions on the way.
    pub fn read(&self, reader: u64, row: &[u8]) -> Option<Bytes> {
        self.read_as(&TxnView::read_only(TxnId::new(reader), None), row)
    }

    /// Reads `row` as `reader`, resolving versions on the way.
    pub fn read_as(&self, reader: &TxnView, row: &[u8]) -> Option<Bytes> {
        SnapshotReader::new(self.store.clone(), Arc::new(SynchronousReadResolver))
            .read(
                &**self.partition_for(row),
                reader,
                row,
                &default_user_column(),
            )
            .expect("Failed to read")
    }

    /// Every stored version of `row`'s user, tombstone and commit-timestamp
    /// columns, newest first per column.
    pub fn versions(&self, row: &[u8]) -> Vec<Cell> {
        self.partition_for(row)
            .get_versions(
                row,
                &[default_user_column(), tombstone_column(), commit_timestamp_column()],
            )
            .expect("Failed to read versions")
    }

    /// A pipeline writing [`TABLE`] through this cluster's engine.
    ///
    /// Sleeps are recorded rather than taken.
    pub fn pipeline(&self, config: WriteConfig) -> TestPipeline {
        let cache = Arc::new(StaticRegionCache::new());
        cache.set_partitions(
            TABLE,
            vec![
                (Bytes::new(), format!("{TABLE}-0")),
                (Bytes::from_static(SPLIT_KEY), format!("{TABLE}-1")),
            ],
        );
        let invoker = Arc::new(PartitionInvoker::new(
            self.transactor.clone(),
            default_user_column(),
        ));
        for partition in &self.partitions {
            invoker.add_partition(partition.clone());
        }
        let sleeper = Arc::new(RecordingSleeper::new());
        let pipeline = WritePipeline::new(cache.clone(), invoker.clone(), config)
            .with_sleeper(sleeper.clone());
        TestPipeline {
            pipeline,
            cache,
            invoker,
            sleeper,
        }
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// A pipeline over a [`TestCluster`], with handles to its collaborators.
pub struct TestPipeline {
    /// The pipeline.
    pub pipeline: WritePipeline,
    /// Its routing cache.
    pub cache: Arc<StaticRegionCache>,
    /// Its invoker.
    pub invoker: Arc<PartitionInvoker>,
    /// Its sleeper.
    pub sleeper: Arc<RecordingSleeper>,
}

/// A partition wrapper that fails on request.
pub struct FlakyPartition {
    inner: Arc<dyn Partition>,
    failing_writes: AtomicU32,
    failing_deletes: AtomicBool,
}

impl FlakyPartition {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn Partition>) -> Self {
        Self {
            inner,
            failing_writes: AtomicU32::new(0),
            failing_deletes: AtomicBool::new(false),
        }
    }

    /// Fails every row of the next `batches` batch writes.
    pub fn fail_next_writes(&self, batches: u32) {
        self.failing_writes.store(batches, Ordering::SeqCst);
    }

    /// Makes deletes fail until turned off.
    pub fn fail_deletes(&self, fail: bool) {
        self.failing_deletes.store(fail, Ordering::SeqCst);
    }
}

impl Partition for FlakyPartition {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn contains_row(&self, row: &[u8]) -> bool {
        self.inner.contains_row(row)
    }

    fn get_latest(&self, row: &[u8]) -> CoreResult<Vec<Cell>> {
        self.inner.get_latest(row)
    }

    fn get_versions(&self, row: &[u8], columns: &[Column]) -> CoreResult<Vec<Cell>> {
        self.inner.get_versions(row, columns)
    }

    fn try_row_lock(&self, row: &[u8]) -> CoreResult<Option<RowGuard>> {
        self.inner.try_row_lock(row)
    }

    fn write_batch(&self, puts: &[Put]) -> CoreResult<Vec<RowOutcome>> {
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Ok(puts
                .iter()
                .map(|_| RowOutcome::Failed("injected write failure".into()))
                .collect());
        }
        self.inner.write_batch(puts)
    }

    fn put(&self, put: &Put) -> CoreResult<()> {
        self.inner.put(put)
    }

    fn delete(&self, delete: &Delete) -> CoreResult<()> {
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Corrupted("injected delete failure".into()).into());
        }
        self.inner.delete(delete)
    }

    fn increment(&self, row: &[u8], column: &Column, delta: i64) -> CoreResult<i64> {
        self.inner.increment(row, column, delta)
    }

    fn get_fk_counter(&self, row: &[u8]) -> CoreResult<Option<i64>> {
        self.inner.get_fk_counter(row)
    }
}
