//! The write pipeline driving the write engine, and its termination bounds.

use bytes::Bytes;
use proptest::prelude::*;
use sidb_core::Partition;
use sidb_pipeline::{
    BulkWriteResult, BulkWrites, BulkWritesResult, MockInvoker, PipelineError, PipelineResult,
    RecordingSleeper, Sleeper, StaticRegionCache, WriteCode, WriteConfig, WritePipeline, WriteResult,
};
use sidb_storage::RowGuard;
use sidb_testkit::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Runs a hook on the first sleep.
struct OnFirstSleep {
    hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    inner: RecordingSleeper,
}

impl OnFirstSleep {
    fn new(hook: impl FnOnce() + Send + 'static) -> Self {
        Self {
            hook: Mutex::new(Some(Box::new(hook))),
            inner: RecordingSleeper::new(),
        }
    }
}

impl Sleeper for OnFirstSleep {
    fn sleep(&self, duration: Duration) {
        if let Some(hook) = self.hook.lock().unwrap().take() {
            hook();
        }
        self.inner.sleep(duration);
    }
}

fn config(max_retries: u32) -> WriteConfig {
    WriteConfig::new().with_max_retries(max_retries).with_jitter(false)
}

fn rows() -> Vec<KvPair> {
    vec![
        KvPair::upsert("a", "1"),
        KvPair::upsert("b", "2"),
        KvPair::upsert("x", "3"),
    ]
}

// === End to end ===

#[test]
fn rows_land_on_both_partitions() {
    let cluster = TestCluster::new();
    let harness = cluster.pipeline(config(3));
    let t = cluster.begin(10);

    let stats = harness.pipeline.write(TABLE, t, rows()).unwrap();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.rows_submitted, 3);
    assert!(harness.sleeper.sleeps().is_empty());

    cluster.commit(t, 11);
    assert_eq!(cluster.read(12, b"a"), Some(Bytes::from_static(b"1")));
    assert_eq!(cluster.read(12, b"x"), Some(Bytes::from_static(b"3")));
    assert_eq!(cluster.stores[0].row_count(), 2);
    assert_eq!(cluster.stores[1].row_count(), 1);
    assert_eq!(harness.pipeline.status().completed_flushes(), 1);
    assert_eq!(harness.pipeline.status().max_flush_regions(), 2);
}

#[test]
fn locked_rows_are_retried_alone() {
    let cluster = TestCluster::new();
    let harness = cluster.pipeline(config(3));
    let guard: RowGuard = cluster.stores[0].locks().try_lock(b"b").unwrap();
    let sleeper = Arc::new(OnFirstSleep::new(move || drop(guard)));
    let pipeline = WritePipeline::new(harness.cache.clone(), harness.invoker.clone(), config(3))
        .with_sleeper(sleeper.clone());
    let t = cluster.begin(10);

    let stats = pipeline.write(TABLE, t, rows()).unwrap();
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.partial_failures, 1);
    assert_eq!(stats.rejected, 0);
    assert_eq!(sleeper.inner.sleeps(), vec![Duration::from_millis(100)]);
    assert_eq!(cluster.transactor.stats().not_run(), 1);
    assert_eq!(cluster.transactor.stats().rows_written(), 3);
}

#[test]
fn write_conflicts_fail_the_submission() {
    let cluster = TestCluster::new();
    let harness = cluster.pipeline(config(3));
    let holder = cluster.begin(10);
    cluster.write(holder, vec![KvPair::upsert("b", "held")]).unwrap();

    let t = cluster.begin(11);
    let err = harness.pipeline.write(TABLE, t, rows()).unwrap_err();
    match err {
        PipelineError::RowFailures { table, causes } => {
            assert_eq!(table, TABLE);
            assert_eq!(causes.len(), 1);
            assert!(causes[0].starts_with("WriteConflict"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(cluster.transactor.stats().write_conflicts(), 1);
}

#[test]
fn unserved_partition_is_rerouted_once_it_returns() {
    let cluster = TestCluster::new();
    let harness = cluster.pipeline(config(3));
    assert!(harness.invoker.remove_partition("data-1"));
    let invoker = harness.invoker.clone();
    let partition = cluster.partitions[1].clone();
    let sleeper = Arc::new(OnFirstSleep::new(move || invoker.add_partition(partition)));
    let pipeline = WritePipeline::new(harness.cache.clone(), harness.invoker.clone(), config(3))
        .with_sleeper(sleeper.clone());
    let t = cluster.begin(10);

    let stats = pipeline.write(TABLE, t, rows()).unwrap();
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.rejected, 1);
    assert_eq!(harness.cache.invalidations(), 1);
    // rejected attempts back off half as long
    assert_eq!(sleeper.inner.sleeps(), vec![Duration::from_millis(50)]);
    assert_eq!(cluster.stores[1].row_count(), 1);
}

#[test]
fn unserved_partition_exhausts_failed_attempts() {
    let cluster = TestCluster::new();
    let harness = cluster.pipeline(config(3));
    harness.invoker.remove_partition("data-1");
    let t = cluster.begin(10);

    let err = harness.pipeline.write(TABLE, t, rows()).unwrap_err();
    assert!(matches!(err, PipelineError::WriteFailed { attempts: 3, .. }));
    assert_eq!(harness.sleeper.sleeps().len(), 2);
    assert_eq!(cluster.stores[0].row_count(), 2);
    assert_eq!(cluster.stores[1].row_count(), 0);
}

#[test]
fn storage_failures_surface_as_row_failures() {
    let cluster = TestCluster::new();
    let harness = cluster.pipeline(config(3));
    let flaky = Arc::new(FlakyPartition::new(cluster.partitions[0].clone()));
    harness.invoker.add_partition(flaky.clone());
    flaky.fail_next_writes(1);
    let t = cluster.begin(10);

    let err = harness.pipeline.write(TABLE, t, rows()).unwrap_err();
    assert!(matches!(err, PipelineError::RowFailures { .. }));
    assert_eq!(cluster.stores[0].row_count(), 0);
}

#[test]
fn failed_child_cleanup_fails_the_row() {
    let cluster = TestCluster::new();
    let harness = cluster.pipeline(config(3));
    let flaky = Arc::new(FlakyPartition::new(cluster.partitions[0].clone()));
    harness.invoker.add_partition(flaky.clone());

    let parent = cluster.begin(10);
    let child = cluster.begin_child(11, parent);
    cluster.write(child, vec![KvPair::upsert("a", "child")]).unwrap();
    flaky.fail_deletes(true);

    let err = harness
        .pipeline
        .write(TABLE, parent, vec![KvPair::upsert("a", "parent")])
        .unwrap_err();
    assert!(matches!(err, PipelineError::RowFailures { .. }));
    assert_eq!(cluster.transactor.stats().cleanup_failures(), 1);
    assert_eq!(flaky.name(), "data-0");
}

// === Termination ===

#[derive(Debug, Clone, Copy)]
enum Failure {
    RowsNotRun,
    PartitionGone,
    TransportReset,
    TooBusy,
}

fn failure_strategy() -> impl Strategy<Value = Failure> {
    prop_oneof![
        Just(Failure::RowsNotRun),
        Just(Failure::PartitionGone),
        Just(Failure::TransportReset),
        Just(Failure::TooBusy),
    ]
}

fn respond(failure: Failure, writes: &BulkWrites) -> PipelineResult<BulkWritesResult> {
    match failure {
        Failure::RowsNotRun => Ok(BulkWritesResult::new(
            writes
                .writes
                .iter()
                .map(|w| {
                    (0..w.mutations.len()).fold(BulkWriteResult::success(), |r, i| {
                        r.with_failed_row(i, WriteResult::new(WriteCode::NotRun))
                    })
                })
                .collect(),
        )),
        Failure::PartitionGone => Ok(BulkWritesResult::new(
            writes
                .writes
                .iter()
                .map(|_| BulkWriteResult::global(WriteResult::new(WriteCode::NotServingPartition)))
                .collect(),
        )),
        Failure::TransportReset => Err(PipelineError::transport_retryable("connection reset")),
        Failure::TooBusy => Err(PipelineError::too_busy("p0")),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn persistent_failures_always_terminate(
        max_retries in 1u32..8,
        failure in failure_strategy(),
        batch in distinct_upserts_strategy(6),
    ) {
        let cache = Arc::new(StaticRegionCache::new());
        cache.set_partitions(TABLE, vec![
            (Bytes::new(), "p0".to_string()),
            (Bytes::from_static(SPLIT_KEY), "p1".to_string()),
        ]);
        let invoker = Arc::new(MockInvoker::with_fallback(move |writes| respond(failure, writes)));
        let pipeline = WritePipeline::new(cache, invoker.clone(), config(max_retries))
            .with_sleeper(Arc::new(RecordingSleeper::new()));

        let err = pipeline.write(TABLE, TxnId::new(1), batch).unwrap_err();
        match failure {
            Failure::TooBusy => {
                let is_capacity = matches!(err, PipelineError::CapacityExhausted { .. });
                prop_assert!(is_capacity);
                prop_assert_eq!(invoker.call_count(), 2 * max_retries as usize);
            }
            _ => {
                let attempts = match err {
                    PipelineError::WriteFailed { attempts, .. } => attempts,
                    other => return Err(TestCaseError::fail(format!("unexpected error: {other}"))),
                };
                prop_assert_eq!(attempts, max_retries);
                prop_assert_eq!(invoker.call_count(), max_retries as usize);
            }
        }
        prop_assert_eq!(pipeline.status().executing_flushes(), 0);
    }
}
