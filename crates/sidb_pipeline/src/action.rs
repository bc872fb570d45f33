//! The bulk write retry loop.
//!
//! A [`BulkWriteAction`] drives one submission to completion:
//!
//! 1. Submit the current batch to the invoker.
//! 2. Evaluate every partition response through the [`WritePolicy`].
//! 3. Sleep with exponential backoff if anything was rejected or routing
//!    must be refreshed.
//! 4. Resubmit either the identical batch (after a too-busy signal) or a
//!    batch rebuilt from the rows that need another try.
//!
//! The loop ends when nothing is left to write, or fails once rejected
//! attempts reach `2 * max_retries` or failed attempts reach `max_retries`.

use crate::config::WriteConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::invoker::BulkWritesInvoker;
use crate::policy::{DefaultWritePolicy, WritePolicy, WriteResponse};
use crate::routing::{partition_rows, RegionCache};
use crate::sleeper::{Sleeper, ThreadSleeper};
use crate::stats::{PipelineStatus, WriteStats};
use crate::write::{BulkWrite, BulkWriteResult, BulkWrites};
use sidb_core::{KvPair, TxnId};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

static NEXT_ACTION_ID: AtomicU64 = AtomicU64::new(1);

/// What one attempt asks of the next one.
#[derive(Debug, Default)]
struct Attempt {
    refresh_cache: bool,
    sleep: bool,
    rejected: bool,
    direct_retry: bool,
    retry_rows: Vec<KvPair>,
}

impl Attempt {
    fn should_sleep(&self) -> bool {
        self.sleep || self.refresh_cache
    }

    fn retry_rows(&mut self, rows: impl IntoIterator<Item = KvPair>) {
        debug_assert!(!self.direct_retry);
        self.retry_rows.extend(rows);
    }

    fn direct_retry(&mut self) {
        debug_assert!(self.retry_rows.is_empty());
        self.direct_retry = true;
    }
}

/// Counters carried across attempts.
#[derive(Debug, Default)]
struct Progress {
    attempt: u32,
    rejected: u32,
    failed: u32,
    causes: BTreeSet<String>,
    stats: WriteStats,
}

/// Shared collaborators of every write.
#[derive(Clone)]
pub struct WritePipeline {
    cache: Arc<dyn RegionCache>,
    invoker: Arc<dyn BulkWritesInvoker>,
    config: WriteConfig,
    policy: Arc<dyn WritePolicy>,
    sleeper: Arc<dyn Sleeper>,
    status: Arc<PipelineStatus>,
}

impl WritePipeline {
    /// Creates a pipeline with the default policy and a thread sleeper.
    pub fn new(
        cache: Arc<dyn RegionCache>,
        invoker: Arc<dyn BulkWritesInvoker>,
        config: WriteConfig,
    ) -> Self {
        Self {
            cache,
            invoker,
            config,
            policy: Arc::new(DefaultWritePolicy),
            sleeper: Arc::new(ThreadSleeper),
            status: Arc::new(PipelineStatus::new()),
        }
    }

    /// Replaces the response policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn WritePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the sleeper.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Shares `status` with other pipelines.
    #[must_use]
    pub fn with_status(mut self, status: Arc<PipelineStatus>) -> Self {
        self.status = status;
        self
    }

    /// Process-wide counters.
    pub fn status(&self) -> &Arc<PipelineStatus> {
        &self.status
    }

    /// Routes `pairs` and writes them as transaction `txn_id`.
    ///
    /// # Errors
    ///
    /// See [`BulkWriteAction::run`].
    pub fn write(
        &self,
        table: &str,
        txn_id: TxnId,
        pairs: impl IntoIterator<Item = KvPair>,
    ) -> PipelineResult<WriteStats> {
        let writes = partition_rows(self.cache.as_ref(), table, txn_id, pairs)?;
        self.action(writes).run()
    }

    /// Creates an action for an already routed submission.
    pub fn action(&self, writes: BulkWrites) -> BulkWriteAction {
        BulkWriteAction {
            id: NEXT_ACTION_ID.fetch_add(1, Ordering::Relaxed),
            writes,
            pipeline: self.clone(),
        }
    }
}

impl std::fmt::Debug for WritePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePipeline")
            .field("config", &self.config)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// One submission being driven to completion.
#[derive(Debug)]
pub struct BulkWriteAction {
    id: u64,
    writes: BulkWrites,
    pipeline: WritePipeline,
}

impl BulkWriteAction {
    /// Process-unique id used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs the retry loop.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::CapacityExhausted`] after `2 * max_retries` rejected attempts
    /// - [`PipelineError::WriteFailed`] after `max_retries` failed attempts
    /// - [`PipelineError::RowFailures`] when a partition reports rows that cannot be retried
    /// - any non-retryable invoker error
    pub fn run(self) -> PipelineResult<WriteStats> {
        let status = Arc::clone(&self.pipeline.status);
        let started = Instant::now();
        status.record_start(
            self.writes.num_entries() as u64,
            self.writes.num_partitions() as u64,
            self.writes.heap_size() as u64,
        );
        debug!(
            id = self.id,
            table = %self.writes.table,
            rows = self.writes.num_entries(),
            partitions = self.writes.num_partitions(),
            "starting bulk write"
        );
        let result = self.execute();
        status.record_complete(started.elapsed());
        result
    }

    fn execute(&self) -> PipelineResult<WriteStats> {
        let config = &self.pipeline.config;
        let mut progress = Progress::default();
        progress.stats.rows_submitted = self.writes.num_entries() as u64;
        let mut queue = VecDeque::from([(self.writes.clone(), false)]);

        while let Some((next, refreshed)) = queue.pop_front() {
            progress.attempt += 1;
            if progress.attempt > 100 && progress.attempt % 50 == 0 {
                warn!(
                    id = self.id,
                    table = %next.table,
                    rows = next.num_entries(),
                    attempt = progress.attempt,
                    "bulk write is taking a long time"
                );
            }

            let attempt = self.execute_single(&next, refreshed, &mut progress)?;

            if attempt.rejected {
                progress.rejected += 1;
                progress.stats.rejected += 1;
                self.pipeline.status.record_rejected();
            }
            let rebuild = !attempt.direct_retry && !attempt.retry_rows.is_empty();
            if rebuild {
                progress.failed += 1;
            }
            if attempt.direct_retry || rebuild {
                self.check_bounds(&progress)?;
            }

            if attempt.should_sleep() {
                let mut pause = config.pause;
                if attempt.rejected {
                    pause /= 2;
                }
                let wait = config.wait_time(progress.attempt, pause);
                trace!(id = self.id, attempt = progress.attempt, ?wait, "backing off");
                self.pipeline.sleeper.sleep(wait);
                progress.stats.sleep_time += wait;
            }

            if attempt.direct_retry {
                queue.push_back((next, refreshed));
            } else if rebuild {
                if attempt.refresh_cache {
                    self.pipeline.cache.invalidate(&next.table);
                }
                debug!(
                    id = self.id,
                    rows = attempt.retry_rows.len(),
                    refresh_cache = attempt.refresh_cache,
                    "rebuilding retry batch"
                );
                let rebuilt = partition_rows(
                    self.pipeline.cache.as_ref(),
                    &next.table,
                    next.txn_id,
                    attempt.retry_rows,
                )?;
                queue.push_back((rebuilt, attempt.refresh_cache));
            }
        }

        progress.stats.attempts = progress.attempt;
        progress.stats.retries = progress.attempt.saturating_sub(1);
        Ok(progress.stats)
    }

    fn check_bounds(&self, progress: &Progress) -> PipelineResult<()> {
        let config = &self.pipeline.config;
        if progress.rejected >= config.max_rejected_attempts() {
            warn!(id = self.id, table = %self.writes.table, rejected = progress.rejected, "giving up on rejected write");
            return Err(PipelineError::CapacityExhausted {
                table: self.writes.table.clone(),
            });
        }
        if progress.failed >= config.max_failed_attempts() {
            warn!(id = self.id, table = %self.writes.table, failed = progress.failed, "giving up on failing write");
            return Err(PipelineError::WriteFailed {
                table: self.writes.table.clone(),
                attempts: progress.failed,
                causes: progress.causes.iter().cloned().collect(),
            });
        }
        Ok(())
    }

    fn execute_single(
        &self,
        writes: &BulkWrites,
        refreshed: bool,
        progress: &mut Progress,
    ) -> PipelineResult<Attempt> {
        let mut attempt = Attempt::default();
        if writes.num_entries() == 0 {
            debug!(id = self.id, "no rows to write");
            return Ok(attempt);
        }

        let started = Instant::now();
        let response = self.pipeline.invoker.invoke(writes, refreshed);
        progress.stats.write_time += started.elapsed();

        let results = match response {
            Ok(results) => results,
            Err(e) => {
                progress.stats.global_errors += 1;
                self.handle_global_error(e, writes, &mut attempt, progress)?;
                return Ok(attempt);
            }
        };
        if results.results.len() != writes.writes.len() {
            progress.stats.global_errors += 1;
            return Err(PipelineError::InvalidResponse(format!(
                "{} results for {} writes",
                results.results.len(),
                writes.writes.len()
            )));
        }

        for (write, result) in writes.writes.iter().zip(&results.results) {
            self.evaluate(writes, write, result, &mut attempt, progress)?;
        }
        Ok(attempt)
    }

    fn evaluate(
        &self,
        writes: &BulkWrites,
        write: &BulkWrite,
        result: &BulkWriteResult,
        attempt: &mut Attempt,
        progress: &mut Progress,
    ) -> PipelineResult<()> {
        let policy = &self.pipeline.policy;
        match policy.process_global_result(result) {
            WriteResponse::Success | WriteResponse::Ignore => Ok(()),
            WriteResponse::ThrowError => {
                progress.stats.global_errors += 1;
                Err(self.row_failures(writes, result))
            }
            WriteResponse::Retry => {
                debug!(
                    id = self.id,
                    partition = %write.partition,
                    code = ?result.global.code,
                    "partition rejected write, retrying"
                );
                attempt.rejected = true;
                attempt.retry_rows(write.mutations.iter().cloned());
                attempt.refresh_cache |= result.global.refresh_cache();
                attempt.sleep = true;
                progress.causes.insert(result.global.cause());
                Ok(())
            }
            WriteResponse::Partial => {
                progress.stats.partial_failures += 1;
                match policy.partial_failure(result, write) {
                    WriteResponse::ThrowError => Err(self.row_failures(writes, result)),
                    WriteResponse::Retry => {
                        let failed: Vec<KvPair> = result
                            .failed_rows
                            .iter()
                            .filter(|(_, row)| row.code.is_retryable())
                            .filter_map(|(index, _)| write.mutations.get(*index).cloned())
                            .collect();
                        debug!(
                            id = self.id,
                            partition = %write.partition,
                            rows = failed.len(),
                            "retrying partially failed write"
                        );
                        if !failed.is_empty() {
                            attempt.retry_rows(failed);
                            attempt.refresh_cache |=
                                result.failed_rows.values().any(|row| row.refresh_cache());
                            attempt.sleep = true;
                            progress.causes.extend(result.causes());
                        }
                        Ok(())
                    }
                    response => {
                        debug!(id = self.id, ?response, "ignoring partial failure");
                        Ok(())
                    }
                }
            }
        }
    }

    fn handle_global_error(
        &self,
        error: PipelineError,
        writes: &BulkWrites,
        attempt: &mut Attempt,
        progress: &mut Progress,
    ) -> PipelineResult<()> {
        if error.is_too_busy() {
            debug!(id = self.id, error = %error, "retrying identical batch");
            attempt.rejected = true;
            attempt.sleep = true;
            attempt.direct_retry();
            return Ok(());
        }
        match self.pipeline.policy.global_error(&error) {
            WriteResponse::Retry => {
                debug!(id = self.id, error = %error, "retrying after global error");
                progress.causes.insert(error.to_string());
                attempt.rejected = true;
                attempt.sleep = true;
                for write in &writes.writes {
                    attempt.retry_rows(write.mutations.iter().cloned());
                }
                Ok(())
            }
            WriteResponse::ThrowError => Err(error),
            response => {
                debug!(id = self.id, ?response, error = %error, "ignoring global error");
                Ok(())
            }
        }
    }

    fn row_failures(&self, writes: &BulkWrites, result: &BulkWriteResult) -> PipelineError {
        PipelineError::RowFailures {
            table: writes.table.clone(),
            causes: result.causes(),
        }
    }
}
