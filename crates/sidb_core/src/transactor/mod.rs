//! Conflict & write engine.
//!
//! [`Transactor::process_batch`] applies candidate row mutations of one
//! transaction to one partition:
//!
//! 1. The transaction must allow writes.
//! 2. Each row is try-locked; busy rows are reported [`MutationStatus::NotRun`].
//! 3. The newest versions of each locked row are read and checked for
//!    write/write conflicts.
//! 4. An optional [`ConstraintChecker`] judges the value visible to the writer.
//! 5. Surviving rows are rewritten into physical puts and written as one batch.
//! 6. Versions of conflicting descendants are deleted from written rows.
//!
//! Row locks are released when the call returns, on every path.

mod conflict;
mod constraint;

pub use conflict::{ensure_no_write_conflict, ConflictResults};
pub use constraint::{ConstraintChecker, NoOpConstraintChecker, UniqueConstraintChecker};

use crate::data::{
    commit_timestamp_column, fk_counter_column, tombstone_column, KvPair, KvType, LatestRow,
    MutationStatus, Partition,
};
use crate::error::{CoreError, CoreResult};
use crate::read::visible_user_cell;
use crate::stats::WriteEngineStats;
use crate::txn::{TxnSupplier, TxnView};
use crate::types::TxnId;
use bytes::Bytes;
use sidb_codec::{ANTI_TOMBSTONE_VALUE, SUPPRESS_INDEXING_ATTRIBUTE, TOMBSTONE_VALUE};
use sidb_storage::{Column, Delete, Put, RowGuard, RowOutcome, StorageError};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A row that survived conflict detection and will be written.
struct PendingWrite {
    index: usize,
    put: Put,
    children: BTreeSet<TxnId>,
}

/// Applies batches of row mutations under snapshot isolation.
#[derive(Clone)]
pub struct Transactor {
    supplier: Arc<dyn TxnSupplier>,
    stats: Arc<WriteEngineStats>,
    unique_insert_keys: bool,
}

impl fmt::Debug for Transactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transactor")
            .field("stats", &self.stats)
            .field("unique_insert_keys", &self.unique_insert_keys)
            .finish_non_exhaustive()
    }
}

impl Transactor {
    /// Creates an engine resolving transactions through `supplier`.
    pub fn new(supplier: Arc<dyn TxnSupplier>) -> Self {
        Self {
            supplier,
            stats: Arc::new(WriteEngineStats::new()),
            unique_insert_keys: false,
        }
    }

    /// Declares that inserted keys are generated unique, letting inserts
    /// without a constraint checker skip the conflict read. Off by default.
    #[must_use]
    pub fn with_unique_insert_keys(mut self, unique: bool) -> Self {
        self.unique_insert_keys = unique;
        self
    }

    /// Engine statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<WriteEngineStats> {
        &self.stats
    }

    fn writable_transaction(&self, txn_id: TxnId) -> CoreResult<Arc<TxnView>> {
        match self.supplier.find_transaction(txn_id)? {
            Some(txn) if txn.allows_writes() => Ok(txn),
            Some(txn) => Err(CoreError::read_only_modification(
                txn_id,
                format!("transaction is {:?}", txn.effective_state()),
            )),
            None => Err(CoreError::read_only_modification(txn_id, "transaction is read only")),
        }
    }

    /// Applies `pairs` as transaction `txn_id` to `partition`.
    ///
    /// User values are written to `user`. Returns one status per pair, in
    /// input order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadOnlyModification`] if the transaction cannot
    /// write, and any storage or lookup error, which fails the whole batch.
    /// Row-scoped failures are statuses, not errors.
    pub fn process_batch(
        &self,
        partition: &dyn Partition,
        txn_id: TxnId,
        user: &Column,
        pairs: &[KvPair],
        checker: Option<&dyn ConstraintChecker>,
    ) -> CoreResult<Vec<MutationStatus>> {
        let txn = self.writable_transaction(txn_id)?;
        self.stats.record_batch();
        let mut statuses = vec![MutationStatus::Success; pairs.len()];

        let guards = self.lock_rows(partition, pairs, &mut statuses)?;

        let mut pending = Vec::new();
        for (index, pair) in pairs.iter().enumerate() {
            if guards[index].is_none() {
                continue;
            }
            if let Some(write) =
                self.check_row(partition, &txn, user, index, pair, checker, &mut statuses)?
            {
                pending.push(write);
            }
        }

        self.write(partition, &txn, pending, &mut statuses)?;
        drop(guards);
        Ok(statuses)
    }

    fn lock_rows(
        &self,
        partition: &dyn Partition,
        pairs: &[KvPair],
        statuses: &mut [MutationStatus],
    ) -> CoreResult<Vec<Option<RowGuard>>> {
        let mut guards = Vec::with_capacity(pairs.len());
        for (index, pair) in pairs.iter().enumerate() {
            if !partition.contains_row(&pair.row) {
                statuses[index] = MutationStatus::WrongPartition;
                guards.push(None);
                continue;
            }
            let guard = partition.try_row_lock(&pair.row)?;
            if guard.is_none() {
                statuses[index] = MutationStatus::NotRun;
                self.stats.record_not_run();
            }
            guards.push(guard);
        }
        Ok(guards)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_row(
        &self,
        partition: &dyn Partition,
        txn: &TxnView,
        user: &Column,
        index: usize,
        pair: &KvPair,
        checker: Option<&dyn ConstraintChecker>,
        statuses: &mut [MutationStatus],
    ) -> CoreResult<Option<PendingWrite>> {
        let mut results = ConflictResults::default();
        let mut latest = LatestRow::default();
        if pair.kind.needs_read(checker.is_some(), self.unique_insert_keys) {
            latest = LatestRow::from_cells(partition.get_latest(&pair.row)?, user);
            results = match ensure_no_write_conflict(&*self.supplier, txn, pair.kind, &latest) {
                Ok(results) => results,
                Err(CoreError::WriteConflict { existing, .. }) => {
                    statuses[index] = MutationStatus::WriteConflict { existing };
                    self.stats.record_write_conflict();
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            if let Some(checker) = checker {
                let status = self.apply_constraint(partition, txn, user, pair, checker, &results)?;
                if !status.is_success() {
                    trace!(txn_id = %txn.id(), %status, "row fails constraint");
                    statuses[index] = status;
                    self.stats.record_constraint_failure();
                    return Ok(None);
                }
            }
            if results.has_additive_conflicts() {
                self.stats.record_additive_conflict();
                if pair.kind == KvType::Upsert {
                    statuses[index] = MutationStatus::AdditiveUpsertConflict;
                }
            }
        }
        let put = build_put(pair, user, txn.id(), &results, &latest);
        Ok(Some(PendingWrite {
            index,
            put,
            children: results.children,
        }))
    }

    fn apply_constraint(
        &self,
        partition: &dyn Partition,
        txn: &TxnView,
        user: &Column,
        pair: &KvPair,
        checker: &dyn ConstraintChecker,
        results: &ConflictResults,
    ) -> CoreResult<MutationStatus> {
        let columns = [user.clone(), tombstone_column(), commit_timestamp_column()];
        let cells = partition.get_versions(&pair.row, &columns)?;
        let visible = visible_user_cell(&*self.supplier, txn, &cells, user)?;
        let additive = results.has_additive_conflicts();
        if visible.is_none() && !additive {
            return Ok(MutationStatus::Success);
        }
        Ok(checker.check(pair, visible.as_ref(), additive))
    }

    fn write(
        &self,
        partition: &dyn Partition,
        txn: &TxnView,
        pending: Vec<PendingWrite>,
        statuses: &mut [MutationStatus],
    ) -> CoreResult<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let puts: Vec<Put> = pending.iter().map(|w| w.put.clone()).collect();
        let outcomes = partition.write_batch(&puts)?;
        let mut written = 0;
        for (write, outcome) in pending.iter().zip(outcomes) {
            match outcome {
                RowOutcome::Applied => {
                    written += 1;
                    if !write.children.is_empty() {
                        if let Err(e) = self.delete_children(partition, write) {
                            warn!(
                                txn_id = %txn.id(),
                                children = ?write.children,
                                error = %e,
                                "failed to clean up child versions"
                            );
                            statuses[write.index] =
                                MutationStatus::Failed(format!("child cleanup failed: {e}"));
                        }
                    }
                }
                RowOutcome::Failed(reason) => {
                    statuses[write.index] = MutationStatus::Failed(reason);
                }
            }
        }
        self.stats.record_written(written);
        debug!(txn_id = %txn.id(), partition = partition.name(), rows = written, "wrote batch");
        Ok(())
    }

    fn delete_children(&self, partition: &dyn Partition, write: &PendingWrite) -> CoreResult<()> {
        let mut delete = Delete::new(write.put.row.clone());
        for child in &write.children {
            let version = child.as_u64();
            for (column, _, _) in &write.put.cells {
                delete.add_version(column.clone(), version);
            }
            delete.add_version(tombstone_column(), version);
            delete.add_version(commit_timestamp_column(), version);
        }
        let result = partition.delete(&delete);
        self.stats.record_child_cleanup(result.is_err());
        result
    }

    /// Registers transaction `txn_id` as a referrer of parent row `row`.
    ///
    /// The row's foreign-key counter is raised to the transaction id, then
    /// the row is checked for a concurrent delete.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WriteConflict`] if the parent row was deleted or
    /// rewritten by a concurrent transaction.
    pub fn update_counter_column(
        &self,
        partition: &dyn Partition,
        txn_id: TxnId,
        row: &[u8],
        user: &Column,
    ) -> CoreResult<()> {
        let txn = self.writable_transaction(txn_id)?;
        let counter = partition.get_fk_counter(row)?.unwrap_or(0);
        let id = i64::try_from(txn_id.as_u64())
            .map_err(|_| StorageError::Corrupted(format!("transaction id {txn_id} overflows")))?;
        if id > counter {
            partition.increment(row, &fk_counter_column(), id - counter)?;
        }
        let latest = LatestRow::from_cells(partition.get_latest(row)?, user);
        ensure_no_write_conflict(
            &*self.supplier,
            &txn,
            KvType::ForeignKeyParentExistenceCheck,
            &latest,
        )
        .map_err(|e| {
            if matches!(e, CoreError::WriteConflict { .. }) {
                self.stats.record_write_conflict();
            }
            e
        })?;
        Ok(())
    }
}

/// Rewrites a candidate mutation into the physical put of `txn_id`.
fn build_put(
    pair: &KvPair,
    user: &Column,
    txn_id: TxnId,
    results: &ConflictResults,
    latest: &LatestRow,
) -> Put {
    let version = txn_id.as_u64();
    let mut put = Put::new(pair.row.clone());
    match pair.kind {
        KvType::Delete => put.add_cell(tombstone_column(), version, TOMBSTONE_VALUE),
        KvType::EmptyColumn => {
            put.add_cell(user.clone(), version, Bytes::new());
            for column in &latest.other_columns {
                put.add_cell(column.clone(), version, Bytes::new());
            }
        }
        _ => put.add_cell(user.clone(), version, pair.value.clone()),
    }
    put.set_attribute(SUPPRESS_INDEXING_ATTRIBUTE, Bytes::from_static(b"true"));
    if pair.kind != KvType::Delete && results.has_tombstone {
        put.add_cell(tombstone_column(), version, ANTI_TOMBSTONE_VALUE);
    }
    put
}
