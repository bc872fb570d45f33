//! Transaction records held by one bucket partition.

use crate::clock::Clock;
use crate::config::TxnConfig;
use crate::error::{CoreError, CoreResult};
use crate::store::filter::ActiveTxnFilter;
use crate::txn::{clamp, txn_column, TxnRecord};
use crate::types::{TxnId, UNKNOWN_TIMESTAMP};
use bytes::Bytes;
use sidb_codec::{
    append_destination_table, bucket_scan_range, encode_timestamp, txn_id_from_row_key, txn_row_key,
    TxnColumn, TxnState,
};
use sidb_storage::{AllRows, Column, Put, RowGuard, RowStore, ScanFilter};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

const LOCK_ATTEMPTS: usize = 10_000;

/// CRUD over the transaction rows of one bucket.
///
/// Every transaction row is keyed `bucket ‖ bigEndian(id)`; all cells of a
/// row are written at version `id`.
pub struct RegionTxnStore {
    store: Arc<dyn RowStore>,
    clock: Arc<dyn Clock>,
    config: TxnConfig,
}

impl fmt::Debug for RegionTxnStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionTxnStore")
            .field("partition", &self.store.name())
            .field("bucket", &self.bucket())
            .finish_non_exhaustive()
    }
}

impl RegionTxnStore {
    /// Creates a region store over `store`.
    pub fn new(store: Arc<dyn RowStore>, clock: Arc<dyn Clock>, config: TxnConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Bucket served by this region: the first byte of its start key.
    #[must_use]
    pub fn bucket(&self) -> u8 {
        self.store.key_range().start.first().copied().unwrap_or(0)
    }

    /// Underlying row store.
    #[must_use]
    pub fn row_store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    fn row_key(&self, id: TxnId) -> [u8; 9] {
        txn_row_key(id.as_u64(), self.config.bucket_count)
    }

    fn lock(&self, id: TxnId, key: &[u8]) -> CoreResult<RowGuard> {
        for _ in 0..LOCK_ATTEMPTS {
            if let Some(guard) = self.store.try_lock_row(key)? {
                return Ok(guard);
            }
            std::thread::yield_now();
        }
        Err(CoreError::RowLockUnavailable { txn_id: id })
    }

    fn read(&self, id: TxnId, key: &[u8]) -> CoreResult<Option<TxnRecord>> {
        let columns: Vec<Column> = TxnColumn::ALL.iter().map(|c| txn_column(*c)).collect();
        let cells = self.store.get(key, &columns, 1)?;
        TxnRecord::decode(id, &cells)
    }

    fn write(&self, id: TxnId, key: &[u8], cells: Vec<(TxnColumn, Bytes)>) -> CoreResult<()> {
        let mut put = Put::new(Bytes::copy_from_slice(key));
        for (column, value) in cells {
            put.add_cell(txn_column(column), id.as_u64(), value);
        }
        self.store.put(&put)?;
        Ok(())
    }

    fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Reads a transaction record.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read or decoded.
    pub fn get_transaction(&self, id: TxnId) -> CoreResult<Option<TxnRecord>> {
        self.read(id, &self.row_key(id))
    }

    /// Writes the initial record. An existing record is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be locked or written.
    pub fn record_transaction(&self, record: &TxnRecord) -> CoreResult<()> {
        let key = self.row_key(record.id);
        let _guard = self.lock(record.id, &key)?;
        if self.read(record.id, &key)?.is_some() {
            debug!(txn_id = %record.id, "transaction already recorded");
            return Ok(());
        }
        let cells = record.creation_cells(self.now())?;
        self.write(record.id, &key, cells)?;
        trace!(txn_id = %record.id, parent = ?record.parent_id, "recorded transaction");
        Ok(())
    }

    /// Refreshes the keep-alive of an active transaction.
    ///
    /// Returns false if the transaction is missing or no longer active.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionTimeout`] if the previous keep-alive is
    /// older than the timeout while the transaction is still active.
    pub fn keep_alive(&self, id: TxnId) -> CoreResult<bool> {
        let key = self.row_key(id);
        let _guard = self.lock(id, &key)?;
        let Some(record) = self.read(id, &key)? else {
            warn!(txn_id = %id, "keep alive for a transaction with no state");
            return Ok(false);
        };
        if record.state != TxnState::Active {
            return Ok(false);
        }
        let now = self.now();
        if record.timed_out(now, self.config.timeout_millis()) {
            return Err(CoreError::TransactionTimeout { txn_id: id });
        }
        let next = record.keep_alive_ms.map_or(now, |prev| prev.max(now));
        self.write(id, &key, vec![(TxnColumn::KeepAlive, encode_timestamp(clamp(next)))])?;
        Ok(true)
    }

    /// Records a commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] if the record is missing and
    /// [`CoreError::CannotCommit`] if the transaction is no longer active.
    pub fn record_commit(&self, id: TxnId, commit_ts: i64) -> CoreResult<()> {
        let key = self.row_key(id);
        let _guard = self.lock(id, &key)?;
        let record = self
            .read(id, &key)?
            .ok_or(CoreError::TransactionNotFound { txn_id: id })?;
        let state = record.adjusted_state(self.now(), self.config.timeout_millis());
        if state != TxnState::Active {
            return Err(CoreError::CannotCommit { txn_id: id, state });
        }
        self.write(
            id,
            &key,
            vec![
                (TxnColumn::State, Bytes::copy_from_slice(&TxnState::Committed.encode())),
                (TxnColumn::Commit, encode_timestamp(commit_ts)),
            ],
        )?;
        debug!(txn_id = %id, commit_ts, "recorded commit");
        Ok(())
    }

    /// Records the global commit timestamp of a nested transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] if the record is missing.
    pub fn record_global_commit(&self, id: TxnId, global_commit_ts: i64) -> CoreResult<()> {
        let key = self.row_key(id);
        let _guard = self.lock(id, &key)?;
        if self.read(id, &key)?.is_none() {
            return Err(CoreError::TransactionNotFound { txn_id: id });
        }
        self.write(id, &key, vec![(TxnColumn::GlobalCommit, encode_timestamp(global_commit_ts))])?;
        debug!(txn_id = %id, global_commit_ts, "recorded global commit");
        Ok(())
    }

    /// Records a rollback, resetting both commit timestamps to -1.
    ///
    /// A missing record is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction already committed.
    pub fn record_rollback(&self, id: TxnId) -> CoreResult<()> {
        let key = self.row_key(id);
        let _guard = self.lock(id, &key)?;
        match self.read(id, &key)? {
            None => {
                debug!(txn_id = %id, "rollback of unrecorded transaction");
                return Ok(());
            }
            Some(record) if record.state == TxnState::Committed => {
                return Err(CoreError::invalid_operation(format!(
                    "cannot roll back committed transaction {id}"
                )));
            }
            Some(_) => {}
        }
        self.write(
            id,
            &key,
            vec![
                (TxnColumn::State, Bytes::copy_from_slice(&TxnState::RolledBack.encode())),
                (TxnColumn::Commit, encode_timestamp(UNKNOWN_TIMESTAMP)),
                (TxnColumn::GlobalCommit, encode_timestamp(UNKNOWN_TIMESTAMP)),
            ],
        )?;
        debug!(txn_id = %id, "recorded rollback");
        Ok(())
    }

    /// Adds `table` to the destination tables.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadOnlyModification`] if the record is missing.
    pub fn add_destination_table(&self, id: TxnId, table: &[u8]) -> CoreResult<()> {
        let key = self.row_key(id);
        let _guard = self.lock(id, &key)?;
        let record = self.read(id, &key)?.ok_or_else(|| {
            CoreError::read_only_modification(id, "transaction was never recorded")
        })?;
        let existing = sidb_codec::encode_destination_tables(&record.destination_tables);
        let updated = append_destination_table(&existing, table);
        if updated != existing {
            self.write(id, &key, vec![(TxnColumn::DestinationTable, updated)])?;
        }
        Ok(())
    }

    /// Returns the state with the keep-alive timeout applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read.
    pub fn get_state(&self, id: TxnId) -> CoreResult<Option<TxnState>> {
        let now = self.now();
        Ok(self
            .get_transaction(id)?
            .map(|r| r.adjusted_state(now, self.config.timeout_millis())))
    }

    /// Returns the recorded commit timestamp, -1 if not committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read.
    pub fn get_commit_timestamp(&self, id: TxnId) -> CoreResult<Option<i64>> {
        Ok(self.get_transaction(id)?.map(|r| r.commit_ts))
    }

    /// Scans records that may be active with ids in `[after_ts, before_ts]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails or a row cannot be decoded.
    pub fn get_active_transactions(
        &self,
        after_ts: u64,
        before_ts: u64,
        destination_table: Option<&[u8]>,
    ) -> CoreResult<Vec<TxnRecord>> {
        let mut filter = ActiveTxnFilter::new(
            after_ts,
            before_ts,
            destination_table,
            self.now(),
            self.config.timeout_millis(),
        );
        self.scan(after_ts, before_ts, &mut filter)
    }

    /// Scans every record with ids in `[min_ts, max_ts]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails or a row cannot be decoded.
    pub fn get_all_transactions(&self, min_ts: u64, max_ts: u64) -> CoreResult<Vec<TxnRecord>> {
        self.scan(min_ts, max_ts, &mut AllRows)
    }

    fn scan(&self, after: u64, before: u64, filter: &mut dyn ScanFilter) -> CoreResult<Vec<TxnRecord>> {
        if after > before {
            return Ok(Vec::new());
        }
        let (start, stop) = bucket_scan_range(self.bucket(), after, before);
        let rows = self.store.scan(&start, &stop, filter)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id = TxnId::new(txn_id_from_row_key(&row.row)?);
            if let Some(record) = TxnRecord::decode(id, &row.cells)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use sidb_storage::{KeyRange, MemoryStore};
    use std::time::Duration;

    fn region() -> (RegionTxnStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let config = TxnConfig::new()
            .bucket_count(1)
            .keep_alive_timeout(Duration::from_millis(100));
        let store = Arc::new(MemoryStore::with_range("txn-0", KeyRange::full()));
        (RegionTxnStore::new(store, clock.clone(), config), clock)
    }

    #[test]
    fn record_transaction_is_idempotent() {
        let (region, clock) = region();
        let id = TxnId::new(10);
        region.record_transaction(&TxnRecord::new(id)).unwrap();
        clock.advance(Duration::from_millis(50));
        region
            .record_transaction(&TxnRecord::new(id).with_parent(TxnId::new(3)))
            .unwrap();

        let record = region.get_transaction(id).unwrap().unwrap();
        assert_eq!(record.parent_id, None);
        assert_eq!(record.keep_alive_ms, Some(1_000));
    }

    #[test]
    fn keep_alive_refreshes_active_only() {
        let (region, clock) = region();
        let id = TxnId::new(10);
        assert!(!region.keep_alive(id).unwrap());

        region.record_transaction(&TxnRecord::new(id)).unwrap();
        clock.advance(Duration::from_millis(60));
        assert!(region.keep_alive(id).unwrap());
        assert_eq!(region.get_transaction(id).unwrap().unwrap().keep_alive_ms, Some(1_060));

        region.record_commit(id, 20).unwrap();
        assert!(!region.keep_alive(id).unwrap());
    }

    #[test]
    fn keep_alive_after_timeout_fails() {
        let (region, clock) = region();
        let id = TxnId::new(10);
        region.record_transaction(&TxnRecord::new(id)).unwrap();
        clock.advance(Duration::from_millis(101));
        let err = region.keep_alive(id).unwrap_err();
        assert!(matches!(err, CoreError::TransactionTimeout { .. }));
        assert_eq!(region.get_state(id).unwrap(), Some(TxnState::RolledBack));
    }

    #[test]
    fn commit_then_rollback_round_trip() {
        let (region, _) = region();
        let a = TxnId::new(10);
        let b = TxnId::new(11);
        region.record_transaction(&TxnRecord::new(a)).unwrap();
        region.record_transaction(&TxnRecord::new(b)).unwrap();

        region.record_commit(a, 15).unwrap();
        assert_eq!(region.get_state(a).unwrap(), Some(TxnState::Committed));
        assert_eq!(region.get_commit_timestamp(a).unwrap(), Some(15));

        region.record_rollback(b).unwrap();
        assert_eq!(region.get_state(b).unwrap(), Some(TxnState::RolledBack));
        assert_eq!(region.get_commit_timestamp(b).unwrap(), Some(UNKNOWN_TIMESTAMP));
        assert!(matches!(
            region.record_commit(b, 16),
            Err(CoreError::CannotCommit { state: TxnState::RolledBack, .. })
        ));
        assert!(region.record_rollback(a).is_err());
    }

    #[test]
    fn destination_tables_accumulate() {
        let (region, _) = region();
        let id = TxnId::new(10);
        assert!(matches!(
            region.add_destination_table(id, b"orders"),
            Err(CoreError::ReadOnlyModification { .. })
        ));
        region.record_transaction(&TxnRecord::new(id)).unwrap();
        region.add_destination_table(id, b"orders").unwrap();
        region.add_destination_table(id, b"items").unwrap();
        region.add_destination_table(id, b"orders").unwrap();
        let record = region.get_transaction(id).unwrap().unwrap();
        assert_eq!(
            record.destination_tables,
            vec![Bytes::from_static(b"orders"), Bytes::from_static(b"items")]
        );
    }

    #[test]
    fn active_scan_uses_filter() {
        let (region, clock) = region();
        for id in [10, 11, 12, 13] {
            region.record_transaction(&TxnRecord::new(TxnId::new(id))).unwrap();
        }
        region.record_commit(TxnId::new(11), 20).unwrap();
        region.record_rollback(TxnId::new(12)).unwrap();
        region.add_destination_table(TxnId::new(13), b"orders").unwrap();

        let ids: Vec<u64> = region
            .get_active_transactions(0, 100, None)
            .unwrap()
            .iter()
            .map(|r| r.id.as_u64())
            .collect();
        assert_eq!(ids, vec![10, 13]);

        let ids: Vec<u64> = region
            .get_active_transactions(0, 100, Some(&b"orders"[..]))
            .unwrap()
            .iter()
            .map(|r| r.id.as_u64())
            .collect();
        assert_eq!(ids, vec![13]);

        let ids: Vec<u64> = region
            .get_active_transactions(11, 12, None)
            .unwrap()
            .iter()
            .map(|r| r.id.as_u64())
            .collect();
        assert!(ids.is_empty());

        clock.advance(Duration::from_millis(500));
        assert!(region.get_active_transactions(0, 100, None).unwrap().is_empty());
        assert_eq!(region.get_all_transactions(0, 100).unwrap().len(), 4);
    }
}
