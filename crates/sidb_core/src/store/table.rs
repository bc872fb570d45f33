//! The partitioned transaction table.

use crate::clock::Clock;
use crate::config::TxnConfig;
use crate::error::{CoreError, CoreResult};
use crate::store::region::RegionTxnStore;
use crate::store::resolver::TransactionResolver;
use crate::txn::{CompletedTxnCache, TxnRecord, TxnSupplier, TxnView};
use crate::types::TxnId;
use sidb_codec::{bucket_of, TxnState};
use sidb_storage::{KeyRange, MemoryStore, RowStore};
use std::sync::Arc;
use tracing::trace;

/// Transaction record store spread over one partition per bucket.
///
/// Point operations are routed to the partition owning the id's bucket.
/// Range scans fan out to every partition and merge in begin-timestamp order.
///
/// # Thread Safety
///
/// All operations take `&self`. Writes to one transaction row are serialized
/// through that row's lock; different transactions never contend.
///
/// # Resolutions
///
/// Scans and point reads only queue the rollbacks and global commits they
/// discover. The owner drains the queue, either by calling
/// [`run_pending_resolutions`](Self::run_pending_resolutions) or by running a
/// [`ResolverWorker`](crate::store::ResolverWorker) for the store's lifetime.
#[derive(Debug)]
pub struct TxnStore {
    regions: Vec<RegionTxnStore>,
    config: TxnConfig,
    clock: Arc<dyn Clock>,
    cache: CompletedTxnCache,
    resolver: TransactionResolver,
}

impl TxnStore {
    /// Creates a store over one row store per bucket.
    ///
    /// Each row store's key range must start with its bucket byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the partitions do
    /// not cover every bucket exactly once.
    pub fn new(
        stores: Vec<Arc<dyn RowStore>>,
        config: TxnConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let buckets = usize::from(config.bucket_count);
        if stores.len() != buckets {
            return Err(CoreError::invalid_operation(format!(
                "expected {buckets} transaction partitions, got {}",
                stores.len()
            )));
        }
        let mut slots: Vec<Option<RegionTxnStore>> = (0..buckets).map(|_| None).collect();
        for store in stores {
            let region = RegionTxnStore::new(store, Arc::clone(&clock), config.clone());
            let bucket = usize::from(region.bucket());
            match slots.get_mut(bucket) {
                Some(slot @ None) => *slot = Some(region),
                Some(Some(_)) => {
                    return Err(CoreError::invalid_operation(format!(
                        "bucket {bucket} served by more than one partition"
                    )))
                }
                None => {
                    return Err(CoreError::invalid_operation(format!(
                        "partition bucket {bucket} out of range"
                    )))
                }
            }
        }
        let regions = slots.into_iter().flatten().collect();
        Ok(Self {
            regions,
            cache: CompletedTxnCache::new(config.completed_txn_cache_size),
            config,
            clock,
            resolver: TransactionResolver::new(),
        })
    }

    /// Creates a store backed by in-memory partitions.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn in_memory(config: TxnConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        config.validate()?;
        let stores = (0..config.bucket_count)
            .map(|bucket| {
                let start = vec![bucket as u8];
                let end = if bucket == 255 {
                    Vec::new()
                } else {
                    vec![bucket as u8 + 1]
                };
                Arc::new(MemoryStore::with_range(
                    format!("txn-{bucket:02x}"),
                    KeyRange::new(start, end),
                )) as Arc<dyn RowStore>
            })
            .collect();
        Self::new(stores, config, clock)
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &TxnConfig {
        &self.config
    }

    /// Pending-resolution queue.
    #[must_use]
    pub fn resolver(&self) -> &TransactionResolver {
        &self.resolver
    }

    /// Cache of completed transaction views.
    #[must_use]
    pub fn completed_cache(&self) -> &CompletedTxnCache {
        &self.cache
    }

    /// Applies every queued resolution. Returns the number applied.
    pub fn run_pending_resolutions(&self) -> usize {
        self.resolver.run_pending(self)
    }

    fn region(&self, id: TxnId) -> &RegionTxnStore {
        &self.regions[usize::from(bucket_of(id.as_u64(), self.config.bucket_count))]
    }

    fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Reads a record without queueing any resolution.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read or decoded.
    pub fn read_record(&self, id: TxnId) -> CoreResult<Option<TxnRecord>> {
        self.region(id).get_transaction(id)
    }

    /// Reads a record.
    ///
    /// `None` means the transaction was never recorded, which is the case
    /// for read-only transactions. A record that is timed out, or a
    /// committed child still lacking its global commit timestamp, is queued
    /// for resolution.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read or decoded.
    pub fn get_transaction(&self, id: TxnId) -> CoreResult<Option<TxnRecord>> {
        let record = self.read_record(id)?;
        if let Some(record) = &record {
            self.flag_timed_out(record);
            if record.state == TxnState::Committed && record.is_child() && record.global_commit_ts < 0 {
                self.resolver.resolve_global_commit(id);
            }
        }
        Ok(record)
    }

    fn flag_timed_out(&self, record: &TxnRecord) {
        if record.timed_out(self.now(), self.config.timeout_millis()) {
            self.resolver.resolve_timed_out(record.id);
        }
    }

    /// Writes the initial record of a transaction. Never overwrites.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be locked or written.
    pub fn record_transaction(&self, record: &TxnRecord) -> CoreResult<()> {
        self.region(record.id).record_transaction(record)
    }

    /// Refreshes a keep-alive. See [`RegionTxnStore::keep_alive`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionTimeout`] if the transaction already
    /// timed out.
    pub fn keep_alive(&self, id: TxnId) -> CoreResult<bool> {
        self.region(id).keep_alive(id)
    }

    /// Records a commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is missing or not active.
    pub fn record_commit(&self, id: TxnId, commit_ts: i64) -> CoreResult<()> {
        self.region(id).record_commit(id, commit_ts)?;
        self.cache.invalidate(id);
        Ok(())
    }

    /// Records a global commit timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is missing.
    pub fn record_global_commit(&self, id: TxnId, global_commit_ts: i64) -> CoreResult<()> {
        self.region(id).record_global_commit(id, global_commit_ts)?;
        self.cache.invalidate(id);
        Ok(())
    }

    /// Records a rollback.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction already committed.
    pub fn record_rollback(&self, id: TxnId) -> CoreResult<()> {
        self.region(id).record_rollback(id)?;
        self.cache.invalidate(id);
        Ok(())
    }

    /// Adds a destination table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadOnlyModification`] if the transaction was
    /// never recorded.
    pub fn add_destination_table(&self, id: TxnId, table: &[u8]) -> CoreResult<()> {
        self.region(id).add_destination_table(id, table)
    }

    /// State with the keep-alive timeout applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read.
    pub fn get_state(&self, id: TxnId) -> CoreResult<Option<TxnState>> {
        self.region(id).get_state(id)
    }

    /// Commit timestamp, -1 if not committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be read.
    pub fn get_commit_timestamp(&self, id: TxnId) -> CoreResult<Option<i64>> {
        self.region(id).get_commit_timestamp(id)
    }

    /// Ids of transactions active in `[after_ts, before_ts]`.
    ///
    /// # Errors
    ///
    /// Returns an error if a partition scan fails.
    pub fn get_active_txn_ids(
        &self,
        after_ts: u64,
        before_ts: u64,
        destination_table: Option<&[u8]>,
    ) -> CoreResult<Vec<TxnId>> {
        Ok(self
            .get_active_txns(after_ts, before_ts, destination_table)?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    /// Transactions active in `[after_ts, before_ts]`, by begin timestamp.
    ///
    /// Children are classified by their parent: an active parent keeps the
    /// child, a rolled-back parent queues the child's rollback, a committed
    /// parent queues its global commit. Only the first case is returned.
    /// Queued resolutions are not applied here.
    ///
    /// # Errors
    ///
    /// Returns an error if a partition scan or a parent lookup fails.
    pub fn get_active_txns(
        &self,
        after_ts: u64,
        before_ts: u64,
        destination_table: Option<&[u8]>,
    ) -> CoreResult<Vec<TxnRecord>> {
        let mut found = Vec::new();
        for region in &self.regions {
            found.extend(region.get_active_transactions(after_ts, before_ts, destination_table)?);
        }
        found.sort_by_key(|r| r.id);

        let mut active = Vec::with_capacity(found.len());
        for record in found {
            let Some(parent_id) = record.parent_id else {
                active.push(record);
                continue;
            };
            let parent = self.find_transaction(parent_id)?;
            match parent.map(|p| p.effective_state()) {
                Some(TxnState::RolledBack) => {
                    trace!(txn_id = %record.id, parent = %parent_id, "parent rolled back");
                    self.resolver.resolve_timed_out(record.id);
                }
                Some(TxnState::Committed) => {
                    trace!(txn_id = %record.id, parent = %parent_id, "parent committed");
                    self.resolver.resolve_global_commit(record.id);
                }
                Some(TxnState::Active) | None => active.push(record),
            }
        }
        Ok(active)
    }

    /// Every recorded transaction in `[min_ts, max_ts]`, by begin timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if a partition scan fails.
    pub fn get_all_txns(&self, min_ts: u64, max_ts: u64) -> CoreResult<Vec<TxnRecord>> {
        let mut all = Vec::new();
        for region in &self.regions {
            all.extend(region.get_all_transactions(min_ts, max_ts)?);
        }
        all.sort_by_key(|r| r.id);
        Ok(all)
    }
}

impl TxnSupplier for TxnStore {
    fn find_transaction(&self, id: TxnId) -> CoreResult<Option<Arc<TxnView>>> {
        if let Some(view) = self.cache.get(id) {
            return Ok(Some(view));
        }
        let Some(record) = self.read_record(id)? else {
            return Ok(None);
        };
        self.flag_timed_out(&record);
        let parent = match record.parent_id {
            Some(parent_id) if parent_id != id => self.find_transaction(parent_id)?,
            _ => None,
        };
        let state = record.adjusted_state(self.now(), self.config.timeout_millis());
        let view = Arc::new(TxnView::new(record, state, parent));
        self.cache.offer(&view);
        Ok(Some(view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn store(buckets: u16) -> (TxnStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let config = TxnConfig::new()
            .bucket_count(buckets)
            .keep_alive_timeout(Duration::from_millis(1_000));
        (TxnStore::in_memory(config, clock.clone()).unwrap(), clock)
    }

    fn begin(store: &TxnStore, id: u64) -> TxnId {
        let id = TxnId::new(id);
        store.record_transaction(&TxnRecord::new(id)).unwrap();
        id
    }

    fn begin_child(store: &TxnStore, id: u64, parent: TxnId) -> TxnId {
        let id = TxnId::new(id);
        store
            .record_transaction(&TxnRecord::new(id).with_parent(parent))
            .unwrap();
        id
    }

    #[test]
    fn partitions_must_cover_each_bucket() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let config = TxnConfig::new().bucket_count(2);
        let one: Vec<Arc<dyn RowStore>> = vec![Arc::new(MemoryStore::with_range(
            "a",
            KeyRange::new(vec![0u8], vec![1u8]),
        ))];
        assert!(TxnStore::new(one, config.clone(), Arc::clone(&clock)).is_err());

        let twice: Vec<Arc<dyn RowStore>> = vec![
            Arc::new(MemoryStore::with_range("a", KeyRange::new(vec![0u8], vec![1u8]))),
            Arc::new(MemoryStore::with_range("b", KeyRange::new(vec![0u8], vec![1u8]))),
        ];
        assert!(TxnStore::new(twice, config.clone(), Arc::clone(&clock)).is_err());

        let bad_config = TxnConfig::new().bucket_count(3);
        assert!(TxnStore::in_memory(bad_config, clock).is_err());
    }

    #[test]
    fn ids_are_routed_across_buckets() {
        let (store, _) = store(4);
        for id in 100..108 {
            begin(&store, id);
        }
        let all: Vec<u64> = store
            .get_all_txns(0, u64::MAX)
            .unwrap()
            .iter()
            .map(|r| r.id.as_u64())
            .collect();
        assert_eq!(all, (100..108).collect::<Vec<_>>());
        assert_eq!(store.get_all_txns(102, 104).unwrap().len(), 3);
    }

    #[test]
    fn active_scan_merges_in_begin_order() {
        let (store, _) = store(4);
        for id in [13, 10, 12, 11] {
            begin(&store, id);
        }
        store.record_commit(TxnId::new(12), 20).unwrap();
        let ids = store.get_active_txn_ids(0, 100, None).unwrap();
        assert_eq!(ids, vec![TxnId::new(10), TxnId::new(11), TxnId::new(13)]);
    }

    #[test]
    fn children_are_classified_by_parent() {
        let (store, _) = store(4);
        let live = begin(&store, 10);
        let dead = begin(&store, 11);
        let done = begin(&store, 12);
        let a = begin_child(&store, 13, live);
        let b = begin_child(&store, 14, dead);
        let c = begin_child(&store, 15, done);
        store.record_commit(c, 16).unwrap();
        store.record_commit(done, 17).unwrap();
        store.record_rollback(dead).unwrap();

        let ids = store.get_active_txn_ids(13, 15, None).unwrap();
        assert_eq!(ids, vec![a]);
        assert!(store.resolver().is_pending(crate::store::Resolution::TimedOut(b)));
        assert!(store.resolver().is_pending(crate::store::Resolution::GlobalCommit(c)));

        store.run_pending_resolutions();
        assert_eq!(store.get_state(b).unwrap(), Some(TxnState::RolledBack));
        assert_eq!(store.read_record(c).unwrap().unwrap().global_commit_ts, 17);
    }

    #[test]
    fn committed_child_of_active_parent_stays_active() {
        let (store, _) = store(2);
        let parent = begin(&store, 30);
        let child = begin_child(&store, 31, parent);
        store.record_commit(child, 32).unwrap();
        assert_eq!(store.get_active_txn_ids(30, 31, None).unwrap(), vec![parent, child]);
    }

    #[test]
    fn supplier_builds_and_caches_views() {
        let (store, _) = store(2);
        let parent = begin(&store, 40);
        let child = begin_child(&store, 41, parent);

        let view = store.get_transaction_view(child);
        assert_eq!(view.parent().map(|p| p.id()), Some(parent));
        assert_eq!(view.effective_state(), TxnState::Active);
        assert!(store.completed_cache().is_empty());

        store.record_commit(child, 42).unwrap();
        store.record_commit(parent, 43).unwrap();
        let view = store.get_transaction_view(child);
        assert_eq!(view.effective_state(), TxnState::Committed);
        assert_eq!(view.effective_commit_timestamp(), 43);
        assert_eq!(store.completed_cache().len(), 2);

        assert!(store.find_transaction(TxnId::new(99)).unwrap().is_none());
        assert!(matches!(
            TxnSupplier::get_transaction(&store, TxnId::new(99)),
            Err(CoreError::TransactionNotFound { .. })
        ));
    }

    #[test]
    fn timed_out_view_is_rolled_back() {
        let (store, clock) = store(2);
        let id = begin(&store, 50);
        clock.advance(Duration::from_millis(1_001));
        let view = store.get_transaction_view(id);
        assert_eq!(view.state(), TxnState::RolledBack);
        assert!(!view.allows_writes());
        assert_eq!(store.resolver().pending(), 1);
    }

    impl TxnStore {
        fn get_transaction_view(&self, id: TxnId) -> Arc<TxnView> {
            self.find_transaction(id).unwrap().unwrap()
        }
    }
}
