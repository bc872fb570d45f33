//! Out-of-band transaction resolution.
//!
//! Scans and point reads discover transactions whose stored record lags
//! their true state: an ACTIVE record whose keep-alive went stale, a child
//! whose parent rolled back, a committed child whose ancestors have all
//! committed. Those findings are queued here and applied later, either by
//! an explicit [`TransactionResolver::run_pending`] or by a worker thread.

use crate::error::{CoreError, CoreResult};
use crate::store::table::TxnStore;
use crate::txn::TxnSupplier;
use crate::types::TxnId;
use parking_lot::{Condvar, Mutex};
use sidb_codec::TxnState;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// A queued resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Record a rollback for a transaction that timed out or lost its parent.
    TimedOut(TxnId),
    /// Write the global commit timestamp of a committed child.
    GlobalCommit(TxnId),
}

impl Resolution {
    /// The transaction being resolved.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        match self {
            Resolution::TimedOut(id) | Resolution::GlobalCommit(id) => *id,
        }
    }
}

#[derive(Debug, Default)]
struct Queue {
    order: VecDeque<Resolution>,
    queued: HashSet<Resolution>,
}

/// Deduplicating queue of pending resolutions.
#[derive(Debug, Default)]
pub struct TransactionResolver {
    queue: Mutex<Queue>,
    ready: Condvar,
    applied: AtomicU64,
}

impl TransactionResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a rollback for `id`.
    pub fn resolve_timed_out(&self, id: TxnId) {
        self.enqueue(Resolution::TimedOut(id));
    }

    /// Queues global-commit resolution for `id`.
    pub fn resolve_global_commit(&self, id: TxnId) {
        self.enqueue(Resolution::GlobalCommit(id));
    }

    fn enqueue(&self, resolution: Resolution) {
        let mut queue = self.queue.lock();
        if queue.queued.insert(resolution) {
            trace!(?resolution, "queued resolution");
            queue.order.push_back(resolution);
            self.ready.notify_one();
        }
    }

    /// Number of queued resolutions.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().order.len()
    }

    /// Returns true if `resolution` is queued.
    #[must_use]
    pub fn is_pending(&self, resolution: Resolution) -> bool {
        self.queue.lock().queued.contains(&resolution)
    }

    /// Total resolutions applied so far.
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    fn pop(&self, wait: Option<Duration>) -> Option<Resolution> {
        let mut queue = self.queue.lock();
        if queue.order.is_empty() {
            if let Some(timeout) = wait {
                self.ready.wait_for(&mut queue, timeout);
            }
        }
        let next = queue.order.pop_front()?;
        queue.queued.remove(&next);
        Some(next)
    }

    /// Applies every queued resolution against `store`.
    ///
    /// Failures are logged and dropped. Returns the number applied.
    pub fn run_pending(&self, store: &TxnStore) -> usize {
        let mut applied = 0;
        while let Some(resolution) = self.pop(None) {
            match apply(store, resolution) {
                Ok(()) => applied += 1,
                Err(e) => warn!(?resolution, error = %e, "resolution failed"),
            }
        }
        applied
    }

    fn wake_all(&self) {
        self.ready.notify_all();
    }
}

/// Applies one resolution.
///
/// # Errors
///
/// Returns an error if the transaction cannot be read or written.
pub fn apply(store: &TxnStore, resolution: Resolution) -> CoreResult<()> {
    match resolution {
        Resolution::TimedOut(id) => {
            let Some(record) = store.read_record(id)? else {
                return Ok(());
            };
            if record.state != TxnState::Active {
                trace!(txn_id = %id, state = ?record.state, "already finalized");
            } else {
                store.record_rollback(id)?;
                debug!(txn_id = %id, "resolved as timed out");
            }
        }
        Resolution::GlobalCommit(id) => {
            let Some(view) = store.find_transaction(id)? else {
                return Ok(());
            };
            if view.parent().is_none() || view.global_commit_timestamp() >= 0 {
                return Ok(());
            }
            match view.effective_state() {
                TxnState::Committed => {
                    let ts = view.effective_commit_timestamp();
                    store.record_global_commit(id, ts)?;
                    debug!(txn_id = %id, global_commit_ts = ts, "resolved global commit");
                }
                TxnState::RolledBack if view.state() == TxnState::Active => {
                    store.record_rollback(id)?;
                    debug!(txn_id = %id, "parent rolled back, resolved as timed out");
                }
                _ => {}
            }
        }
    }
    store.resolver().applied.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// Handle to a background resolution thread.
#[derive(Debug)]
pub struct ResolverWorker {
    stop: Arc<AtomicBool>,
    store: Weak<TxnStore>,
    handle: JoinHandle<()>,
}

impl ResolverWorker {
    /// Starts a thread applying resolutions as they are queued.
    ///
    /// The thread holds only a weak reference to `store` and exits once
    /// the store is dropped or [`shutdown`](Self::shutdown) is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(store: &Arc<TxnStore>, poll: Duration) -> CoreResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let weak = Arc::downgrade(store);
        let thread_stop = Arc::clone(&stop);
        let thread_store = weak.clone();
        let handle = thread::Builder::new()
            .name("sidb-resolver".into())
            .spawn(move || worker_loop(&thread_store, &thread_stop, poll))
            .map_err(|e| CoreError::invalid_operation(format!("cannot spawn resolver: {e}")))?;
        Ok(Self {
            stop,
            store: weak,
            handle,
        })
    }

    /// Stops the thread and waits for it to exit.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(store) = self.store.upgrade() {
            store.resolver().wake_all();
        }
        if self.handle.join().is_err() {
            warn!("resolver thread panicked");
        }
    }
}

fn worker_loop(store: &Weak<TxnStore>, stop: &AtomicBool, poll: Duration) {
    while !stop.load(Ordering::SeqCst) {
        let Some(store) = store.upgrade() else {
            break;
        };
        let Some(resolution) = store.resolver().pop(Some(poll)) else {
            continue;
        };
        if let Err(e) = apply(&store, resolution) {
            warn!(?resolution, error = %e, "resolution failed");
        }
    }
    debug!("resolver thread exiting");
}
