//! Transaction lookup with a completed-transaction cache.

use crate::error::{CoreError, CoreResult};
use crate::txn::view::TxnView;
use crate::types::TxnId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Source of [`TxnView`]s.
pub trait TxnSupplier: Send + Sync {
    /// Looks up a transaction, returning `None` if it was never recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails.
    fn find_transaction(&self, id: TxnId) -> CoreResult<Option<Arc<TxnView>>>;

    /// Looks up a transaction that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionNotFound`] if it was never recorded.
    fn get_transaction(&self, id: TxnId) -> CoreResult<Arc<TxnView>> {
        self.find_transaction(id)?
            .ok_or(CoreError::TransactionNotFound { txn_id: id })
    }
}

/// Bounded FIFO cache of views whose effective state is final.
#[derive(Debug)]
pub struct CompletedTxnCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    views: HashMap<TxnId, Arc<TxnView>>,
    order: VecDeque<TxnId>,
}

impl CompletedTxnCache {
    /// Creates a cache holding at most `capacity` views.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Returns a cached view.
    #[must_use]
    pub fn get(&self, id: TxnId) -> Option<Arc<TxnView>> {
        self.inner.lock().views.get(&id).cloned()
    }

    /// Caches `view` if its effective state is final.
    pub fn offer(&self, view: &Arc<TxnView>) {
        if self.capacity == 0 || !view.effective_state().is_final() {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.views.insert(view.id(), Arc::clone(view)).is_none() {
            inner.order.push_back(view.id());
        }
        while inner.views.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.views.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Drops a cached view.
    pub fn invalidate(&self, id: TxnId) {
        let mut inner = self.inner.lock();
        if inner.views.remove(&id).is_some() {
            inner.order.retain(|cached| *cached != id);
        }
    }

    /// Number of cached views.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().views.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
