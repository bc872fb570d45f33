//! # sidb Core
//!
//! Snapshot-isolation MVCC core for sidb.
//!
//! This crate provides:
//! - A bucketed transaction record store with keep-alive, commit and rollback
//! - A server-side scan filter selecting active transactions
//! - Nested transaction views with conflict and visibility rules
//! - Snapshot reads with asynchronous read resolution
//! - A conflict & write engine applying row batches under row locks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sidb_core::{default_user_column, KvPair, StorePartition, Transactor, TxnRecord, TxnStore};
//!
//! let store = Arc::new(TxnStore::in_memory(TxnConfig::default(), Arc::new(SystemClock))?);
//! store.record_transaction(&TxnRecord::new(TxnId::new(100)))?;
//!
//! let transactor = Transactor::new(store.clone());
//! let statuses = transactor.process_batch(
//!     &partition,
//!     TxnId::new(100),
//!     &default_user_column(),
//!     &[KvPair::insert("row", "value")],
//!     None,
//! )?;
//! store.record_commit(TxnId::new(100), 101)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod data;
mod error;
mod read;
mod stats;
mod store;
mod transactor;
mod txn;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TxnConfig;
pub use data::{
    cell_role, commit_timestamp_column, default_user_column, fk_counter_column, tombstone_column,
    KvPair, KvType, LatestRow, MutationStatus, Partition, StorePartition,
};
pub use error::{CoreError, CoreResult};
pub use read::{
    visible_user_cell, NoOpReadResolver, ReadResolver, SnapshotReader, SynchronousReadResolver,
};
pub use stats::{WriteEngineSnapshot, WriteEngineStats};
pub use store::{
    apply_resolution, ActiveTxnFilter, RegionTxnStore, Resolution, ResolverWorker, RowState,
    TransactionResolver, TxnStore,
};
pub use transactor::{
    ensure_no_write_conflict, ConflictResults, ConstraintChecker, NoOpConstraintChecker,
    Transactor, UniqueConstraintChecker,
};
pub use txn::{txn_column, CompletedTxnCache, ConflictType, TxnRecord, TxnSupplier, TxnView};
pub use types::{IsolationLevel, TxnId, UNKNOWN_TIMESTAMP};
