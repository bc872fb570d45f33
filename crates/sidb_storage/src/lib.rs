//! # sidb Storage
//!
//! Versioned row store abstraction for sidb.
//!
//! This crate provides the lowest-level storage abstraction: a partition of
//! a versioned key-value table. Row stores are **opaque cell stores** - they
//! do not interpret versions, tombstones or commit markers.
//!
//! ## Design Principles
//!
//! - A cell is addressed by `(row, family, qualifier, version)`
//! - Single-row puts are atomic, batch puts report one outcome per row
//! - Row locks are non-blocking: contention is reported, never waited on
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and single-process use
//!
//! ## Example
//!
//! ```rust
//! use sidb_storage::{Column, MemoryStore, Put, RowStore};
//!
//! let store = MemoryStore::new("t");
//! let col = Column::new("V", "7");
//! store.put(&Put::new("row").with_cell(col.clone(), 1, "hello")).unwrap();
//! let cells = store.get(b"row", &[col], 1).unwrap();
//! assert_eq!(cells[0].value.as_ref(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cell;
mod error;
mod memory;

pub use backend::{
    AllRows, FilterAction, RowGuard, RowLockTable, RowOutcome, RowStore, ScanFilter, ScannedRow,
};
pub use cell::{Cell, Column, Delete, KeyRange, Put};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
