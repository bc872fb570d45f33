//! # sidb Testkit
//!
//! Test utilities for sidb.
//!
//! This crate provides:
//! - An in-memory cluster: transaction table, two data partitions, a manual
//!   clock and the write engine
//! - A pipeline wired to that cluster with recorded sleeps
//! - Failure-injecting partition wrappers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sidb_testkit::prelude::*;
//!
//! #[test]
//! fn committed_writes_are_visible() {
//!     let cluster = TestCluster::new();
//!     let t = cluster.begin(10);
//!     cluster.write(t, vec![KvPair::insert("a", "1")]).unwrap();
//!     cluster.commit(t, 11);
//!     assert!(cluster.read(12, b"a").is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use sidb_core::{KvPair, KvType, MutationStatus, TxnId};
}

pub use fixtures::*;
pub use generators::*;
