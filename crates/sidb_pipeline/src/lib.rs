//! # sidb Pipeline
//!
//! Resilient bulk write pipeline for sidb.
//!
//! This crate provides:
//! - Bulk write requests split by partition, with structured per-row results
//! - A response policy mapping partition answers to retry decisions
//! - A retry loop with exponential backoff and bounded attempts
//! - Routing through a replaceable region cache
//! - An in-process invoker driving the conflict & write engine
//!
//! ## Key Invariants
//!
//! - Row-scoped failures never abort sibling rows of the same batch
//! - Only rows that need it are resubmitted, re-routed if routing was stale
//! - A too-busy signal resubmits the identical batch
//! - Every write terminates: at most `max_retries` failed attempts and
//!   `2 * max_retries` rejected attempts

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod config;
mod error;
mod invoker;
mod policy;
mod routing;
mod sleeper;
mod stats;
mod write;

pub use action::{BulkWriteAction, WritePipeline};
pub use config::WriteConfig;
pub use error::{PipelineError, PipelineResult};
pub use invoker::{BulkWritesInvoker, MockInvoker, PartitionInvoker};
pub use policy::{DefaultWritePolicy, WritePolicy, WriteResponse};
pub use routing::{partition_rows, RegionCache, StaticRegionCache};
pub use sleeper::{RecordingSleeper, Sleeper, ThreadSleeper};
pub use stats::{PipelineStatus, WriteStats};
pub use write::{BulkWrite, BulkWriteResult, BulkWrites, BulkWritesResult, WriteCode, WriteResult};
