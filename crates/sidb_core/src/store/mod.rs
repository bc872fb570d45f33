//! Transaction record store.
//!
//! Transaction rows live in a table split into `bucket_count` partitions.
//! The row key is `bucket ‖ bigEndian(id)` so ids spread over partitions
//! while each partition stays sorted by begin timestamp.

mod filter;
mod region;
mod resolver;
mod table;

pub use filter::{ActiveTxnFilter, RowState};
pub use region::RegionTxnStore;
pub use resolver::{apply as apply_resolution, Resolution, ResolverWorker, TransactionResolver};
pub use table::TxnStore;
