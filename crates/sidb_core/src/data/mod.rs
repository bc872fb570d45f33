//! Data-table access: column roles, candidate mutations, row outcomes and
//! the partition capability interface.

mod columns;
mod kv;
mod partition;
mod status;

pub use columns::{
    cell_role, commit_timestamp_column, default_user_column, fk_counter_column, tombstone_column,
    LatestRow,
};
pub use kv::{KvPair, KvType};
pub use partition::{Partition, StorePartition};
pub use status::MutationStatus;
