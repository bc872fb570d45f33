//! Transaction model: persisted records, resolved views and lookup.

mod record;
mod supplier;
mod view;

pub use record::{txn_column, TxnRecord};
pub use supplier::{CompletedTxnCache, TxnSupplier};
pub use view::{ConflictType, TxnView};

pub(crate) use record::clamp;
