//! # sidb Codec
//!
//! Persisted layout of snapshot-isolation data for sidb.
//!
//! This crate owns every byte-level decision the transactional core relies on:
//! - Column families and qualifiers of data tables and the transaction table
//! - Cell role classification ([`CellType`])
//! - Transaction-table row keys (`bucket ‖ bigEndian(beginTs)`)
//! - Fixed-width timestamps and the transaction state byte
//! - NUL-joined destination-table lists
//! - The packed transaction DATA column (CBOR via `ciborium`)
//!
//! ## Usage
//!
//! ```
//! use sidb_codec::{decode_parent_id, txn_id_from_row_key, txn_row_key, TxnData};
//!
//! let key = txn_row_key(201, 16);
//! assert_eq!(txn_id_from_row_key(&key).unwrap(), 201);
//!
//! let data = TxnData { begin_ts: 201, parent_id: 200, additive: false, isolation_level: 3 };
//! let bytes = data.encode().unwrap();
//! assert_eq!(decode_parent_id(&bytes).unwrap(), 200);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod keys;
mod layout;
mod packed;
mod values;

pub use error::{CodecError, CodecResult};
pub use keys::{bucket_key, bucket_of, bucket_scan_range, txn_id_from_row_key, txn_row_key, TXN_ROW_KEY_LEN};
pub use layout::{
    CellType, TxnColumn, TxnState, ANTI_TOMBSTONE_VALUE, COMMIT_TIMESTAMP_QUALIFIER, DATA_FAMILY,
    FK_COUNTER_QUALIFIER, PACKED_QUALIFIER, SUPPRESS_INDEXING_ATTRIBUTE, TOMBSTONE_QUALIFIER,
    TOMBSTONE_VALUE, TXN_FAMILY,
};
pub use packed::{decode_parent_id, TxnData, PARENT_ID_FIELD};
pub use values::{
    append_destination_table, contains_destination_table, decode_destination_tables,
    decode_timestamp, encode_destination_tables, encode_timestamp, TABLE_SEPARATOR,
};
