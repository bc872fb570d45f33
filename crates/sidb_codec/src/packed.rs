//! Packed transaction data column.
//!
//! The DATA column of a transaction row is a CBOR array
//! `[beginTs, parentId, additive, isolationLevel]`. The parent id is the
//! second field so scan filters can pull it without decoding the rest.

use crate::error::{CodecError, CodecResult};
use bytes::Bytes;
use ciborium::Value;
use serde::{Deserialize, Serialize};

/// Index of the parent id inside the packed array.
pub const PARENT_ID_FIELD: usize = 1;

/// Decoded DATA column of a transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PackedFields", into = "PackedFields")]
pub struct TxnData {
    /// Begin timestamp, equal to the transaction id.
    pub begin_ts: u64,
    /// Parent transaction id, or 0 for a root transaction.
    pub parent_id: u64,
    /// Whether the transaction writes additively.
    pub additive: bool,
    /// Isolation level code.
    pub isolation_level: u8,
}

#[derive(Serialize, Deserialize)]
struct PackedFields(u64, u64, bool, u8);

impl From<PackedFields> for TxnData {
    fn from(f: PackedFields) -> Self {
        Self {
            begin_ts: f.0,
            parent_id: f.1,
            additive: f.2,
            isolation_level: f.3,
        }
    }
}

impl From<TxnData> for PackedFields {
    fn from(d: TxnData) -> Self {
        PackedFields(d.begin_ts, d.parent_id, d.additive, d.isolation_level)
    }
}

impl TxnData {
    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> CodecResult<Bytes> {
        let mut buf = Vec::with_capacity(24);
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Decodes from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a packed transaction array.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

/// Reads only the parent id from a packed DATA value.
///
/// # Errors
///
/// Returns an error if the value is not an array whose second element is an
/// unsigned integer.
pub fn decode_parent_id(bytes: &[u8]) -> CodecResult<u64> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    let field = value
        .as_array()
        .and_then(|fields| fields.get(PARENT_ID_FIELD))
        .and_then(Value::as_integer)
        .ok_or_else(|| CodecError::invalid_structure("missing parent id field"))?;
    u64::try_from(field).map_err(|_| CodecError::invalid_structure("parent id out of range"))
}
