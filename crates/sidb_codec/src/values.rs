//! Fixed-width timestamps and destination-table lists.

use crate::error::{CodecError, CodecResult};
use bytes::{BufMut, Bytes, BytesMut};

/// Separator between destination table names.
pub const TABLE_SEPARATOR: u8 = 0x00;

/// Encodes a signed timestamp as 8 big-endian bytes.
#[must_use]
pub fn encode_timestamp(ts: i64) -> Bytes {
    Bytes::copy_from_slice(&ts.to_be_bytes())
}

/// Decodes an 8-byte big-endian signed timestamp.
///
/// # Errors
///
/// Returns an error if the value is not 8 bytes long.
pub fn decode_timestamp(value: &[u8]) -> CodecResult<i64> {
    let raw: [u8; 8] = value
        .try_into()
        .map_err(|_| CodecError::invalid_length("timestamp", 8, value.len()))?;
    Ok(i64::from_be_bytes(raw))
}

/// Encodes a list of table names, NUL-joined.
#[must_use]
pub fn encode_destination_tables<T: AsRef<[u8]>>(tables: &[T]) -> Bytes {
    let mut buf = BytesMut::new();
    for (i, table) in tables.iter().enumerate() {
        if i > 0 {
            buf.put_u8(TABLE_SEPARATOR);
        }
        buf.put_slice(table.as_ref());
    }
    buf.freeze()
}

/// Decodes a NUL-joined list of table names.
#[must_use]
pub fn decode_destination_tables(value: &[u8]) -> Vec<Bytes> {
    if value.is_empty() {
        return Vec::new();
    }
    value
        .split(|b| *b == TABLE_SEPARATOR)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Appends `table` to an encoded list unless it is already present.
#[must_use]
pub fn append_destination_table(existing: &[u8], table: &[u8]) -> Bytes {
    if existing.is_empty() {
        return Bytes::copy_from_slice(table);
    }
    if contains_destination_table(existing, table) {
        return Bytes::copy_from_slice(existing);
    }
    let mut buf = BytesMut::with_capacity(existing.len() + 1 + table.len());
    buf.put_slice(existing);
    buf.put_u8(TABLE_SEPARATOR);
    buf.put_slice(table);
    buf.freeze()
}

/// Returns true if the encoded list names `table`.
#[must_use]
pub fn contains_destination_table(encoded: &[u8], table: &[u8]) -> bool {
    !encoded.is_empty() && encoded.split(|b| *b == TABLE_SEPARATOR).any(|t| t == table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_keep_sign() {
        assert_eq!(decode_timestamp(&encode_timestamp(-1)).unwrap(), -1);
        assert_eq!(decode_timestamp(&encode_timestamp(105)).unwrap(), 105);
        assert!(decode_timestamp(&[0, 1]).is_err());
    }

    #[test]
    fn destination_tables_append_once() {
        let list = append_destination_table(b"", b"orders");
        let list = append_destination_table(&list, b"items");
        let list = append_destination_table(&list, b"orders");
        assert_eq!(list.as_ref(), b"orders\0items");
        assert_eq!(
            decode_destination_tables(&list),
            vec![Bytes::from_static(b"orders"), Bytes::from_static(b"items")]
        );
    }

    #[test]
    fn contains_matches_whole_names() {
        let list = encode_destination_tables(&["orders", "items"]);
        assert!(contains_destination_table(&list, b"items"));
        assert!(!contains_destination_table(&list, b"item"));
        assert!(!contains_destination_table(b"", b""));
        assert!(decode_destination_tables(b"").is_empty());
    }
}
