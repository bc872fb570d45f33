//! Transaction-table row keys.
//!
//! A row key is `bucket (1 byte) ‖ beginTimestamp (8 bytes, big-endian)`.
//! The bucket spreads consecutive ids over partitions; within a bucket keys
//! sort by begin timestamp, so a timestamp range is one contiguous key range.

use crate::error::{CodecError, CodecResult};

/// Length of a transaction-table row key.
pub const TXN_ROW_KEY_LEN: usize = 9;

/// Returns the bucket of transaction `id`.
///
/// `bucket_count` must be a power of two no greater than 256.
#[must_use]
pub const fn bucket_of(id: u64, bucket_count: u16) -> u8 {
    (id & (bucket_count as u64 - 1)) as u8
}

/// Builds the key `bucket ‖ bigEndian(ts)`.
#[must_use]
pub fn bucket_key(bucket: u8, ts: u64) -> [u8; TXN_ROW_KEY_LEN] {
    let mut key = [0u8; TXN_ROW_KEY_LEN];
    key[0] = bucket;
    key[1..].copy_from_slice(&ts.to_be_bytes());
    key
}

/// Builds the row key of transaction `id`.
#[must_use]
pub fn txn_row_key(id: u64, bucket_count: u16) -> [u8; TXN_ROW_KEY_LEN] {
    bucket_key(bucket_of(id, bucket_count), id)
}

/// Recovers the transaction id from a row key.
///
/// # Errors
///
/// Returns an error if the key is not [`TXN_ROW_KEY_LEN`] bytes long.
pub fn txn_id_from_row_key(key: &[u8]) -> CodecResult<u64> {
    if key.len() != TXN_ROW_KEY_LEN {
        return Err(CodecError::invalid_length("row key", TXN_ROW_KEY_LEN, key.len()));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&key[1..]);
    Ok(u64::from_be_bytes(raw))
}

/// Returns the scan range `[bucket‖after, bucket‖(before+1))` for one bucket.
///
/// When `before` is `u64::MAX` the end key is the start of the next bucket,
/// or unbounded (empty) for the last bucket.
#[must_use]
pub fn bucket_scan_range(bucket: u8, after: u64, before: u64) -> (Vec<u8>, Vec<u8>) {
    let start = bucket_key(bucket, after).to_vec();
    let stop = match before.checked_add(1) {
        Some(end) => bucket_key(bucket, end).to_vec(),
        None => match bucket.checked_add(1) {
            Some(next) => vec![next],
            None => Vec::new(),
        },
    };
    (start, stop)
}
