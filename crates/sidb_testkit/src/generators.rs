//! Property-based test generators using proptest.
//!
//! Strategies produce ids, rows and mutations that respect the cluster
//! layout in [`crate::fixtures`].

use bytes::Bytes;
use proptest::prelude::*;
use sidb_core::{KvPair, KvType, TxnId};
use sidb_pipeline::WriteCode;

/// Strategy for transaction ids, leaving room for children above them.
pub fn txn_id_strategy() -> impl Strategy<Value = TxnId> {
    (1u64..1_000_000).prop_map(TxnId::new)
}

/// Strategy for two distinct ids, smaller first.
pub fn txn_id_pair_strategy() -> impl Strategy<Value = (TxnId, TxnId)> {
    (1u64..1_000_000, 1u64..1_000)
        .prop_map(|(low, gap)| (TxnId::new(low), TxnId::new(low + gap)))
}

/// Strategy for non-empty lowercase row keys.
pub fn row_key_strategy() -> impl Strategy<Value = Bytes> {
    prop::string::string_regex("[a-z]{1,8}")
        .expect("Invalid regex")
        .prop_map(Bytes::from)
}

/// Strategy for non-empty user values.
pub fn value_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 1..64).prop_map(Bytes::from)
}

/// Strategy for mutation kinds.
pub fn kv_type_strategy() -> impl Strategy<Value = KvType> {
    prop_oneof![
        Just(KvType::Insert),
        Just(KvType::Upsert),
        Just(KvType::EmptyColumn),
        Just(KvType::Delete),
    ]
}

/// Strategy for the mutation kinds that write a row version.
pub fn row_write_kind_strategy() -> impl Strategy<Value = KvType> {
    prop_oneof![Just(KvType::Insert), Just(KvType::Upsert), Just(KvType::Delete)]
}

/// Strategy for a single candidate mutation.
pub fn kv_pair_strategy() -> impl Strategy<Value = KvPair> {
    (row_key_strategy(), value_strategy(), kv_type_strategy()).prop_map(|(row, value, kind)| {
        match kind {
            KvType::Delete => KvPair::delete(row),
            kind => KvPair::new(row, value, kind),
        }
    })
}

/// Strategy for a batch of upserts on distinct rows, in key order.
pub fn distinct_upserts_strategy(max: usize) -> impl Strategy<Value = Vec<KvPair>> {
    prop::collection::btree_map(row_key_strategy(), value_strategy(), 1..=max.max(1)).prop_map(
        |rows| {
            rows.into_iter()
                .map(|(row, value)| KvPair::upsert(row, value))
                .collect()
        },
    )
}

/// Strategy for row codes a partition may answer with, retryable or not.
pub fn write_code_strategy() -> impl Strategy<Value = WriteCode> {
    prop_oneof![
        Just(WriteCode::NotRun),
        Just(WriteCode::WrongPartition),
        Just(WriteCode::NotServingPartition),
        Just(WriteCode::WriteConflict),
        Just(WriteCode::UniqueViolation),
        Just(WriteCode::Failed),
    ]
}

/// Strategy for row codes that always lead to a resubmission.
pub fn retryable_code_strategy() -> impl Strategy<Value = WriteCode> {
    prop_oneof![
        Just(WriteCode::NotRun),
        Just(WriteCode::WrongPartition),
        Just(WriteCode::NotServingPartition),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn pairs_are_ordered((low, high) in txn_id_pair_strategy()) {
            prop_assert!(low < high);
        }

        #[test]
        fn upsert_batches_have_distinct_rows(batch in distinct_upserts_strategy(8)) {
            let mut rows: Vec<_> = batch.iter().map(|p| p.row.clone()).collect();
            rows.dedup();
            prop_assert_eq!(rows.len(), batch.len());
            prop_assert!(batch.iter().all(|p| p.kind == KvType::Upsert));
        }

        #[test]
        fn row_write_kinds_carry_versions(kind in row_write_kind_strategy()) {
            prop_assert!(matches!(kind, KvType::Insert | KvType::Upsert | KvType::Delete));
        }

        #[test]
        fn retryable_codes_are_retryable(code in retryable_code_strategy()) {
            prop_assert!(code.is_retryable());
        }
    }
}
