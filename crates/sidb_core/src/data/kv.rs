//! Candidate row mutations.

use bytes::Bytes;

/// Kind of a candidate row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KvType {
    /// Insert of a new row.
    Insert,
    /// Insert or overwrite.
    Upsert,
    /// Logical deletion.
    Delete,
    /// A write carrying no user columns.
    EmptyColumn,
    /// Check that a referenced parent row still exists.
    ForeignKeyParentExistenceCheck,
}

impl KvType {
    /// Returns true if writing this kind needs the row's current versions.
    ///
    /// An insert may skip the read only when the caller guarantees its keys
    /// are unique and no constraint checker needs the visible row.
    #[must_use]
    pub fn needs_read(self, has_checker: bool, unique_insert_keys: bool) -> bool {
        has_checker || !unique_insert_keys || self != KvType::Insert
    }
}

/// One candidate row mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    /// Row key.
    pub row: Bytes,
    /// Encoded user row. Empty for deletes.
    pub value: Bytes,
    /// Mutation kind.
    pub kind: KvType,
}

impl KvPair {
    /// Creates a pair.
    pub fn new(row: impl Into<Bytes>, value: impl Into<Bytes>, kind: KvType) -> Self {
        Self {
            row: row.into(),
            value: value.into(),
            kind,
        }
    }

    /// An insert.
    pub fn insert(row: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::new(row, value, KvType::Insert)
    }

    /// An upsert.
    pub fn upsert(row: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::new(row, value, KvType::Upsert)
    }

    /// A delete.
    pub fn delete(row: impl Into<Bytes>) -> Self {
        Self::new(row, Bytes::new(), KvType::Delete)
    }

    /// Approximate size in bytes, used for batch accounting.
    #[must_use]
    pub fn size(&self) -> usize {
        self.row.len() + self.value.len()
    }
}
