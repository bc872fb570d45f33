//! Core type definitions for sidb.

use std::fmt;

/// Commit timestamp value meaning "not known" or "not committed".
pub const UNKNOWN_TIMESTAMP: i64 = -1;

/// Unique identifier for a transaction.
///
/// Transaction ids are issued monotonically and double as the begin
/// timestamp of the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the begin timestamp.
    #[must_use]
    pub const fn begin_timestamp(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

impl From<u64> for TxnId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Which committed versions a transaction reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Sees everything not rolled back.
    ReadUncommitted,
    /// Sees everything committed.
    ReadCommitted,
    /// Sees what was committed before it began.
    #[default]
    SnapshotIsolation,
}

impl IsolationLevel {
    /// Returns the persisted code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            IsolationLevel::ReadUncommitted => 1,
            IsolationLevel::ReadCommitted => 2,
            IsolationLevel::SnapshotIsolation => 3,
        }
    }

    /// Parses a persisted code, defaulting to snapshot isolation.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => IsolationLevel::ReadUncommitted,
            2 => IsolationLevel::ReadCommitted,
            _ => IsolationLevel::SnapshotIsolation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txn_id_ordering() {
        let t1 = TxnId::new(1);
        let t2 = TxnId::new(2);
        assert!(t1 < t2);
        assert_eq!(t2.begin_timestamp(), 2);
    }

    #[test]
    fn txn_id_display() {
        assert_eq!(format!("{}", TxnId::new(42)), "txn:42");
    }

    #[test]
    fn isolation_codes() {
        for level in [
            IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted,
            IsolationLevel::SnapshotIsolation,
        ] {
            assert_eq!(IsolationLevel::from_code(level.code()), level);
        }
        assert_eq!(IsolationLevel::from_code(0), IsolationLevel::SnapshotIsolation);
    }
}
