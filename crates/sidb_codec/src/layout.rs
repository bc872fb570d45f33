//! Column layout of data tables and the transaction table.
//!
//! Data tables keep every snapshot-isolation marker in the [`DATA_FAMILY`]
//! beside the user data column. The transaction table keeps one row per
//! transaction in [`TXN_FAMILY`], with single-byte qualifiers whose order is
//! the order cells are presented to scan filters.

use crate::error::{CodecError, CodecResult};

/// Column family holding user data and its markers.
pub const DATA_FAMILY: &[u8] = b"V";

/// Qualifier of the commit-timestamp marker.
pub const COMMIT_TIMESTAMP_QUALIFIER: &[u8] = b"0";

/// Qualifier of tombstone and anti-tombstone markers.
pub const TOMBSTONE_QUALIFIER: &[u8] = b"1";

/// Qualifier of the foreign-key reference counter.
pub const FK_COUNTER_QUALIFIER: &[u8] = b"6";

/// Default qualifier of the packed user data column.
pub const PACKED_QUALIFIER: &[u8] = b"7";

/// Value of a tombstone marker.
pub const TOMBSTONE_VALUE: &[u8] = b"";

/// Value of an anti-tombstone marker.
pub const ANTI_TOMBSTONE_VALUE: &[u8] = b"0";

/// Put attribute that tells downstream index maintenance to skip the write.
pub const SUPPRESS_INDEXING_ATTRIBUTE: &str = "si.suppress_indexing";

/// Column family of the transaction table.
pub const TXN_FAMILY: &[u8] = b"T";

/// A column of the transaction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TxnColumn {
    /// Transaction state byte.
    State = 0x01,
    /// Last keep-alive timestamp.
    KeepAlive = 0x02,
    /// NUL-joined list of written tables.
    DestinationTable = 0x03,
    /// Commit timestamp, or -1.
    Commit = 0x04,
    /// Global commit timestamp, or -1.
    GlobalCommit = 0x05,
    /// Packed transaction data.
    Data = 0x06,
}

impl TxnColumn {
    /// All columns in on-disk order.
    pub const ALL: [TxnColumn; 6] = [
        TxnColumn::State,
        TxnColumn::KeepAlive,
        TxnColumn::DestinationTable,
        TxnColumn::Commit,
        TxnColumn::GlobalCommit,
        TxnColumn::Data,
    ];

    /// Returns the single-byte qualifier of this column.
    #[must_use]
    pub const fn qualifier(self) -> &'static [u8] {
        match self {
            TxnColumn::State => &[0x01],
            TxnColumn::KeepAlive => &[0x02],
            TxnColumn::DestinationTable => &[0x03],
            TxnColumn::Commit => &[0x04],
            TxnColumn::GlobalCommit => &[0x05],
            TxnColumn::Data => &[0x06],
        }
    }

    /// Identifies a transaction-table column from its qualifier.
    #[must_use]
    pub fn from_qualifier(qualifier: &[u8]) -> Option<Self> {
        match qualifier {
            [0x01] => Some(TxnColumn::State),
            [0x02] => Some(TxnColumn::KeepAlive),
            [0x03] => Some(TxnColumn::DestinationTable),
            [0x04] => Some(TxnColumn::Commit),
            [0x05] => Some(TxnColumn::GlobalCommit),
            [0x06] => Some(TxnColumn::Data),
            _ => None,
        }
    }
}

/// Persisted transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    /// Begun and not yet finished.
    Active,
    /// Committed.
    Committed,
    /// Rolled back, explicitly or by timeout.
    RolledBack,
}

impl TxnState {
    /// Returns the state byte.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            TxnState::Active => 0x01,
            TxnState::Committed => 0x02,
            TxnState::RolledBack => 0x03,
        }
    }

    /// Encodes the state as a one-byte value.
    #[must_use]
    pub const fn encode(self) -> [u8; 1] {
        [self.code()]
    }

    /// Decodes a one-byte state value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not one byte or the byte is unknown.
    pub fn decode(value: &[u8]) -> CodecResult<Self> {
        match value {
            [0x01] => Ok(TxnState::Active),
            [0x02] => Ok(TxnState::Committed),
            [0x03] => Ok(TxnState::RolledBack),
            [other] => Err(CodecError::UnknownState(*other)),
            _ => Err(CodecError::invalid_length("state", 1, value.len())),
        }
    }

    /// Returns true for committed and rolled-back states.
    #[must_use]
    pub const fn is_final(self) -> bool {
        !matches!(self, TxnState::Active)
    }
}

/// Role of a cell, derived from its column and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellType {
    /// The user data column of a data table.
    UserData,
    /// Logical deletion by the owning version.
    Tombstone,
    /// Reversal of an earlier tombstone by the owning version.
    AntiTombstone,
    /// Commit timestamp of the owning version, or -1 if unknown.
    CommitTimestamp,
    /// Global commit timestamp of a transaction-table row.
    GlobalCommitTimestamp,
    /// Foreign-key reference counter.
    ForeignKeyCounter,
    /// Anything else.
    Other,
}

impl CellType {
    /// Classifies a cell.
    ///
    /// `data_qualifier` names the user data column of the table being read.
    #[must_use]
    pub fn classify(family: &[u8], qualifier: &[u8], value: &[u8], data_qualifier: &[u8]) -> Self {
        if family == TXN_FAMILY {
            return match TxnColumn::from_qualifier(qualifier) {
                Some(TxnColumn::Commit) => CellType::CommitTimestamp,
                Some(TxnColumn::GlobalCommit) => CellType::GlobalCommitTimestamp,
                _ => CellType::Other,
            };
        }
        if family != DATA_FAMILY {
            return CellType::Other;
        }
        if qualifier == COMMIT_TIMESTAMP_QUALIFIER {
            CellType::CommitTimestamp
        } else if qualifier == TOMBSTONE_QUALIFIER {
            if value == ANTI_TOMBSTONE_VALUE {
                CellType::AntiTombstone
            } else {
                CellType::Tombstone
            }
        } else if qualifier == FK_COUNTER_QUALIFIER {
            CellType::ForeignKeyCounter
        } else if qualifier == data_qualifier {
            CellType::UserData
        } else {
            CellType::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txn_columns_sort_in_declared_order() {
        let quals: Vec<&[u8]> = TxnColumn::ALL.iter().map(|c| c.qualifier()).collect();
        let mut sorted = quals.clone();
        sorted.sort();
        assert_eq!(quals, sorted);
        for col in TxnColumn::ALL {
            assert_eq!(TxnColumn::from_qualifier(col.qualifier()), Some(col));
        }
        assert_eq!(TxnColumn::from_qualifier(&[0x09]), None);
    }

    #[test]
    fn state_bytes() {
        for state in [TxnState::Active, TxnState::Committed, TxnState::RolledBack] {
            assert_eq!(TxnState::decode(&state.encode()).unwrap(), state);
        }
        assert_eq!(TxnState::decode(&[0x07]), Err(CodecError::UnknownState(0x07)));
        assert!(matches!(
            TxnState::decode(&[]),
            Err(CodecError::InvalidLength { .. })
        ));
        assert!(!TxnState::Active.is_final());
        assert!(TxnState::RolledBack.is_final());
    }

    #[test]
    fn classify_data_cells() {
        let q = PACKED_QUALIFIER;
        assert_eq!(
            CellType::classify(DATA_FAMILY, COMMIT_TIMESTAMP_QUALIFIER, b"", q),
            CellType::CommitTimestamp
        );
        assert_eq!(
            CellType::classify(DATA_FAMILY, TOMBSTONE_QUALIFIER, TOMBSTONE_VALUE, q),
            CellType::Tombstone
        );
        assert_eq!(
            CellType::classify(DATA_FAMILY, TOMBSTONE_QUALIFIER, ANTI_TOMBSTONE_VALUE, q),
            CellType::AntiTombstone
        );
        assert_eq!(
            CellType::classify(DATA_FAMILY, FK_COUNTER_QUALIFIER, b"", q),
            CellType::ForeignKeyCounter
        );
        assert_eq!(CellType::classify(DATA_FAMILY, q, b"x", q), CellType::UserData);
        assert_eq!(CellType::classify(DATA_FAMILY, b"9", b"x", q), CellType::Other);
        assert_eq!(CellType::classify(b"X", q, b"x", q), CellType::Other);
    }

    #[test]
    fn classify_txn_table_cells() {
        let q = PACKED_QUALIFIER;
        assert_eq!(
            CellType::classify(TXN_FAMILY, TxnColumn::GlobalCommit.qualifier(), b"", q),
            CellType::GlobalCommitTimestamp
        );
        assert_eq!(
            CellType::classify(TXN_FAMILY, TxnColumn::Commit.qualifier(), b"", q),
            CellType::CommitTimestamp
        );
        assert_eq!(
            CellType::classify(TXN_FAMILY, TxnColumn::State.qualifier(), b"", q),
            CellType::Other
        );
    }
}
