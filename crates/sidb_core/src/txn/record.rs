//! Persisted transaction records.

use crate::error::CoreResult;
use crate::types::{IsolationLevel, TxnId, UNKNOWN_TIMESTAMP};
use bytes::Bytes;
use sidb_codec::{
    decode_destination_tables, decode_timestamp, encode_destination_tables, encode_timestamp,
    TxnColumn, TxnData, TxnState, TXN_FAMILY,
};
use sidb_storage::{Cell, Column};

/// Returns the storage column of a transaction-table column.
#[must_use]
pub fn txn_column(column: TxnColumn) -> Column {
    Column::from_static(TXN_FAMILY, column.qualifier())
}

/// One row of the transaction table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnRecord {
    /// Transaction id and begin timestamp.
    pub id: TxnId,
    /// Parent transaction, if nested.
    pub parent_id: Option<TxnId>,
    /// Recorded state, before timeout adjustment.
    pub state: TxnState,
    /// Commit timestamp, or -1.
    pub commit_ts: i64,
    /// Global commit timestamp, or -1.
    pub global_commit_ts: i64,
    /// Last keep-alive, in clock milliseconds.
    pub keep_alive_ms: Option<u64>,
    /// Tables written by the transaction.
    pub destination_tables: Vec<Bytes>,
    /// Whether the transaction writes additively.
    pub additive: bool,
    /// Read isolation.
    pub isolation_level: IsolationLevel,
}

impl TxnRecord {
    /// Creates an active root record.
    #[must_use]
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            parent_id: None,
            state: TxnState::Active,
            commit_ts: UNKNOWN_TIMESTAMP,
            global_commit_ts: UNKNOWN_TIMESTAMP,
            keep_alive_ms: None,
            destination_tables: Vec::new(),
            additive: false,
            isolation_level: IsolationLevel::default(),
        }
    }

    /// Sets the parent transaction.
    #[must_use]
    pub fn with_parent(mut self, parent: TxnId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Marks the transaction additive.
    #[must_use]
    pub fn additive(mut self, additive: bool) -> Self {
        self.additive = additive;
        self
    }

    /// Sets the isolation level.
    #[must_use]
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Adds a destination table.
    #[must_use]
    pub fn with_destination_table(mut self, table: impl Into<Bytes>) -> Self {
        self.destination_tables.push(table.into());
        self
    }

    /// Returns true if the transaction has a parent.
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Returns true if the recorded state is active but the keep-alive is stale.
    ///
    /// A record with no keep-alive never times out.
    #[must_use]
    pub fn timed_out(&self, now_ms: u64, timeout_ms: u64) -> bool {
        self.state == TxnState::Active
            && self
                .keep_alive_ms
                .is_some_and(|ka| now_ms.saturating_sub(ka) > timeout_ms)
    }

    /// Recorded state with the keep-alive timeout applied.
    #[must_use]
    pub fn adjusted_state(&self, now_ms: u64, timeout_ms: u64) -> TxnState {
        if self.timed_out(now_ms, timeout_ms) {
            TxnState::RolledBack
        } else {
            self.state
        }
    }

    /// Packed DATA column contents.
    #[must_use]
    pub fn data(&self) -> TxnData {
        TxnData {
            begin_ts: self.id.as_u64(),
            parent_id: self.parent_id.map_or(0, TxnId::as_u64),
            additive: self.additive,
            isolation_level: self.isolation_level.code(),
        }
    }

    /// Cells written when the record is created.
    pub(crate) fn creation_cells(&self, now_ms: u64) -> CoreResult<Vec<(TxnColumn, Bytes)>> {
        let mut cells = vec![
            (TxnColumn::State, Bytes::copy_from_slice(&TxnState::Active.encode())),
            (TxnColumn::KeepAlive, encode_timestamp(clamp(now_ms))),
            (TxnColumn::Data, self.data().encode()?),
        ];
        if !self.destination_tables.is_empty() {
            cells.push((
                TxnColumn::DestinationTable,
                encode_destination_tables(&self.destination_tables),
            ));
        }
        Ok(cells)
    }

    /// Decodes a record from the cells of its row.
    ///
    /// Returns `None` if the row has no state cell.
    ///
    /// # Errors
    ///
    /// Returns an error if a cell cannot be decoded.
    pub fn decode(id: TxnId, cells: &[Cell]) -> CoreResult<Option<Self>> {
        let mut record = TxnRecord::new(id);
        let mut has_state = false;
        for cell in cells {
            if cell.family() != TXN_FAMILY {
                continue;
            }
            match TxnColumn::from_qualifier(cell.qualifier()) {
                Some(TxnColumn::State) => {
                    record.state = TxnState::decode(&cell.value)?;
                    has_state = true;
                }
                Some(TxnColumn::KeepAlive) => {
                    record.keep_alive_ms = Some(decode_timestamp(&cell.value)?.max(0) as u64);
                }
                Some(TxnColumn::DestinationTable) => {
                    record.destination_tables = decode_destination_tables(&cell.value);
                }
                Some(TxnColumn::Commit) => record.commit_ts = decode_timestamp(&cell.value)?,
                Some(TxnColumn::GlobalCommit) => {
                    record.global_commit_ts = decode_timestamp(&cell.value)?;
                }
                Some(TxnColumn::Data) => {
                    let data = TxnData::decode(&cell.value)?;
                    record.parent_id = (data.parent_id > 0).then(|| TxnId::new(data.parent_id));
                    record.additive = data.additive;
                    record.isolation_level = IsolationLevel::from_code(data.isolation_level);
                }
                None => {}
            }
        }
        Ok(has_state.then_some(record))
    }
}

pub(crate) fn clamp(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}
