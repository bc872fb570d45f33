//! Active-transaction scan filter.
//!
//! Classifies transaction-table rows during a scan without materializing
//! them. Per-row state is folded cell by cell with [`ActiveTxnFilter::fold`]
//! and judged with [`ActiveTxnFilter::decide`]. The outcome does not depend on
//! the order cells arrive in. A repeated qualifier is ignored after its first
//! occurrence.

use bytes::Bytes;
use sidb_codec::{
    contains_destination_table, decode_parent_id, decode_timestamp, txn_id_from_row_key, TxnColumn,
    TxnState, TXN_FAMILY,
};
use sidb_storage::{Cell, FilterAction, ScanFilter};

/// What has been learned about the current row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowState {
    /// First state cell seen.
    pub state: Option<TxnState>,
    /// A keep-alive cell was seen.
    pub keep_alive_seen: bool,
    /// The first keep-alive cell was stale.
    pub keep_alive_stale: bool,
    /// A destination-table cell was seen.
    pub dest_tables_seen: bool,
    /// The first destination-table cell named the requested table.
    pub dest_table_matched: bool,
    /// A non-negative commit timestamp was seen.
    pub commit_seen: bool,
    /// A non-negative global commit timestamp was seen.
    pub global_commit_seen: bool,
    /// The data cell names a parent.
    pub is_child: bool,
    data_seen: bool,
}

impl RowState {
    /// Committed by state or by commit timestamp.
    #[must_use]
    pub fn committed(&self) -> bool {
        self.commit_seen || self.global_commit_seen || self.state == Some(TxnState::Committed)
    }

    /// Active by state but past its keep-alive deadline.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.state == Some(TxnState::Active) && self.keep_alive_stale && !self.committed()
    }
}

/// Filter selecting transactions that may still be active.
#[derive(Debug, Clone)]
pub struct ActiveTxnFilter {
    after_ts: u64,
    before_ts: u64,
    destination_table: Option<Bytes>,
    now_ms: u64,
    timeout_ms: u64,
    row: RowState,
}

impl ActiveTxnFilter {
    /// Creates a filter for begin timestamps in `[after_ts, before_ts]`.
    #[must_use]
    pub fn new(
        after_ts: u64,
        before_ts: u64,
        destination_table: Option<&[u8]>,
        now_ms: u64,
        timeout_ms: u64,
    ) -> Self {
        Self {
            after_ts,
            before_ts,
            destination_table: destination_table.map(Bytes::copy_from_slice),
            now_ms,
            timeout_ms,
            row: RowState::default(),
        }
    }

    /// Returns true if the begin timestamp encoded in `row_key` is in range.
    ///
    /// Keys that do not decode are out of range.
    #[must_use]
    pub fn in_range(&self, row_key: &[u8]) -> bool {
        txn_id_from_row_key(row_key)
            .map(|id| id >= self.after_ts && id <= self.before_ts)
            .unwrap_or(false)
    }

    /// Folds one cell into the row state.
    ///
    /// The returned action is [`FilterAction::NextRow`] once the row is
    /// certain to be excluded, [`FilterAction::Skip`] for repeated or foreign
    /// cells, and [`FilterAction::Include`] otherwise.
    #[must_use]
    pub fn fold(&self, mut row: RowState, cell: &Cell) -> (RowState, FilterAction) {
        if cell.family() != TXN_FAMILY {
            return (row, FilterAction::Skip);
        }
        let Some(column) = TxnColumn::from_qualifier(cell.qualifier()) else {
            return (row, FilterAction::Skip);
        };
        match column {
            TxnColumn::GlobalCommit => {
                if decode_timestamp(&cell.value).is_ok_and(|ts| ts >= 0) {
                    row.global_commit_seen = true;
                    return (row, FilterAction::NextRow);
                }
            }
            TxnColumn::Commit => {
                if decode_timestamp(&cell.value).is_ok_and(|ts| ts >= 0) {
                    row.commit_seen = true;
                }
            }
            TxnColumn::State => {
                if row.state.is_some() {
                    return (row, FilterAction::Skip);
                }
                match TxnState::decode(&cell.value) {
                    Ok(TxnState::RolledBack) => {
                        row.state = Some(TxnState::RolledBack);
                        return (row, FilterAction::NextRow);
                    }
                    Ok(state) => row.state = Some(state),
                    Err(_) => return (row, FilterAction::Skip),
                }
            }
            TxnColumn::KeepAlive => {
                if row.keep_alive_seen {
                    return (row, FilterAction::Skip);
                }
                row.keep_alive_seen = true;
                row.keep_alive_stale = decode_timestamp(&cell.value).is_ok_and(|ka| {
                    self.now_ms.saturating_sub(ka.max(0) as u64) > self.timeout_ms
                });
            }
            TxnColumn::DestinationTable => {
                let Some(table) = &self.destination_table else {
                    return (row, FilterAction::Include);
                };
                if row.dest_tables_seen {
                    return (row, FilterAction::Skip);
                }
                row.dest_tables_seen = true;
                row.dest_table_matched = contains_destination_table(&cell.value, table);
                if !row.dest_table_matched {
                    return (row, FilterAction::NextRow);
                }
            }
            TxnColumn::Data => {
                if row.data_seen {
                    return (row, FilterAction::Skip);
                }
                row.data_seen = true;
                row.is_child = decode_parent_id(&cell.value).is_ok_and(|parent| parent > 0);
            }
        }
        (row, FilterAction::Include)
    }

    /// Returns true if a row with this state should be returned.
    #[must_use]
    pub fn decide(&self, row: &RowState) -> bool {
        if row.global_commit_seen || row.state == Some(TxnState::RolledBack) {
            return false;
        }
        if row.timed_out() {
            return false;
        }
        if row.committed() && !row.is_child {
            return false;
        }
        if self.destination_table.is_some() && !row.dest_table_matched {
            return false;
        }
        true
    }

    /// Folds a whole row and decides it.
    #[must_use]
    pub fn evaluate<'a>(&self, cells: impl IntoIterator<Item = &'a Cell>) -> bool {
        let mut row = RowState::default();
        for cell in cells {
            let (next, action) = self.fold(row, cell);
            row = next;
            if action == FilterAction::NextRow {
                break;
            }
        }
        self.decide(&row)
    }
}

impl ScanFilter for ActiveTxnFilter {
    fn reset(&mut self) {
        self.row = RowState::default();
    }

    fn filter_row_key(&mut self, row: &[u8]) -> bool {
        !self.in_range(row)
    }

    fn filter_cell(&mut self, cell: &Cell) -> FilterAction {
        let (row, action) = self.fold(self.row, cell);
        self.row = row;
        action
    }

    fn filter_row(&mut self) -> bool {
        !self.decide(&self.row)
    }
}
