//! Column roles of data tables.

use sidb_codec::{
    CellType, COMMIT_TIMESTAMP_QUALIFIER, DATA_FAMILY, FK_COUNTER_QUALIFIER, PACKED_QUALIFIER,
    TOMBSTONE_QUALIFIER,
};
use sidb_storage::{Cell, Column};

/// Column holding per-version commit timestamps.
#[must_use]
pub fn commit_timestamp_column() -> Column {
    Column::from_static(DATA_FAMILY, COMMIT_TIMESTAMP_QUALIFIER)
}

/// Column holding tombstones and anti-tombstones.
#[must_use]
pub fn tombstone_column() -> Column {
    Column::from_static(DATA_FAMILY, TOMBSTONE_QUALIFIER)
}

/// Column holding the foreign-key reference counter.
#[must_use]
pub fn fk_counter_column() -> Column {
    Column::from_static(DATA_FAMILY, FK_COUNTER_QUALIFIER)
}

/// Column holding packed user rows.
#[must_use]
pub fn default_user_column() -> Column {
    Column::from_static(DATA_FAMILY, PACKED_QUALIFIER)
}

/// Role of `cell` in a table whose user data lives in `user`.
#[must_use]
pub fn cell_role(cell: &Cell, user: &Column) -> CellType {
    if cell.family() == user.family.as_ref() && cell.qualifier() == user.qualifier.as_ref() {
        return CellType::UserData;
    }
    CellType::classify(cell.family(), cell.qualifier(), &cell.value, &user.qualifier)
}

/// Newest version of each column of a row, sorted by role.
#[derive(Debug, Clone, Default)]
pub struct LatestRow {
    /// Newest commit-timestamp cell.
    pub commit_timestamp: Option<Cell>,
    /// Newest tombstone or anti-tombstone cell.
    pub tombstone: Option<Cell>,
    /// Newest user data cell.
    pub user_data: Option<Cell>,
    /// Foreign-key counter cell.
    pub fk_counter: Option<Cell>,
    /// Other user-family columns present on the row.
    pub other_columns: Vec<Column>,
}

impl LatestRow {
    /// Sorts the newest cells of a row by role.
    #[must_use]
    pub fn from_cells(cells: Vec<Cell>, user: &Column) -> Self {
        let mut row = Self::default();
        for cell in cells {
            let slot = match cell_role(&cell, user) {
                CellType::CommitTimestamp => &mut row.commit_timestamp,
                CellType::Tombstone | CellType::AntiTombstone => &mut row.tombstone,
                CellType::UserData => &mut row.user_data,
                CellType::ForeignKeyCounter => &mut row.fk_counter,
                CellType::GlobalCommitTimestamp => continue,
                CellType::Other => {
                    if cell.family() == user.family.as_ref() {
                        row.other_columns.push(cell.column.clone());
                    }
                    continue;
                }
            };
            if slot.as_ref().map_or(true, |held| cell.version > held.version) {
                *slot = Some(cell);
            }
        }
        row
    }

    /// Returns true if the row has no cells of interest.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commit_timestamp.is_none()
            && self.tombstone.is_none()
            && self.user_data.is_none()
            && self.fk_counter.is_none()
    }

    /// Returns true if the newest tombstone cell is a real tombstone.
    #[must_use]
    pub fn has_tombstone(&self) -> bool {
        self.tombstone
            .as_ref()
            .is_some_and(|cell| cell.value.as_ref() != sidb_codec::ANTI_TOMBSTONE_VALUE)
    }
}
