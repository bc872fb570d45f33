//! Cells, columns and row mutations.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;

/// A column address within a row: `(family, qualifier)`.
///
/// Columns order by family first, then qualifier, which is the order in
/// which a row's cells are handed to a [`crate::ScanFilter`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column {
    /// Column family.
    pub family: Bytes,
    /// Column qualifier.
    pub qualifier: Bytes,
}

impl Column {
    /// Creates a new column address.
    pub fn new(family: impl Into<Bytes>, qualifier: impl Into<Bytes>) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }

    /// Creates a column address from static byte strings.
    #[must_use]
    pub const fn from_static(family: &'static [u8], qualifier: &'static [u8]) -> Self {
        Self {
            family: Bytes::from_static(family),
            qualifier: Bytes::from_static(qualifier),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            String::from_utf8_lossy(&self.family),
            String::from_utf8_lossy(&self.qualifier)
        )
    }
}

/// A single versioned value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Row key.
    pub row: Bytes,
    /// Column address.
    pub column: Column,
    /// Version of the value. Higher versions are newer.
    pub version: u64,
    /// The stored value.
    pub value: Bytes,
}

impl Cell {
    /// Creates a new cell.
    pub fn new(row: impl Into<Bytes>, column: Column, version: u64, value: impl Into<Bytes>) -> Self {
        Self {
            row: row.into(),
            column,
            version,
            value: value.into(),
        }
    }

    /// Returns the column qualifier.
    #[must_use]
    pub fn qualifier(&self) -> &[u8] {
        &self.column.qualifier
    }

    /// Returns the column family.
    #[must_use]
    pub fn family(&self) -> &[u8] {
        &self.column.family
    }
}

/// A set of cells to write to a single row, applied atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Put {
    /// Target row key.
    pub row: Bytes,
    /// Cells to write as `(column, version, value)`.
    pub cells: Vec<(Column, u64, Bytes)>,
    /// Operation attributes. The store keeps them on the mutation only.
    pub attributes: BTreeMap<String, Bytes>,
}

impl Put {
    /// Creates an empty put for `row`.
    pub fn new(row: impl Into<Bytes>) -> Self {
        Self {
            row: row.into(),
            cells: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds a cell to this put.
    #[must_use]
    pub fn with_cell(mut self, column: Column, version: u64, value: impl Into<Bytes>) -> Self {
        self.add_cell(column, version, value);
        self
    }

    /// Adds a cell to this put in place.
    pub fn add_cell(&mut self, column: Column, version: u64, value: impl Into<Bytes>) {
        self.cells.push((column, version, value.into()));
    }

    /// Sets an operation attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Returns an operation attribute, if set.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Bytes> {
        self.attributes.get(name)
    }

    /// Returns true if the put carries no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Approximate payload size in bytes.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.row.len()
            + self
                .cells
                .iter()
                .map(|(c, _, v)| c.family.len() + c.qualifier.len() + 8 + v.len())
                .sum::<usize>()
    }
}

/// Removal of specific cell versions from a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    /// Target row key.
    pub row: Bytes,
    /// Exact `(column, version)` pairs to remove.
    pub versions: Vec<(Column, u64)>,
}

impl Delete {
    /// Creates an empty delete for `row`.
    pub fn new(row: impl Into<Bytes>) -> Self {
        Self {
            row: row.into(),
            versions: Vec::new(),
        }
    }

    /// Adds a `(column, version)` pair to remove.
    pub fn add_version(&mut self, column: Column, version: u64) {
        self.versions.push((column, version));
    }

    /// Returns true if nothing is addressed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// A half-open row-key range `[start, end)`. An empty `end` is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyRange {
    /// Inclusive start key.
    pub start: Bytes,
    /// Exclusive end key, or empty for unbounded.
    pub end: Bytes,
}

impl KeyRange {
    /// Creates a new key range.
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// The range covering every key.
    #[must_use]
    pub fn full() -> Self {
        Self::default()
    }

    /// Returns true if `row` falls inside this range.
    #[must_use]
    pub fn contains(&self, row: &[u8]) -> bool {
        row >= self.start.as_ref() && (self.end.is_empty() || row < self.end.as_ref())
    }

    /// Intersects `[start, stop)` with this range.
    ///
    /// An empty `stop` means unbounded. Returns `None` if the intersection
    /// is empty.
    #[must_use]
    pub fn clip(&self, start: &[u8], stop: &[u8]) -> Option<KeyRange> {
        let lo = if start > self.start.as_ref() {
            Bytes::copy_from_slice(start)
        } else {
            self.start.clone()
        };
        let hi = match (stop.is_empty(), self.end.is_empty()) {
            (true, _) => self.end.clone(),
            (false, true) => Bytes::copy_from_slice(stop),
            (false, false) if stop < self.end.as_ref() => Bytes::copy_from_slice(stop),
            (false, false) => self.end.clone(),
        };
        if !hi.is_empty() && lo >= hi {
            return None;
        }
        Some(KeyRange { start: lo, end: hi })
    }
}
