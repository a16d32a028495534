//! Wide-column sink client
//!
//! The pipeline writes through [`WideColumnSink`], a narrow view of a
//! wide-column store: tables hold rows addressed by string keys, and each row
//! holds cells addressed by `family:qualifier`. Rows are kept in ascending key
//! order.
//!
//! Two implementations are provided: [`MemorySink`] for tests and dry runs,
//! and [`RedbSink`], a persistent local store backed by redb.

pub mod memory;
pub mod redb_store;

pub use self::memory::MemorySink;
pub use self::redb_store::RedbSink;

use crate::error::SinkResult;
use std::collections::BTreeMap;

/// One cell to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub family: String,
    pub qualifier: String,
    pub value: Vec<u8>,
}

impl Cell {
    /// Column name in `family:qualifier` form
    pub fn column(&self) -> String {
        column_name(&self.family, &self.qualifier)
    }
}

/// All cells written to a single row by one mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMutation {
    pub row_key: String,
    pub cells: Vec<Cell>,
}

impl RowMutation {
    pub fn new(row_key: impl Into<String>) -> Self {
        RowMutation {
            row_key: row_key.into(),
            cells: Vec::new(),
        }
    }

    pub fn with_cell(
        mut self,
        family: impl Into<String>,
        qualifier: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.cells.push(Cell {
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
        });
        self
    }
}

/// Half-open key range `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: String,
    pub end: String,
}

impl KeyRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        KeyRange {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        key >= self.start.as_str() && key < self.end.as_str()
    }
}

/// Row filter applied during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    All,
    /// Rows that have no cell in the given column
    ColumnAbsent { family: String, qualifier: String },
}

impl RowFilter {
    pub fn column_absent(family: impl Into<String>, qualifier: impl Into<String>) -> Self {
        RowFilter::ColumnAbsent {
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }

    /// Whether a row with the given column names passes the filter
    pub fn accepts<'a, I>(&self, mut columns: I) -> bool
    where
        I: Iterator<Item = &'a str>,
    {
        match self {
            RowFilter::All => true,
            RowFilter::ColumnAbsent { family, qualifier } => {
                let wanted = column_name(family, qualifier);
                !columns.any(|column| column == wanted)
            }
        }
    }
}

/// Cells of one row keyed by `family:qualifier`
pub type RowCells = BTreeMap<String, Vec<u8>>;

pub fn column_name(family: &str, qualifier: &str) -> String {
    format!("{}:{}", family, qualifier)
}

/// Client of a wide-column store
pub trait WideColumnSink {
    fn table_exists(&self, table: &str) -> SinkResult<bool>;

    /// Create an empty table; fails with `AlreadyExists` if it is present
    fn create_table(&self, table: &str) -> SinkResult<()>;

    /// Create a column family; fails with `AlreadyExists` if it is present
    fn create_column_family(&self, table: &str, family: &str) -> SinkResult<()>;

    /// Apply all mutations, in order, as one unit: either every cell is
    /// written or none is.
    fn batch_write(&self, table: &str, mutations: &[RowMutation]) -> SinkResult<()>;

    /// Keys of the rows in `range` passing `filter`, ascending, at most
    /// `limit` of them when given. A missing table yields no rows.
    fn scan_range(
        &self,
        table: &str,
        range: &KeyRange,
        filter: &RowFilter,
        limit: Option<usize>,
    ) -> SinkResult<Vec<String>>;

    fn read_row(&self, table: &str, row_key: &str) -> SinkResult<Option<RowCells>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_range_is_half_open() {
        let range = KeyRange::new("1", "2");
        assert!(range.contains("1"));
        assert!(range.contains("12345"));
        assert!(!range.contains("2"));
        assert!(!range.contains("0"));
    }

    #[test]
    fn test_column_absent_filter() {
        let filter = RowFilter::column_absent("cf1", "migrated_date");

        assert!(filter.accepts(["cf1:registered_date"].into_iter()));
        assert!(!filter.accepts(["cf1:registered_date", "cf1:migrated_date"].into_iter()));
        assert!(RowFilter::All.accepts(std::iter::empty()));
    }
}
