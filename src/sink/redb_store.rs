//! RedbSink - persistent wide-column sink backed by redb.
//!
//! Every sink table shares one redb table of cells keyed by
//! `(sink_table, row_key, "family:qualifier")`, so a row's cells are
//! contiguous and rows sort by key. A catalog table records which sink
//! tables and column families exist: `(table, "")` marks a table and
//! `(table, family)` a family, each valued with its creation time.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use super::{KeyRange, RowCells, RowFilter, RowMutation, WideColumnSink};
use crate::error::{SinkError, SinkResult};

const CATALOG: TableDefinition<(&str, &str), u64> = TableDefinition::new("catalog");

const CELLS: TableDefinition<(&str, &str, &str), &[u8]> = TableDefinition::new("cells");

/// Convert any `Display` error into a backend error.
macro_rules! backend_err {
    () => {
        |e| SinkError::Backend(e.to_string())
    };
}

/// Thread-safe sink backed by redb.
#[derive(Clone)]
pub struct RedbSink {
    db: Arc<Database>,
}

impl RedbSink {
    /// Open (or create) a persistent sink at the given path.
    pub fn open(path: &Path) -> SinkResult<Self> {
        let db = Database::create(path).map_err(backend_err!())?;
        let sink = Self { db: Arc::new(db) };
        sink.ensure_tables()?;
        debug!(?path, "redb sink opened");
        Ok(sink)
    }

    /// Create an ephemeral in-memory sink.
    pub fn open_in_memory() -> SinkResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(backend_err!())?;
        let sink = Self { db: Arc::new(db) };
        sink.ensure_tables()?;
        Ok(sink)
    }

    fn ensure_tables(&self) -> SinkResult<()> {
        let txn = self.db.begin_write().map_err(backend_err!())?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CATALOG).map_err(backend_err!())?;
        txn.open_table(CELLS).map_err(backend_err!())?;
        txn.commit().map_err(backend_err!())?;
        Ok(())
    }

    /// Insert a catalog entry, failing if it is already present.
    fn create_entry(&self, table: &str, family: &str, what: String) -> SinkResult<()> {
        let txn = self.db.begin_write().map_err(backend_err!())?;
        {
            let mut catalog = txn.open_table(CATALOG).map_err(backend_err!())?;
            if !family.is_empty() && catalog.get((table, "")).map_err(backend_err!())?.is_none() {
                return Err(SinkError::TableNotFound(table.to_string()));
            }
            if catalog.get((table, family)).map_err(backend_err!())?.is_some() {
                return Err(SinkError::AlreadyExists(what));
            }
            let created = chrono::Utc::now().timestamp().max(0) as u64;
            catalog
                .insert((table, family), created)
                .map_err(backend_err!())?;
        }
        txn.commit().map_err(backend_err!())?;
        debug!(%what, "catalog entry created");
        Ok(())
    }
}

impl WideColumnSink for RedbSink {
    fn table_exists(&self, table: &str) -> SinkResult<bool> {
        let txn = self.db.begin_read().map_err(backend_err!())?;
        let catalog = txn.open_table(CATALOG).map_err(backend_err!())?;
        let exists = catalog.get((table, "")).map_err(backend_err!())?.is_some();
        Ok(exists)
    }

    fn create_table(&self, table: &str) -> SinkResult<()> {
        self.create_entry(table, "", table.to_string())
    }

    fn create_column_family(&self, table: &str, family: &str) -> SinkResult<()> {
        if family.is_empty() {
            return Err(SinkError::Backend("column family name is empty".to_string()));
        }
        self.create_entry(table, family, format!("{}/{}", table, family))
    }

    fn batch_write(&self, table: &str, mutations: &[RowMutation]) -> SinkResult<()> {
        let txn = self.db.begin_write().map_err(backend_err!())?;
        {
            let catalog = txn.open_table(CATALOG).map_err(backend_err!())?;
            if catalog.get((table, "")).map_err(backend_err!())?.is_none() {
                return Err(SinkError::TableNotFound(table.to_string()));
            }
            for cell in mutations.iter().flat_map(|m| m.cells.iter()) {
                let known = catalog
                    .get((table, cell.family.as_str()))
                    .map_err(backend_err!())?
                    .is_some();
                if !known {
                    return Err(SinkError::UnknownFamily {
                        table: table.to_string(),
                        family: cell.family.clone(),
                    });
                }
            }

            let mut cells = txn.open_table(CELLS).map_err(backend_err!())?;
            for mutation in mutations {
                for cell in &mutation.cells {
                    let column = cell.column();
                    cells
                        .insert(
                            (table, mutation.row_key.as_str(), column.as_str()),
                            cell.value.as_slice(),
                        )
                        .map_err(backend_err!())?;
                }
            }
        }
        // Dropping the transaction on any early return above aborts it.
        txn.commit().map_err(backend_err!())?;
        debug!(table, rows = mutations.len(), "batch committed");
        Ok(())
    }

    fn scan_range(
        &self,
        table: &str,
        range: &KeyRange,
        filter: &RowFilter,
        limit: Option<usize>,
    ) -> SinkResult<Vec<String>> {
        if range.start >= range.end || !self.table_exists(table)? {
            return Ok(Vec::new());
        }
        let limit = limit.unwrap_or(usize::MAX);

        let txn = self.db.begin_read().map_err(backend_err!())?;
        let cells = txn.open_table(CELLS).map_err(backend_err!())?;
        let start = (table, range.start.as_str(), "");
        let end = (table, range.end.as_str(), "");

        let mut keys = Vec::new();
        let mut current: Option<(String, Vec<String>)> = None;
        for entry in cells.range(start..end).map_err(backend_err!())? {
            let (key, _) = entry.map_err(backend_err!())?;
            let (_, row, column) = key.value();

            if let Some((current_row, columns)) = current.as_mut() {
                if current_row.as_str() == row {
                    columns.push(column.to_string());
                    continue;
                }
            }
            if let Some((done_row, columns)) = current.take() {
                if filter.accepts(columns.iter().map(String::as_str)) {
                    keys.push(done_row);
                    if keys.len() >= limit {
                        return Ok(keys);
                    }
                }
            }
            current = Some((row.to_string(), vec![column.to_string()]));
        }
        if let Some((done_row, columns)) = current {
            if keys.len() < limit && filter.accepts(columns.iter().map(String::as_str)) {
                keys.push(done_row);
            }
        }

        Ok(keys)
    }

    fn read_row(&self, table: &str, row_key: &str) -> SinkResult<Option<RowCells>> {
        if !self.table_exists(table)? {
            return Err(SinkError::TableNotFound(table.to_string()));
        }

        let txn = self.db.begin_read().map_err(backend_err!())?;
        let cells = txn.open_table(CELLS).map_err(backend_err!())?;
        let start = (table, row_key, "");

        let mut row = RowCells::new();
        for entry in cells.range(start..).map_err(backend_err!())? {
            let (key, value) = entry.map_err(backend_err!())?;
            let (entry_table, entry_row, column) = key.value();
            if entry_table != table || entry_row != row_key {
                break;
            }
            row.insert(column.to_string(), value.value().to_vec());
        }

        Ok(if row.is_empty() { None } else { Some(row) })
    }
}
