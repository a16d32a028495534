//! In-memory wide-column sink with failure injection

use super::{column_name, KeyRange, RowCells, RowFilter, RowMutation, WideColumnSink};
use crate::error::{SinkError, SinkResult};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryTable {
    families: BTreeSet<String>,
    rows: BTreeMap<String, RowCells>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    /// Number of `batch_write` calls received, failed ones included
    batch_calls: usize,
    failing_calls: HashSet<usize>,
    hide_tables: bool,
    /// Row keys of every committed batch, in commit order
    committed: Vec<(String, Vec<String>)>,
    /// Row keys returned by every scan so far
    rows_scanned: usize,
}

/// Thread-safe in-memory sink
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    /// Make the `call`-th `batch_write` (0-based, counted from creation) fail
    pub fn fail_batch_call(&self, call: usize) {
        self.lock().failing_calls.insert(call);
    }

    /// Report every table as missing, so schema creation races with a
    /// table that already exists
    pub fn hide_tables(&self, hide: bool) {
        self.lock().hide_tables = hide;
    }

    pub fn batch_calls(&self) -> usize {
        self.lock().batch_calls
    }

    /// Committed batches as `(table, row keys)`, oldest first
    pub fn committed_batches(&self) -> Vec<(String, Vec<String>)> {
        self.lock().committed.clone()
    }

    /// Total row keys returned by `scan_range` calls
    pub fn rows_scanned(&self) -> usize {
        self.lock().rows_scanned
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.lock().tables.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WideColumnSink for MemorySink {
    fn table_exists(&self, table: &str) -> SinkResult<bool> {
        let state = self.lock();
        Ok(!state.hide_tables && state.tables.contains_key(table))
    }

    fn create_table(&self, table: &str) -> SinkResult<()> {
        let mut state = self.lock();
        if state.tables.contains_key(table) {
            return Err(SinkError::AlreadyExists(table.to_string()));
        }
        state.tables.insert(table.to_string(), MemoryTable::default());
        Ok(())
    }

    fn create_column_family(&self, table: &str, family: &str) -> SinkResult<()> {
        let mut state = self.lock();
        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| SinkError::TableNotFound(table.to_string()))?;
        if !entry.families.insert(family.to_string()) {
            return Err(SinkError::AlreadyExists(format!("{}/{}", table, family)));
        }
        Ok(())
    }

    fn batch_write(&self, table: &str, mutations: &[RowMutation]) -> SinkResult<()> {
        let mut state = self.lock();
        let call = state.batch_calls;
        state.batch_calls += 1;
        if state.failing_calls.contains(&call) {
            return Err(SinkError::Unavailable(format!("injected failure on batch call {}", call)));
        }

        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| SinkError::TableNotFound(table.to_string()))?;

        // Validate everything before touching any row
        for mutation in mutations {
            for cell in &mutation.cells {
                if !entry.families.contains(&cell.family) {
                    return Err(SinkError::UnknownFamily {
                        table: table.to_string(),
                        family: cell.family.clone(),
                    });
                }
            }
        }

        for mutation in mutations {
            let row = entry.rows.entry(mutation.row_key.clone()).or_default();
            for cell in &mutation.cells {
                row.insert(column_name(&cell.family, &cell.qualifier), cell.value.clone());
            }
        }

        let keys = mutations.iter().map(|m| m.row_key.clone()).collect();
        state.committed.push((table.to_string(), keys));
        Ok(())
    }

    fn scan_range(
        &self,
        table: &str,
        range: &KeyRange,
        filter: &RowFilter,
        limit: Option<usize>,
    ) -> SinkResult<Vec<String>> {
        let mut state = self.lock();
        let Some(entry) = state.tables.get(table) else {
            return Ok(Vec::new());
        };
        if range.start >= range.end {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = entry
            .rows
            .range(range.start.clone()..range.end.clone())
            .filter(|(_, cells)| filter.accepts(cells.keys().map(String::as_str)))
            .map(|(key, _)| key.clone())
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        state.rows_scanned += keys.len();
        Ok(keys)
    }

    fn read_row(&self, table: &str, row_key: &str) -> SinkResult<Option<RowCells>> {
        let state = self.lock();
        let entry = state
            .tables
            .get(table)
            .ok_or_else(|| SinkError::TableNotFound(table.to_string()))?;
        Ok(entry.rows.get(row_key).cloned())
    }
}
