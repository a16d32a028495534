//! Batched, idempotent loading of flattened rows into a wide-column sink

use crate::cursor::{CancelToken, CursorState};
use crate::error::{MigrateError, MigrateResult, SinkError};
use crate::sink::{RowMutation, WideColumnSink};
use crate::types::FlatRow;
use std::borrow::Cow;
use tracing::debug;

/// Data columns written for every flattened row
pub const ID_COLUMN: &str = "id";
pub const NAME_COLUMN: &str = "name";
pub const FLOAT_COLUMN: &str = "float";
pub const VALUE_COLUMN: &str = "value";

/// Leading component of every data row key. Shot rows are plain decimal
/// keys, so data rows never fall inside a shot scan range.
pub const DATA_ROW_PREFIX: &str = "d";

/// Row key of a flattened row: `d#<shot>#<id>#<name>#<float>`.
///
/// The key depends only on the shot and the row's grouping key, so loading
/// the same shot again overwrites its rows instead of adding new ones.
/// `%` and `#` inside `id` and `name` are percent-escaped so distinct rows
/// never share a key.
pub fn data_row_key(shot: u64, row: &FlatRow) -> String {
    format!(
        "{}#{}#{}#{}#{}",
        DATA_ROW_PREFIX,
        shot,
        escape_key_part(&row.id),
        escape_key_part(&row.name),
        row.float
    )
}

fn escape_key_part(part: &str) -> Cow<'_, str> {
    if !part.contains(['%', '#']) {
        return Cow::Borrowed(part);
    }
    let mut escaped = String::with_capacity(part.len() + 4);
    for c in part.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '#' => escaped.push_str("%23"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// What a successful `load_rows` wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub rows_written: usize,
    pub batches: usize,
}

/// Writes flat rows to a sink table in fixed-size batches
pub struct BatchLoader<'s, S: WideColumnSink + ?Sized> {
    sink: &'s S,
    family: String,
    batch_size: usize,
    cancel: Option<CancelToken>,
}

impl<'s, S: WideColumnSink + ?Sized> BatchLoader<'s, S> {
    /// A `batch_size` of 0 is treated as 1
    pub fn new(sink: &'s S, family: impl Into<String>, batch_size: usize) -> Self {
        BatchLoader {
            sink,
            family: family.into(),
            batch_size: batch_size.max(1),
            cancel: None,
        }
    }

    /// Stop before starting a new batch once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Create the table and its column family unless they exist.
    ///
    /// The family is created even when the table is already there, since
    /// another caller (or an interrupted run) may have created only the
    /// table. Losing a creation race to another caller counts as success.
    pub fn ensure_schema(&self, table: &str) -> MigrateResult<()> {
        if !self.sink.table_exists(table)? {
            match self.sink.create_table(table) {
                Ok(()) => debug!(table, "table created"),
                Err(SinkError::AlreadyExists(_)) => {
                    debug!(table, "table created concurrently");
                }
                Err(e) => return Err(e.into()),
            }
        }
        match self.sink.create_column_family(table, &self.family) {
            Ok(()) => debug!(table, family = %self.family, "column family created"),
            Err(SinkError::AlreadyExists(_)) => {
                debug!(table, family = %self.family, "column family already present");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Write `rows` for `shot` in batches of `batch_size`.
    ///
    /// Batches are written one after another and are not rolled back: when
    /// batch `i` (0-based) fails, the `i * batch_size` rows before it stay
    /// committed and are reported in `WriteFailed`. No retries are made.
    pub fn load_rows(&self, table: &str, shot: u64, rows: &[FlatRow]) -> MigrateResult<LoadSummary> {
        let mut committed = 0;
        let mut batches = 0;

        for (batch_index, chunk) in rows.chunks(self.batch_size).enumerate() {
            if let Some(cancel) = &self.cancel {
                if cancel.is_cancelled() {
                    return Err(MigrateError::Cancelled {
                        state: CursorState::Marking,
                        committed_rows: committed,
                    });
                }
            }

            let mutations: Vec<RowMutation> =
                chunk.iter().map(|row| self.row_mutation(shot, row)).collect();
            self.sink
                .batch_write(table, &mutations)
                .map_err(|source| MigrateError::WriteFailed {
                    batch_index,
                    committed_rows: committed,
                    source,
                })?;

            committed += chunk.len();
            batches += 1;
            debug!(table, shot, batch_index, rows = chunk.len(), "batch written");
        }

        Ok(LoadSummary {
            rows_written: committed,
            batches,
        })
    }

    fn row_mutation(&self, shot: u64, row: &FlatRow) -> RowMutation {
        RowMutation::new(data_row_key(shot, row))
            .with_cell(&self.family, ID_COLUMN, row.id.as_bytes())
            .with_cell(&self.family, NAME_COLUMN, row.name.as_bytes())
            .with_cell(&self.family, FLOAT_COLUMN, row.float.to_string())
            .with_cell(&self.family, VALUE_COLUMN, row.value.to_string())
    }
}
