use crate::flatten::flattener::MalformedRecord;
use crate::types::FlatRow;
use anyhow::{Context, Result};
use std::io::Write;

/// Writes flattened rows as JSON Lines, one row per line
pub struct RowWriter<W: Write> {
    writer: W,
    rows_written: usize,
}

impl<W: Write> RowWriter<W> {
    pub fn new(writer: W) -> Self {
        RowWriter {
            writer,
            rows_written: 0,
        }
    }

    pub fn write_rows(&mut self, rows: &[FlatRow]) -> Result<()> {
        for row in rows {
            let json = serde_json::to_string(row).context("Failed to serialize row")?;
            writeln!(self.writer, "{}", json).context("Failed to write row")?;
            self.rows_written += 1;
        }
        Ok(())
    }

    /// Write skipped records tagged with `_skipped` so they can be told apart
    pub fn write_skipped(&mut self, skipped: &[MalformedRecord]) -> Result<()> {
        for record in skipped {
            let mut data = serde_json::to_value(record)
                .context("Failed to serialize skipped record")?;
            if let Some(obj) = data.as_object_mut() {
                obj.insert("_skipped".to_string(), serde_json::Value::Bool(true));
            }
            let json = serde_json::to_string(&data).context("Failed to serialize skipped record")?;
            writeln!(self.writer, "{}", json).context("Failed to write skipped record")?;
        }
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }
}
