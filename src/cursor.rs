//! Resumable "next unmigrated shot" cursor
//!
//! One invocation migrates at most one shot:
//!
//! ```text
//! Scanning ──(nothing found)──────────────────────────► Done
//!    │
//!    └─(shot found)─► Migrating ─► Marking ─► Done
//!
//! any state ──(error or cancellation)──► Failed
//! ```
//!
//! Data rows are written before the marker, as separate mutations. If the
//! process dies in between, the shot still lacks its marker, is picked again
//! by the next scan, and its rows are overwritten in place before marking.

use crate::config::{MigrateConfig, ShotRange};
use crate::error::{MigrateError, MigrateResult};
use crate::flatten::Flattener;
use crate::loader::BatchLoader;
use crate::sink::{KeyRange, RowFilter, RowMutation, WideColumnSink};
use crate::source::TreeSource;
use crate::walker::walk_shot;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Column holding the serialized shot document on the shot row
pub const DOCUMENT_COLUMN: &str = "data";

/// Column written by [`seed_shots`] to register a shot row
pub const REGISTERED_COLUMN: &str = "registered_date";

/// Row keys fetched per scan request
const SCAN_PAGE: usize = 256;

/// Shared cancellation flag, set by whoever owns the invocation's deadline
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CursorState {
    Scanning,
    Migrating,
    Marking,
    Done,
    Failed,
}

impl CursorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CursorState::Done | CursorState::Failed)
    }
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CursorState::Scanning => "scanning",
            CursorState::Migrating => "migrating",
            CursorState::Marking => "marking",
            CursorState::Done => "done",
            CursorState::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Summary of one migrated shot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub shot: u64,
    pub rows_written: usize,
    pub batches: usize,
    pub skipped_records: usize,
    pub migrated_date: String,
}

/// Result of one cursor invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// No unmigrated shot in range; nothing was written
    Idle,
    Migrated(MigrationReport),
}

/// Drives one shot through walk, flatten, load and mark
pub struct MigrationCursor<'a, Src: TreeSource, S: WideColumnSink + ?Sized> {
    source: &'a Src,
    sink: &'a S,
    config: &'a MigrateConfig,
    cancel: CancelToken,
    state: CursorState,
}

impl<'a, Src: TreeSource, S: WideColumnSink + ?Sized> MigrationCursor<'a, Src, S> {
    pub fn new(source: &'a Src, sink: &'a S, config: &'a MigrateConfig) -> Self {
        MigrationCursor {
            source,
            sink,
            config,
            cancel: CancelToken::new(),
            state: CursorState::Scanning,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Find the lowest unmigrated shot and migrate it
    pub fn run(&mut self) -> MigrateResult<Outcome> {
        self.state = CursorState::Scanning;
        let result = self.scan_and_migrate();
        self.finish(result)
    }

    /// Migrate `shot` directly, skipping the scan
    pub fn migrate_shot(&mut self, shot: u64) -> MigrateResult<Outcome> {
        self.state = CursorState::Scanning;
        let result = self.migrate_checked(shot);
        self.finish(result)
    }

    /// Lowest shot id in the configured range whose row lacks the marker.
    ///
    /// Shot keys of equal length sort numerically, so each digit length of
    /// the range is scanned in turn, shortest first, and the first canonical
    /// key of that length is the answer.
    pub fn next_unmigrated(&self) -> MigrateResult<Option<u64>> {
        let table = &self.config.table_id;
        if !self.sink.table_exists(table)? {
            return Ok(None);
        }
        let filter = RowFilter::column_absent(&self.config.column_family, &self.config.marker_column);

        for (digits, range) in shot_key_ranges(self.config.shot_range) {
            let mut range = range;
            loop {
                let keys = self.sink.scan_range(table, &range, &filter, Some(SCAN_PAGE))?;
                let found = keys
                    .iter()
                    .filter(|key| key.len() == digits)
                    .filter_map(|key| parse_shot_key(key))
                    .find(|shot| self.config.shot_range.contains(*shot));
                if found.is_some() {
                    return Ok(found);
                }
                match keys.last() {
                    Some(last) if keys.len() == SCAN_PAGE => {
                        range.start = format!("{}\0", last);
                    }
                    _ => break,
                }
            }
        }
        Ok(None)
    }

    fn scan_and_migrate(&mut self) -> MigrateResult<Outcome> {
        self.config.validate()?;
        self.check_cancelled()?;
        match self.next_unmigrated()? {
            Some(shot) => self.migrate(shot),
            None => {
                self.transition(CursorState::Done)?;
                debug!(table = %self.config.table_id, "no unmigrated shot in range");
                Ok(Outcome::Idle)
            }
        }
    }

    fn migrate_checked(&mut self, shot: u64) -> MigrateResult<Outcome> {
        self.config.validate()?;
        self.check_cancelled()?;
        self.migrate(shot)
    }

    fn migrate(&mut self, shot: u64) -> MigrateResult<Outcome> {
        let config = self.config;

        self.transition(CursorState::Migrating)?;
        let document = walk_shot(
            self.source,
            shot,
            &config.tree_name,
            config.subtrees.as_deref(),
        )?;
        let flattened = Flattener::new(config.row_identity)
            .with_time_window(config.time_window)
            .flatten(&document);

        self.transition(CursorState::Marking)?;
        let table = config.table_id.as_str();
        let family = config.column_family.as_str();
        let loader = BatchLoader::new(self.sink, family, config.batch_size)
            .with_cancel(self.cancel.clone());
        loader.ensure_schema(table)?;
        let summary = loader.load_rows(table, shot, &flattened.rows)?;

        // The marker must follow every data write for this shot
        if self.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled {
                state: self.state,
                committed_rows: summary.rows_written,
            });
        }
        let migrated_date = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let mut marker = RowMutation::new(shot.to_string()).with_cell(
            family,
            &config.marker_column,
            migrated_date.as_bytes(),
        );
        if config.store_document {
            marker = marker.with_cell(family, DOCUMENT_COLUMN, document.to_json_pretty()?);
        }
        self.sink.batch_write(table, &[marker])?;

        self.transition(CursorState::Done)?;
        info!(
            shot,
            rows = summary.rows_written,
            batches = summary.batches,
            skipped = flattened.skipped.len(),
            "shot migrated"
        );

        Ok(Outcome::Migrated(MigrationReport {
            shot,
            rows_written: summary.rows_written,
            batches: summary.batches,
            skipped_records: flattened.skipped.len(),
            migrated_date,
        }))
    }

    /// Move to `next`, observing cancellation before any non-terminal state
    fn transition(&mut self, next: CursorState) -> MigrateResult<()> {
        if !next.is_terminal() {
            self.check_cancelled()?;
        }
        debug!(from = %self.state, to = %next, "cursor transition");
        self.state = next;
        Ok(())
    }

    fn check_cancelled(&self) -> MigrateResult<()> {
        if self.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled {
                state: self.state,
                committed_rows: 0,
            });
        }
        Ok(())
    }

    fn finish(&mut self, result: MigrateResult<Outcome>) -> MigrateResult<Outcome> {
        if let Err(e) = &result {
            debug!(from = %self.state, error = %e, "cursor failed");
            self.state = CursorState::Failed;
        }
        result
    }
}

/// Key ranges covering `range`, one per digit length, shortest first.
///
/// Each range runs from the lowest to just past the highest key of that
/// length; longer keys sharing a prefix also fall inside and are skipped by
/// the caller.
fn shot_key_ranges(range: ShotRange) -> Vec<(usize, KeyRange)> {
    let mut ranges = Vec::new();
    let mut digits: u32 = 1;
    loop {
        let lowest = if digits == 1 { 0 } else { 10u64.pow(digits - 1) };
        let highest = 10u64.checked_pow(digits).map_or(u64::MAX, |p| p - 1);
        let first = lowest.max(range.first);
        let last = highest.min(range.last);
        if first <= last {
            ranges.push((
                digits as usize,
                KeyRange::new(first.to_string(), format!("{}\0", last)),
            ));
        }
        if highest >= range.last {
            break;
        }
        digits += 1;
    }
    ranges
}

/// Parse a shot row key; only canonical decimal ids qualify
fn parse_shot_key(key: &str) -> Option<u64> {
    let shot: u64 = key.parse().ok()?;
    (shot.to_string() == key).then_some(shot)
}

/// Register shot rows so the cursor can discover them.
///
/// Creates the table if needed. Registering a shot again only refreshes its
/// registration time; an existing migration marker is left in place.
pub fn seed_shots<S: WideColumnSink + ?Sized>(
    sink: &S,
    config: &MigrateConfig,
    shots: &[u64],
) -> MigrateResult<usize> {
    config.validate()?;
    let loader = BatchLoader::new(sink, config.column_family.as_str(), config.batch_size);
    loader.ensure_schema(&config.table_id)?;

    let registered = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    for chunk in shots.chunks(config.batch_size) {
        let mutations: Vec<RowMutation> = chunk
            .iter()
            .map(|shot| {
                RowMutation::new(shot.to_string()).with_cell(
                    &config.column_family,
                    REGISTERED_COLUMN,
                    registered.as_bytes(),
                )
            })
            .collect();
        sink.batch_write(&config.table_id, &mutations)?;
    }
    debug!(table = %config.table_id, shots = shots.len(), "shots registered");
    Ok(shots.len())
}
