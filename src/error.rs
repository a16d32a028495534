//! Error types for shot migration.

use crate::cursor::CursorState;
use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Result type alias for sink client operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Errors that can abort the migration of a shot.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("tree '{tree}' has no shot {shot}")]
    TreeNotFound { tree: String, shot: u64 },

    #[error("subtree '{subtree}' not found in tree '{tree}' shot {shot}")]
    SubtreeNotFound {
        tree: String,
        shot: u64,
        subtree: String,
    },

    #[error("malformed tree at {path}: {reason}")]
    MalformedTree { path: String, reason: String },

    /// A batch write failed. Batches before `batch_index` stay committed.
    #[error("batch {batch_index} failed with {committed_rows} rows already committed: {source}")]
    WriteFailed {
        batch_index: usize,
        committed_rows: usize,
        #[source]
        source: SinkError,
    },

    #[error("cancelled while {state} ({committed_rows} rows committed)")]
    Cancelled {
        state: CursorState,
        committed_rows: usize,
    },

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("source error: {0}")]
    Source(String),

    #[error("document error: {0}")]
    Document(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors reported by a wide-column sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("column family '{family}' does not exist in table '{table}'")]
    UnknownFamily { table: String, family: String },

    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),
}
