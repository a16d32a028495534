//! # Shotmill - shot tree migration pipeline
//!
//! Moves experiment shots out of a hierarchical tree store and into a
//! wide-column table, one shot per invocation.
//!
//! ## Modules
//!
//! - **source**: Open the node tree of a shot (in memory or from a fixture directory)
//! - **walker**: Walk a tree into a nested JSON-shaped [`ShotDocument`]
//! - **flatten**: Pivot a document into `(id, name, float, value)` rows
//! - **loader**: Write rows to a sink in fixed-size batches
//! - **cursor**: Pick the next unmigrated shot, migrate it, mark it done
//! - **sink**: The wide-column store (in memory or redb-backed)
//!
//! ## Quick Start
//!
//! ```rust
//! use shotmill::{
//!     seed_shots, ArenaTree, MemorySink, MemorySource, MigrateConfig, MigrationCursor,
//!     Outcome, Sample, TreeNode, Usage,
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure).with_child(
//!     TreeNode::new("Te", "TreeNode", Usage::Signal)
//!         .with_sample(Sample::new(1.1, 10.0))
//!         .with_sample(Sample::new(2.2, 20.0)),
//! );
//! let source = MemorySource::new().with_tree("my_tree", 12345, ArenaTree::from_tree_node(&tree));
//! let sink = MemorySink::new();
//! let config = MigrateConfig::default();
//!
//! seed_shots(&sink, &config, &[12345])?;
//! let outcome = MigrationCursor::new(&source, &sink, &config).run()?;
//!
//! // Outcome::Migrated(report) with report.rows_written == 2
//! assert!(matches!(outcome, Outcome::Migrated(_)));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod flatten;
pub mod loader;
pub mod sink;
pub mod source;
pub mod types;
pub mod walker;

// Re-export commonly used types for convenience
pub use config::{MigrateConfig, RowIdentity, ShotRange, TimeWindow};
pub use cursor::{seed_shots, CancelToken, CursorState, MigrationCursor, MigrationReport, Outcome};
pub use error::{MigrateError, MigrateResult, SinkError, SinkResult};
pub use flatten::{Flattened, Flattener, MalformedRecord, RecordDefect, RowWriter};
pub use loader::{BatchLoader, LoadSummary};
pub use sink::{MemorySink, RedbSink, RowMutation, WideColumnSink};
pub use source::{ArenaBuilder, ArenaTree, FixtureSource, MemorySource, NodeId, NodeInfo, TreeHandle, TreeSource};
pub use types::{FlatRow, Sample, ShotDocument, TreeNode, Usage};
pub use walker::{walk_shot, TreeWalker};

/// Main entry point: migrate the next unmigrated shot, if any
pub fn migrate_next_shot<Src, S>(source: &Src, sink: &S, config: &MigrateConfig) -> MigrateResult<Outcome>
where
    Src: TreeSource,
    S: WideColumnSink + ?Sized,
{
    MigrationCursor::new(source, sink, config).run()
}
