//! Shot document flattening - normalize nested signal trees into flat rows
//!
//! Every sample of every signal node becomes one `(id, name, float, value)`
//! row. Rows sharing the same `(id, name, float)` key are merged by summing
//! their values, and the output is sorted by that key so downstream batching
//! is deterministic.

pub mod flattener;
pub mod writer;

pub use flattener::{Flattened, Flattener, MalformedRecord, RecordDefect};
pub use writer::RowWriter;
