//! Migration configuration
//!
//! `MigrateConfig` carries every tunable of one migration invocation. It can
//! be built in code from `Default`, or read from TOML where every key is
//! optional and falls back to the default.

use crate::error::{MigrateError, MigrateResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of rows per sink batch
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default column family holding every cell
pub const DEFAULT_COLUMN_FAMILY: &str = "cf1";

/// Default column of the per-shot migration marker
pub const DEFAULT_MARKER_COLUMN: &str = "migrated_date";

// Table and column family ids share the wide-column store's naming rule
static SINK_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[_a-zA-Z0-9][-_.a-zA-Z0-9]*$").unwrap()
});

/// How the `id` column of a flattened row is derived from its signal node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowIdentity {
    /// The signal node's own name
    #[default]
    NodeName,
    /// Dotted names from the document root down to the signal node
    NodePath,
}

/// Inclusive range of shot ids the cursor may pick from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotRange {
    pub first: u64,
    pub last: u64,
}

impl ShotRange {
    pub fn new(first: u64, last: u64) -> Self {
        ShotRange { first, last }
    }

    pub fn contains(&self, shot: u64) -> bool {
        (self.first..=self.last).contains(&shot)
    }
}

impl Default for ShotRange {
    fn default() -> Self {
        ShotRange { first: 1, last: 99_999 }
    }
}

/// Inclusive window on the secondary axis; samples outside it are not read
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    pub fn new(start: f64, end: f64) -> Self {
        TimeWindow { start, end }
    }

    pub fn contains(&self, float: f64) -> bool {
        float >= self.start && float <= self.end
    }
}

/// Configuration for the migration pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Name of the source tree to open for each shot
    pub tree_name: String,

    /// Subtrees to migrate alongside the root; `None` discovers every
    /// SUBTREE child of the root
    pub subtrees: Option<Vec<String>>,

    /// Sink table holding both shot rows and data rows
    pub table_id: String,

    pub column_family: String,

    pub marker_column: String,

    pub batch_size: usize,

    pub shot_range: ShotRange,

    pub row_identity: RowIdentity,

    /// Store the serialized shot document on the shot row with the marker
    pub store_document: bool,

    /// Only migrate samples whose secondary key falls in this window
    pub time_window: Option<TimeWindow>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        MigrateConfig {
            tree_name: String::from("my_tree"),
            subtrees: None,
            table_id: String::from("my-table"),
            column_family: String::from(DEFAULT_COLUMN_FAMILY),
            marker_column: String::from(DEFAULT_MARKER_COLUMN),
            batch_size: DEFAULT_BATCH_SIZE,
            shot_range: ShotRange::default(),
            row_identity: RowIdentity::default(),
            store_document: true,
            time_window: None,
        }
    }
}

impl MigrateConfig {
    /// Parse and validate a TOML configuration
    pub fn from_toml_str(raw: &str) -> MigrateResult<Self> {
        let config: MigrateConfig =
            toml::from_str(raw).map_err(|e| MigrateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> MigrateResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MigrateError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Check the invariants the pipeline relies on
    pub fn validate(&self) -> MigrateResult<()> {
        if self.batch_size == 0 {
            return Err(MigrateError::Config("batch_size must be at least 1".into()));
        }
        if self.shot_range.first > self.shot_range.last {
            return Err(MigrateError::Config(format!(
                "shot_range is empty ({}..={})",
                self.shot_range.first, self.shot_range.last
            )));
        }
        if let Some(window) = self.time_window {
            if !window.start.is_finite() || !window.end.is_finite() || window.start > window.end {
                return Err(MigrateError::Config(format!(
                    "time_window is invalid ({}..={})",
                    window.start, window.end
                )));
            }
        }
        if self.tree_name.trim().is_empty() {
            return Err(MigrateError::Config("tree_name is required".into()));
        }
        for (what, id) in [
            ("table_id", &self.table_id),
            ("column_family", &self.column_family),
            ("marker_column", &self.marker_column),
        ] {
            if !SINK_ID_REGEX.is_match(id) {
                return Err(MigrateError::Config(format!("invalid {}: '{}'", what, id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MigrateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.column_family, "cf1");
        assert!(config.shot_range.contains(1));
        assert!(config.shot_range.contains(99_999));
        assert!(!config.shot_range.contains(100_000));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MigrateConfig::from_toml_str(
            r#"
            tree_name = "kstar"
            batch_size = 50
            subtrees = ["magnetics"]
            row_identity = "node_path"

            [shot_range]
            first = 1000
            last = 2000
            "#,
        )
        .unwrap();

        assert_eq!(config.tree_name, "kstar");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.subtrees, Some(vec!["magnetics".to_string()]));
        assert_eq!(config.row_identity, RowIdentity::NodePath);
        assert_eq!(config.shot_range, ShotRange::new(1000, 2000));
        assert_eq!(config.table_id, "my-table");
    }

    #[test]
    fn test_time_window_from_toml() {
        let config = MigrateConfig::from_toml_str(
            r#"
            time_window = { start = 0.5, end = 2.0 }
            "#,
        )
        .unwrap();

        let window = config.time_window.unwrap();
        assert!(window.contains(0.5));
        assert!(window.contains(2.0));
        assert!(!window.contains(2.1));
        assert!(MigrateConfig::default().time_window.is_none());
    }

    #[test]
    fn test_rejects_inverted_time_window() {
        let config = MigrateConfig {
            time_window: Some(TimeWindow::new(3.0, 1.0)),
            ..MigrateConfig::default()
        };
        assert!(matches!(config.validate(), Err(MigrateError::Config(_))));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(MigrateConfig::from_toml_str("batch_size = 0").is_err());
        assert!(MigrateConfig::from_toml_str("table_id = \"bad table\"").is_err());

        let config = MigrateConfig {
            shot_range: ShotRange::new(10, 5),
            ..MigrateConfig::default()
        };
        assert!(matches!(config.validate(), Err(MigrateError::Config(_))));
    }
}
