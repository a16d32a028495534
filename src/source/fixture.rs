//! Directory-backed tree source
//!
//! Trees live at `<root>/<tree_name>/<shot>.json`, each file a nested node
//! document using the same keys as a serialized [`TreeNode`].
//!
//! Files are parsed with serde_json's default recursion limit of 128. Every
//! node level costs two (its object and its `children` array), so fixtures
//! nest at most about 60 nodes deep; deeper files fail with a `Document`
//! error. Deeper trees can still be walked through [`ArenaTree`] and
//! `MemorySource`, which have no depth limit.

use super::{ArenaTree, TreeSource};
use crate::error::{MigrateError, MigrateResult};
use crate::types::TreeNode;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FixtureSource {
    root: PathBuf,
}

impl FixtureSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        FixtureSource {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Location of the file backing `tree_name` for `shot`
    pub fn tree_path(&self, tree_name: &str, shot: u64) -> PathBuf {
        self.root.join(tree_name).join(format!("{}.json", shot))
    }

    /// Write a tree into the fixture directory, creating it as needed
    pub fn store(&self, tree_name: &str, shot: u64, tree: &TreeNode) -> MigrateResult<()> {
        let path = self.tree_path(tree_name, shot);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MigrateError::Source(format!("{}: {}", parent.display(), e)))?;
        }
        let json = serde_json::to_string_pretty(tree)?;
        std::fs::write(&path, json)
            .map_err(|e| MigrateError::Source(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }
}

impl TreeSource for FixtureSource {
    type Handle = ArenaTree;

    fn open_tree(&self, tree_name: &str, shot: u64) -> MigrateResult<ArenaTree> {
        let path = self.tree_path(tree_name, shot);
        if !path.is_file() {
            return Err(MigrateError::TreeNotFound {
                tree: tree_name.to_string(),
                shot,
            });
        }

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| MigrateError::Source(format!("{}: {}", path.display(), e)))?;
        let tree: TreeNode = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), "fixture tree opened");

        Ok(ArenaTree::from_tree_node(&tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TreeHandle;
    use crate::types::{Sample, Usage};

    #[test]
    fn test_store_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let source = FixtureSource::new(dir.path());
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure)
            .with_child(TreeNode::new("TE", "TreeNode", Usage::Signal).with_sample(Sample::new(1.1, 10.0)));

        source.store("my_tree", 42, &tree).unwrap();
        let handle = source.open_tree("my_tree", 42).unwrap();

        let te = handle.resolve("\\TE").unwrap();
        assert_eq!(handle.node(te).unwrap().samples, vec![Sample::new(1.1, 10.0)]);
    }

    #[test]
    fn test_missing_file_is_tree_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FixtureSource::new(dir.path());

        let err = source.open_tree("my_tree", 7).unwrap_err();
        assert!(matches!(err, MigrateError::TreeNotFound { ref tree, shot: 7 } if tree == "my_tree"));
    }

    fn chain(depth: usize) -> String {
        let mut json = String::from(r#"{"name":"LEAF","class":"TreeNode","usage":"SIGNAL"}"#);
        for level in 0..depth {
            json = format!(
                r#"{{"name":"N{}","class":"TreeNode","usage":"STRUCTURE","children":[{}]}}"#,
                level, json
            );
        }
        json
    }

    #[test]
    fn test_depth_limit_of_fixture_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = FixtureSource::new(dir.path());
        std::fs::create_dir_all(dir.path().join("my_tree")).unwrap();

        std::fs::write(source.tree_path("my_tree", 1), chain(50)).unwrap();
        let shallow = source.open_tree("my_tree", 1).unwrap();
        assert_eq!(shallow.len(), 51);

        std::fs::write(source.tree_path("my_tree", 2), chain(100)).unwrap();
        match source.open_tree("my_tree", 2) {
            Err(MigrateError::Document(e)) => assert!(e.to_string().contains("recursion limit")),
            other => panic!("expected a Document error, got {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn test_unparseable_file_is_document_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FixtureSource::new(dir.path());
        let path = source.tree_path("my_tree", 3);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(source.open_tree("my_tree", 3), Err(MigrateError::Document(_))));
    }
}
