//! Read-only access to the tree-structured experiment database
//!
//! The walker only ever sees a shot's tree through [`TreeHandle`], which
//! addresses nodes by opaque [`NodeId`]s. Two handles are provided:
//! [`ArenaTree`] (in memory) and [`FixtureSource`], which loads trees from
//! JSON files on disk.

pub mod arena;
pub mod fixture;

pub use arena::{ArenaBuilder, ArenaTree, MemorySource};
pub use fixture::FixtureSource;

use crate::error::MigrateResult;
use crate::types::{Sample, Usage};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::fmt;

// `\`, `\NAME`, `\A.B:C`
static NODE_PATH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\\(?:[A-Za-z_$][A-Za-z0-9_$\-]*(?:[.:][A-Za-z_$][A-Za-z0-9_$\-]*)*)?$").unwrap()
});

/// Identity of a node within one open tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything the source reports about a single node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub name: String,
    pub kind: String,
    pub usage: Usage,
    pub help: Option<String>,
    /// Begin and end index when the node stores segmented data
    pub segment_range: Option<(i64, i64)>,
    pub children: Vec<NodeId>,
    pub segments: Vec<NodeId>,
    pub dimensions: Vec<NodeId>,
    pub samples: Vec<Sample>,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, usage: Usage) -> Self {
        NodeInfo {
            name: name.into(),
            kind: kind.into(),
            usage,
            help: None,
            segment_range: None,
            children: Vec::new(),
            segments: Vec::new(),
            dimensions: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn is_segmented(&self) -> bool {
        self.segment_range.is_some()
    }
}

/// A source database that can open a named tree for a shot
pub trait TreeSource {
    type Handle: TreeHandle;

    /// Open `tree_name` for `shot`, failing with `TreeNotFound` if the pair
    /// does not exist. The handle is released when dropped.
    fn open_tree(&self, tree_name: &str, shot: u64) -> MigrateResult<Self::Handle>;
}

/// An open tree of one shot
pub trait TreeHandle {
    fn root(&self) -> NodeId;

    fn node(&self, id: NodeId) -> Option<NodeInfo>;

    /// Resolve a node path.
    ///
    /// `\` is the root, `\NAME` is the first node called `NAME` in
    /// breadth-first order, and `\A.B:C` walks child names starting below
    /// the root (a leading component naming the root itself is skipped).
    /// Names compare case-insensitively.
    fn resolve(&self, path: &str) -> Option<NodeId> {
        if !NODE_PATH_REGEX.is_match(path) {
            return None;
        }
        let root = self.root();
        let rest = &path[1..];
        if rest.is_empty() {
            return Some(root);
        }

        let parts: Vec<&str> = rest.split(['.', ':']).collect();
        if parts.len() == 1 {
            return find_by_name(self, root, parts[0]);
        }

        let mut current = root;
        let mut parts = parts.as_slice();
        let root_name = self.node(root)?.name;
        if parts[0].eq_ignore_ascii_case(&root_name) {
            parts = &parts[1..];
        }
        for part in parts {
            let info = self.node(current)?;
            current = info
                .children
                .iter()
                .chain(info.segments.iter())
                .copied()
                .find(|id| {
                    self.node(*id)
                        .map(|child| child.name.eq_ignore_ascii_case(part))
                        .unwrap_or(false)
                })?;
        }
        Some(current)
    }
}

/// Breadth-first search for the first node carrying `name`
fn find_by_name<H: TreeHandle + ?Sized>(handle: &H, root: NodeId, name: &str) -> Option<NodeId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root]);

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        let Some(info) = handle.node(id) else {
            continue;
        };
        if id != root && info.name.eq_ignore_ascii_case(name) {
            return Some(id);
        }
        queue.extend(info.children.iter().chain(info.segments.iter()).copied());
    }

    None
}
