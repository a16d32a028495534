//! In-memory tree handles

use super::{NodeId, NodeInfo, TreeHandle, TreeSource};
use crate::error::{MigrateError, MigrateResult};
use crate::types::TreeNode;
use std::collections::HashMap;

/// A tree held entirely in memory, nodes stored in an arena
#[derive(Debug, Clone)]
pub struct ArenaTree {
    nodes: Vec<NodeInfo>,
    root: NodeId,
}

impl ArenaTree {
    /// Build an arena from a nested node document
    pub fn from_tree_node(tree: &TreeNode) -> Self {
        let mut builder = ArenaBuilder::new();
        let root = builder.insert_tree(tree);
        builder.build(root)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl TreeHandle for ArenaTree {
    fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> Option<NodeInfo> {
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| self.nodes.get(idx))
            .cloned()
    }
}

/// Builds an [`ArenaTree`].
///
/// Edges are unchecked, so cyclic or shared graphs can be built on purpose.
#[derive(Debug, Default)]
pub struct ArenaBuilder {
    nodes: Vec<NodeInfo>,
}

impl ArenaBuilder {
    pub fn new() -> Self {
        ArenaBuilder::default()
    }

    pub fn add(&mut self, info: NodeInfo) -> NodeId {
        let id = NodeId(self.nodes.len() as u64);
        self.nodes.push(info);
        id
    }

    pub fn child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(info) = self.get_mut(parent) {
            info.children.push(child);
        }
    }

    pub fn segment(&mut self, parent: NodeId, segment: NodeId) {
        if let Some(info) = self.get_mut(parent) {
            info.segments.push(segment);
        }
    }

    pub fn dimension(&mut self, parent: NodeId, dimension: NodeId) {
        if let Some(info) = self.get_mut(parent) {
            info.dimensions.push(dimension);
        }
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeInfo> {
        usize::try_from(id.0).ok().and_then(|idx| self.nodes.get_mut(idx))
    }

    /// Copy a nested node document into the arena, returning its root id
    pub fn insert_tree(&mut self, tree: &TreeNode) -> NodeId {
        let root = self.add(Self::info_of(tree));
        let mut pending = vec![(root, tree)];

        while let Some((id, node)) = pending.pop() {
            for child in &node.children {
                let child_id = self.add(Self::info_of(child));
                self.child(id, child_id);
                pending.push((child_id, child));
            }
            for segment in &node.segments {
                let segment_id = self.add(Self::info_of(segment));
                self.segment(id, segment_id);
                pending.push((segment_id, segment));
            }
            for dimension in &node.dimensions {
                let dimension_id = self.add(Self::info_of(dimension));
                self.dimension(id, dimension_id);
                pending.push((dimension_id, dimension));
            }
        }

        root
    }

    pub fn build(self, root: NodeId) -> ArenaTree {
        ArenaTree {
            nodes: self.nodes,
            root,
        }
    }

    fn info_of(node: &TreeNode) -> NodeInfo {
        NodeInfo {
            name: node.name.clone(),
            kind: node.kind.clone(),
            usage: node.usage,
            help: node.help.clone(),
            segment_range: node.segment_range(),
            children: Vec::new(),
            segments: Vec::new(),
            dimensions: Vec::new(),
            samples: node.samples.clone(),
        }
    }
}

/// A source serving pre-built trees keyed by tree name and shot
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    trees: HashMap<(String, u64), ArenaTree>,
}

impl MemorySource {
    pub fn new() -> Self {
        MemorySource::default()
    }

    pub fn insert(&mut self, tree_name: impl Into<String>, shot: u64, tree: ArenaTree) {
        self.trees.insert((tree_name.into(), shot), tree);
    }

    pub fn with_tree(mut self, tree_name: impl Into<String>, shot: u64, tree: ArenaTree) -> Self {
        self.insert(tree_name, shot, tree);
        self
    }
}

impl TreeSource for MemorySource {
    type Handle = ArenaTree;

    fn open_tree(&self, tree_name: &str, shot: u64) -> MigrateResult<ArenaTree> {
        self.trees
            .get(&(tree_name.to_string(), shot))
            .cloned()
            .ok_or_else(|| MigrateError::TreeNotFound {
                tree: tree_name.to_string(),
                shot,
            })
    }
}
