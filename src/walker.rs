use crate::error::{MigrateError, MigrateResult};
use crate::source::{NodeId, NodeInfo, TreeHandle, TreeSource};
use crate::types::{ShotDocument, TreeNode, Usage};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Serializes an open source tree into nested [`TreeNode`]s
pub struct TreeWalker<'h, H: TreeHandle + ?Sized> {
    handle: &'h H,
}

impl<'h, H: TreeHandle + ?Sized> TreeWalker<'h, H> {
    pub fn new(handle: &'h H) -> Self {
        TreeWalker { handle }
    }

    /// Walk the subtree below `root`, depth-first and pre-order.
    ///
    /// `path` names `root` in error messages. Reaching any node identity a
    /// second time fails with `MalformedTree` instead of looping.
    pub fn walk(&self, root: NodeId, path: &str) -> MigrateResult<TreeNode> {
        self.walk_locating(root, path, &[]).map(|(tree, _)| tree)
    }

    /// Walk like [`walk`](Self::walk), also returning the document path of
    /// every node in `targets` reached on the way, in pre-order.
    pub fn walk_locating(
        &self,
        root: NodeId,
        path: &str,
        targets: &[NodeId],
    ) -> MigrateResult<(TreeNode, Vec<String>)> {
        let mut located = Vec::new();
        let mut visited = HashSet::new();
        let mut order: Vec<Visit> = Vec::new();
        let mut infos: HashMap<NodeId, NodeInfo> = HashMap::new();
        let mut stack = vec![Visit {
            id: root,
            parent: None,
            key: "",
            index: 0,
        }];

        // First pass: discover nodes in pre-order
        while let Some(visit) = stack.pop() {
            let id = visit.id;
            if !visited.insert(id) {
                return Err(MigrateError::MalformedTree {
                    path: visit_path(path, &order, &visit),
                    reason: format!("node {} reached more than once", id),
                });
            }
            let Some(info) = self.handle.node(id) else {
                return Err(MigrateError::MalformedTree {
                    path: visit_path(path, &order, &visit),
                    reason: format!("node {} does not resolve", id),
                });
            };

            if targets.contains(&id) {
                located.push(visit_path(path, &order, &visit));
            }

            // Pushed in reverse so they pop in source order
            let position = order.len();
            let groups = [
                ("dimensions", &info.dimensions),
                ("segments", &info.segments),
                ("children", &info.children),
            ];
            for (key, ids) in groups {
                for (index, next) in ids.iter().enumerate().rev() {
                    stack.push(Visit {
                        id: *next,
                        parent: Some(position),
                        key,
                        index,
                    });
                }
            }

            order.push(visit);
            infos.insert(id, info);
        }

        // Second pass: descendants always follow their ancestors in pre-order,
        // so assembling in reverse builds every child before its parent
        let mut built: HashMap<NodeId, TreeNode> = HashMap::with_capacity(order.len());
        for visit in order.iter().rev() {
            let Some(info) = infos.remove(&visit.id) else {
                continue;
            };
            let children = take_built(&info.children, &mut built, path)?;
            let segments = take_built(&info.segments, &mut built, path)?;
            let dimensions = take_built(&info.dimensions, &mut built, path)?;

            let (begin, end) = match info.segment_range {
                Some((begin, end)) => (Some(begin), Some(end)),
                None => (None, None),
            };

            built.insert(
                visit.id,
                TreeNode {
                    name: info.name,
                    kind: info.kind,
                    usage: info.usage,
                    help: info.help,
                    begin,
                    end,
                    children,
                    segments,
                    dimensions,
                    samples: info.samples,
                },
            );
        }

        let tree = built.remove(&root).ok_or_else(|| MigrateError::MalformedTree {
            path: path.to_string(),
            reason: String::from("root was not assembled"),
        })?;
        Ok((tree, located))
    }
}

/// A node reached during the walk and where it hangs off its parent
struct Visit {
    id: NodeId,
    /// Position of the parent in the pre-order list
    parent: Option<usize>,
    key: &'static str,
    index: usize,
}

/// Document path of `visit`, e.g. `tree.children[0].dimensions[1]`
fn visit_path(base: &str, order: &[Visit], visit: &Visit) -> String {
    let mut parts = Vec::new();
    let mut current = Some(visit);
    while let Some(step) = current {
        if step.parent.is_some() {
            parts.push(format!("{}[{}]", step.key, step.index));
        }
        current = step.parent.and_then(|idx| order.get(idx));
    }
    parts.push(base.to_string());
    parts.reverse();
    parts.join(".")
}

fn take_built(
    ids: &[NodeId],
    built: &mut HashMap<NodeId, TreeNode>,
    path: &str,
) -> MigrateResult<Vec<TreeNode>> {
    ids.iter()
        .map(|id| {
            built.remove(id).ok_or_else(|| MigrateError::MalformedTree {
                path: path.to_string(),
                reason: format!("node {} assembled out of order", id),
            })
        })
        .collect()
}

/// Open `tree_name` for `shot` and serialize its root plus subtrees.
///
/// With `subtrees = None`, every immediate child of the root whose usage is
/// SUBTREE is migrated, in source order.
pub fn walk_shot<S: TreeSource>(
    source: &S,
    shot: u64,
    tree_name: &str,
    subtrees: Option<&[String]>,
) -> MigrateResult<ShotDocument> {
    let handle = source.open_tree(tree_name, shot)?;
    let root = handle.root();

    let subtree_ids: Vec<NodeId> = match subtrees {
        Some(names) => names
            .iter()
            .map(|name| {
                let path = if name.starts_with('\\') {
                    name.clone()
                } else {
                    format!("\\{}", name)
                };
                handle
                    .resolve(&path)
                    .ok_or_else(|| MigrateError::SubtreeNotFound {
                        tree: tree_name.to_string(),
                        shot,
                        subtree: name.clone(),
                    })
            })
            .collect::<MigrateResult<_>>()?,
        None => {
            let info = handle.node(root).ok_or_else(|| MigrateError::MalformedTree {
                path: String::from("tree"),
                reason: format!("root node {} does not resolve", root),
            })?;
            info.children
                .iter()
                .copied()
                .filter(|id| {
                    handle
                        .node(*id)
                        .map(|child| child.usage == Usage::Subtree)
                        .unwrap_or(false)
                })
                .collect()
        }
    };

    let walker = TreeWalker::new(&handle);
    let (tree, subtree_paths) = walker.walk_locating(root, "tree", &subtree_ids)?;
    let subtrees = subtree_ids
        .iter()
        .enumerate()
        .map(|(idx, id)| walker.walk(*id, &format!("subtrees[{}]", idx)))
        .collect::<MigrateResult<Vec<_>>>()?;

    debug!(shot, tree_name, subtrees = subtrees.len(), "shot walked");

    Ok(ShotDocument {
        shot,
        tree_name: tree_name.to_string(),
        tree,
        subtrees,
        subtree_paths,
    })
}
