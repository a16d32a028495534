use crate::config::{RowIdentity, TimeWindow};
use crate::types::{FlatRow, ShotDocument, TreeNode, Usage};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::warn;

/// Why a sample could not become a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordDefect {
    MissingFloat,
    MissingValue,
    MissingBoth,
}

impl fmt::Display for RecordDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RecordDefect::MissingFloat => "missing secondary key",
            RecordDefect::MissingValue => "missing value",
            RecordDefect::MissingBoth => "missing secondary key and value",
        };
        f.write_str(text)
    }
}

/// A skipped sample, reported instead of silently dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedRecord {
    /// Document path of the sample, e.g. `tree.children[0].samples[1]`
    pub path: String,
    pub defect: RecordDefect,
}

/// Output of flattening one shot document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flattened {
    /// Aggregated rows, ascending by id, then name, then float
    pub rows: Vec<FlatRow>,
    pub skipped: Vec<MalformedRecord>,
    /// Samples that contributed to `rows`
    pub samples_read: usize,
    /// Well-formed samples dropped by the time window
    pub outside_window: usize,
}

/// Secondary key with a total order; `-0.0` and `0.0` are the same key
#[derive(Debug, Clone, Copy)]
struct AxisKey(f64);

impl AxisKey {
    fn new(value: f64) -> Self {
        if value == 0.0 {
            AxisKey(0.0)
        } else {
            AxisKey(value)
        }
    }
}

impl PartialEq for AxisKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AxisKey {}

impl PartialOrd for AxisKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AxisKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

// Field order is the output order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    id: String,
    name: String,
    float: AxisKey,
}

/// Where a node sits in the document. Paths are rendered only when needed.
struct Trail {
    parent: Option<Rc<Trail>>,
    step: Step,
    name: String,
}

enum Step {
    Root(String),
    Member { key: &'static str, index: usize },
}

impl Trail {
    fn document_path(&self) -> String {
        let mut parts = Vec::new();
        let mut current = Some(self);
        while let Some(trail) = current {
            match &trail.step {
                Step::Root(label) => parts.push(label.clone()),
                Step::Member { key, index } => parts.push(format!("{}[{}]", key, index)),
            }
            current = trail.parent.as_deref();
        }
        parts.reverse();
        parts.join(".")
    }

    fn name_path(&self) -> String {
        let mut names = Vec::new();
        let mut current = Some(self);
        while let Some(trail) = current {
            names.push(trail.name.as_str());
            current = trail.parent.as_deref();
        }
        names.reverse();
        names.join(".")
    }
}

/// Normalizes shot documents into aggregated flat rows
#[derive(Debug, Clone, Default)]
pub struct Flattener {
    identity: RowIdentity,
    window: Option<TimeWindow>,
}

impl Flattener {
    pub fn new(identity: RowIdentity) -> Self {
        Flattener {
            identity,
            window: None,
        }
    }

    /// Keep only samples whose secondary key falls inside `window`
    pub fn with_time_window(mut self, window: Option<TimeWindow>) -> Self {
        self.window = window;
        self
    }

    /// Flatten every signal under the root tree and all subtrees.
    ///
    /// Nodes inside `tree` at one of the document's `subtree_paths` are only
    /// read once, from `subtrees`, so their samples are not counted twice.
    pub fn flatten(&self, doc: &ShotDocument) -> Flattened {
        let mut groups: BTreeMap<GroupKey, f64> = BTreeMap::new();
        let mut counts = Counts::default();
        let mut skipped = Vec::new();

        for (label, root) in doc.roots() {
            // Document path, tracked only while it can still lead to a subtree path
            let tracked = (label == "tree" && !doc.subtree_paths.is_empty())
                .then(|| label.clone());
            let mut stack = vec![(
                root,
                Rc::new(Trail {
                    parent: None,
                    step: Step::Root(label),
                    name: root.name.clone(),
                }),
                tracked,
            )];

            while let Some((node, trail, tracked)) = stack.pop() {
                if let Some(path) = &tracked {
                    if doc.subtree_paths.iter().any(|p| p == path) {
                        continue;
                    }
                }
                if node.usage == Usage::Signal && !node.samples.is_empty() {
                    self.collect_samples(node, &trail, &mut groups, &mut counts, &mut skipped);
                }

                let members = [
                    ("dimensions", &node.dimensions),
                    ("segments", &node.segments),
                    ("children", &node.children),
                ];
                for (key, nodes) in members {
                    for (index, next) in nodes.iter().enumerate().rev() {
                        let next_tracked = tracked.as_ref().and_then(|path| {
                            let child = format!("{}.{}[{}]", path, key, index);
                            leads_to_subtree(doc, &child).then_some(child)
                        });
                        stack.push((
                            next,
                            Rc::new(Trail {
                                parent: Some(Rc::clone(&trail)),
                                step: Step::Member { key, index },
                                name: next.name.clone(),
                            }),
                            next_tracked,
                        ));
                    }
                }
            }
        }

        let rows = groups
            .into_iter()
            .map(|(key, value)| FlatRow {
                id: key.id,
                name: key.name,
                float: key.float.0,
                value,
            })
            .collect();

        Flattened {
            rows,
            skipped,
            samples_read: counts.read,
            outside_window: counts.outside_window,
        }
    }

    fn collect_samples(
        &self,
        node: &TreeNode,
        trail: &Trail,
        groups: &mut BTreeMap<GroupKey, f64>,
        counts: &mut Counts,
        skipped: &mut Vec<MalformedRecord>,
    ) {
        let id = match self.identity {
            RowIdentity::NodeName => node.name.clone(),
            RowIdentity::NodePath => trail.name_path(),
        };

        for (index, sample) in node.samples.iter().enumerate() {
            let (float, value) = match (sample.float, sample.value) {
                (Some(float), Some(value)) => (float, value),
                (float, value) => {
                    let defect = match (float, value) {
                        (None, None) => RecordDefect::MissingBoth,
                        (None, _) => RecordDefect::MissingFloat,
                        _ => RecordDefect::MissingValue,
                    };
                    let path = format!("{}.samples[{}]", trail.document_path(), index);
                    warn!(%path, %defect, "skipping malformed record");
                    skipped.push(MalformedRecord { path, defect });
                    continue;
                }
            };

            if let Some(window) = self.window {
                if !window.contains(float) {
                    counts.outside_window += 1;
                    continue;
                }
            }

            let key = GroupKey {
                id: id.clone(),
                name: node.name.clone(),
                float: AxisKey::new(float),
            };
            *groups.entry(key).or_insert(0.0) += value;
            counts.read += 1;
        }
    }
}

#[derive(Default)]
struct Counts {
    read: usize,
    outside_window: usize,
}

/// Whether `path` is a subtree path or an ancestor of one
fn leads_to_subtree(doc: &ShotDocument, path: &str) -> bool {
    doc.subtree_paths.iter().any(|target| {
        target == path
            || (target.starts_with(path) && target[path.len()..].starts_with('.'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;

    fn signal(name: &str, samples: &[(f64, f64)]) -> TreeNode {
        samples.iter().fold(
            TreeNode::new(name, "TreeNode", Usage::Signal),
            |node, (float, value)| node.with_sample(Sample::new(*float, *value)),
        )
    }

    fn document(tree: TreeNode, subtrees: Vec<TreeNode>) -> ShotDocument {
        ShotDocument {
            shot: 12345,
            tree_name: "my_tree".to_string(),
            tree,
            subtrees,
            subtree_paths: Vec::new(),
        }
    }

    #[test]
    fn test_distinct_keys_stay_separate() {
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure)
            .with_child(signal("Te", &[(1.1, 10.0), (2.2, 20.0)]));

        let flattened = Flattener::default().flatten(&document(tree, vec![]));

        assert_eq!(
            flattened.rows,
            vec![
                FlatRow::new("Te", "Te", 1.1, 10.0),
                FlatRow::new("Te", "Te", 2.2, 20.0),
            ]
        );
        assert_eq!(flattened.samples_read, 2);
        assert!(flattened.skipped.is_empty());
    }

    #[test]
    fn test_duplicate_keys_are_summed() {
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure)
            .with_child(signal("Te", &[(1.1, 10.0)]))
            .with_child(
                TreeNode::new("PROFILES", "TreeNode", Usage::Structure)
                    .with_child(signal("Te", &[(1.1, 5.0)])),
            );

        let flattened = Flattener::new(RowIdentity::NodeName).flatten(&document(tree, vec![]));

        assert_eq!(flattened.rows, vec![FlatRow::new("Te", "Te", 1.1, 15.0)]);
        assert_eq!(flattened.samples_read, 2);
    }

    #[test]
    fn test_node_path_identity_keeps_branches_apart() {
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure)
            .with_child(signal("Te", &[(1.1, 10.0)]))
            .with_child(
                TreeNode::new("PROFILES", "TreeNode", Usage::Structure)
                    .with_child(signal("Te", &[(1.1, 5.0)])),
            );

        let flattened = Flattener::new(RowIdentity::NodePath).flatten(&document(tree, vec![]));

        assert_eq!(
            flattened.rows,
            vec![
                FlatRow::new("TOP.PROFILES.Te", "Te", 1.1, 5.0),
                FlatRow::new("TOP.Te", "Te", 1.1, 10.0),
            ]
        );
    }

    #[test]
    fn test_output_is_sorted_by_id_name_float() {
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure)
            .with_child(signal("Pe", &[(4.4, 40.0), (3.3, 30.0)]))
            .with_child(signal("Ne", &[(0.5, 1.0), (-0.5, 2.0)]));

        let rows = Flattener::default().flatten(&document(tree, vec![])).rows;
        let keys: Vec<(&str, f64)> = rows.iter().map(|r| (r.id.as_str(), r.float)).collect();

        assert_eq!(keys, vec![("Ne", -0.5), ("Ne", 0.5), ("Pe", 3.3), ("Pe", 4.4)]);
    }

    #[test]
    fn test_negative_zero_merges_with_zero() {
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure)
            .with_child(signal("Ip", &[(0.0, 1.0), (-0.0, 2.0)]));

        let rows = Flattener::default().flatten(&document(tree, vec![])).rows;
        assert_eq!(rows, vec![FlatRow::new("Ip", "Ip", 0.0, 3.0)]);
    }

    #[test]
    fn test_malformed_samples_are_reported() {
        let te = signal("Te", &[(1.1, 10.0)])
            .with_sample(Sample { float: None, value: Some(3.0) })
            .with_sample(Sample { float: Some(2.0), value: None });
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure).with_child(te);

        let flattened = Flattener::default().flatten(&document(tree, vec![]));

        assert_eq!(flattened.rows.len(), 1);
        assert_eq!(
            flattened.skipped,
            vec![
                MalformedRecord {
                    path: "tree.children[0].samples[1]".to_string(),
                    defect: RecordDefect::MissingFloat,
                },
                MalformedRecord {
                    path: "tree.children[0].samples[2]".to_string(),
                    defect: RecordDefect::MissingValue,
                },
            ]
        );
    }

    #[test]
    fn test_non_signal_samples_ignored() {
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure).with_child(
            TreeNode::new("CONFIG", "TreeNode", Usage::Other).with_sample(Sample::new(1.0, 1.0)),
        );

        let flattened = Flattener::default().flatten(&document(tree, vec![]));
        assert!(flattened.rows.is_empty());
    }

    #[test]
    fn test_subtree_counted_once() {
        let magnetics = TreeNode::new("MAGNETICS", "TreeNode", Usage::Subtree)
            .with_child(signal("Ip", &[(1.0, 7.0)]));
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure).with_child(magnetics.clone());
        let mut doc = document(tree, vec![magnetics]);
        doc.subtree_paths = vec!["tree.children[0]".to_string()];

        let flattened = Flattener::default().flatten(&doc);

        assert_eq!(flattened.rows, vec![FlatRow::new("Ip", "Ip", 1.0, 7.0)]);
    }

    #[test]
    fn test_identical_sibling_of_subtree_is_kept() {
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure)
            .with_child(
                TreeNode::new("A", "TreeNode", Usage::Structure).with_child(signal("Te", &[(1.0, 5.0)])),
            )
            .with_child(
                TreeNode::new("B", "TreeNode", Usage::Structure).with_child(signal("Te", &[(1.0, 5.0)])),
            );
        let mut doc = document(tree, vec![signal("Te", &[(1.0, 5.0)])]);
        doc.subtree_paths = vec!["tree.children[0].children[0]".to_string()];

        let by_path = Flattener::new(RowIdentity::NodePath).flatten(&doc);
        assert_eq!(
            by_path.rows,
            vec![
                FlatRow::new("TOP.B.Te", "Te", 1.0, 5.0),
                FlatRow::new("Te", "Te", 1.0, 5.0),
            ]
        );

        // A.Te once through the subtree, B.Te once in place
        let by_name = Flattener::new(RowIdentity::NodeName).flatten(&doc);
        assert_eq!(by_name.rows, vec![FlatRow::new("Te", "Te", 1.0, 10.0)]);
        assert_eq!(by_name.samples_read, 2);
    }

    #[test]
    fn test_time_window_filters_samples() {
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure)
            .with_child(signal("Te", &[(0.5, 1.0), (1.0, 2.0), (1.5, 3.0), (2.5, 4.0)]));
        let flattener = Flattener::default().with_time_window(Some(TimeWindow::new(1.0, 1.5)));

        let flattened = flattener.flatten(&document(tree, vec![]));

        assert_eq!(
            flattened.rows,
            vec![FlatRow::new("Te", "Te", 1.0, 2.0), FlatRow::new("Te", "Te", 1.5, 3.0)]
        );
        assert_eq!(flattened.samples_read, 2);
        assert_eq!(flattened.outside_window, 2);
    }

    #[test]
    fn test_unlisted_subtree_read_in_place() {
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure).with_child(
            TreeNode::new("SPECTRO", "TreeNode", Usage::Subtree)
                .with_child(signal("Ti", &[(2.0, 4.0)])),
        );

        let flattened = Flattener::default().flatten(&document(tree, vec![]));
        assert_eq!(flattened.rows, vec![FlatRow::new("Ti", "Ti", 2.0, 4.0)]);
    }

    #[test]
    fn test_flatten_is_repeatable() {
        let tree = TreeNode::new("TOP", "TreeNode", Usage::Structure)
            .with_child(signal("Te", &[(2.2, 1.0), (1.1, 2.0), (2.2, 3.0)]))
            .with_child(signal("Ne", &[(1.0, 1.0)]));
        let doc = document(tree, vec![]);
        let flattener = Flattener::default();

        assert_eq!(flattener.flatten(&doc), flattener.flatten(&doc));
    }
}
