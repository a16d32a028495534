use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Usage category of a source tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    Signal,
    Subtree,
    Structure,
    Other,
}

impl Usage {
    /// Parse a usage string as reported by the source database.
    /// Anything unrecognised becomes `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SIGNAL" => Usage::Signal,
            "SUBTREE" => Usage::Subtree,
            "STRUCTURE" => Usage::Structure,
            _ => Usage::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Usage::Signal => "SIGNAL",
            Usage::Subtree => "SUBTREE",
            Usage::Structure => "STRUCTURE",
            Usage::Other => "OTHER",
        }
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Usage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Usage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Usage::parse(&raw))
    }
}

/// One time-series sample held by a signal node.
///
/// Both fields are optional so that incomplete samples survive the walk and
/// can be reported when the document is flattened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Secondary axis value (usually time)
    #[serde(alias = "time", default, skip_serializing_if = "Option::is_none")]
    pub float: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Sample {
    pub fn new(float: f64, value: f64) -> Self {
        Sample {
            float: Some(float),
            value: Some(value),
        }
    }
}

/// A serialized node of a shot's record tree.
///
/// Collections and the segment range are sparse: they are omitted from the
/// serialized form when empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,

    #[serde(rename = "class")]
    pub kind: String,

    pub usage: Usage,

    #[serde(default)]
    pub help: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<TreeNode>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<TreeNode>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<Sample>,
}

impl TreeNode {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, usage: Usage) -> Self {
        TreeNode {
            name: name.into(),
            kind: kind.into(),
            usage,
            help: None,
            begin: None,
            end: None,
            children: Vec::new(),
            segments: Vec::new(),
            dimensions: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_segment_range(mut self, begin: i64, end: i64) -> Self {
        self.begin = Some(begin);
        self.end = Some(end);
        self
    }

    pub fn with_child(mut self, child: TreeNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_segment(mut self, segment: TreeNode) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn with_dimension(mut self, dimension: TreeNode) -> Self {
        self.dimensions.push(dimension);
        self
    }

    pub fn with_sample(mut self, sample: Sample) -> Self {
        self.samples.push(sample);
        self
    }

    /// Segment range, if the node stores segmented data
    pub fn segment_range(&self) -> Option<(i64, i64)> {
        self.begin.zip(self.end)
    }
}

/// The serialized form of one shot: its root tree plus any named subtrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotDocument {
    pub shot: u64,
    pub tree_name: String,
    pub tree: TreeNode,
    #[serde(default)]
    pub subtrees: Vec<TreeNode>,
    /// Document paths inside `tree` of the nodes also walked as `subtrees`,
    /// e.g. `tree.children[0]`. Nodes at these paths are read only once.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtree_paths: Vec<String>,
}

impl ShotDocument {
    /// Render the document as indented JSON
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Every top-level node of the document paired with its document path.
    pub fn roots(&self) -> impl Iterator<Item = (String, &TreeNode)> {
        std::iter::once((String::from("tree"), &self.tree)).chain(
            self.subtrees
                .iter()
                .enumerate()
                .map(|(idx, node)| (format!("subtrees[{}]", idx), node)),
        )
    }
}

/// One relational row derived from a shot document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    pub id: String,
    pub name: String,
    pub float: f64,
    pub value: f64,
}

impl FlatRow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, float: f64, value: f64) -> Self {
        FlatRow {
            id: id.into(),
            name: name.into(),
            float,
            value,
        }
    }
}
