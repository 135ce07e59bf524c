//! ADF document tree model.
//!
//! A [`Document`] wraps the raw JSON tree so that every property the editor
//! does not understand survives a round trip untouched. Nodes are addressed
//! by [`NodePath`], a sequence of indices into nested `content` arrays, and
//! classified into a [`NodeKind`] that the extractor, renderer and patcher
//! dispatch on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

pub mod extract;
pub mod macros;
pub mod patch;
pub mod validate;

/// Node types treated as macros when no custom denylist is configured.
pub const DEFAULT_MACRO_TYPES: &[&str] = &[
    "inlineExtension",
    "extension",
    "bodiedExtension",
    "panel",
    "expand",
];

/// Attributes that mark a node as a macro regardless of its type.
const MACRO_ATTR_KEYS: &[&str] = &["extensionKey", "panelType"];

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("document root must be a JSON object")]
    InvalidRoot,
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Value,
}

impl Document {
    pub fn from_value(root: Value) -> Result<Self, TreeError> {
        if !root.is_object() {
            return Err(TreeError::InvalidRoot);
        }
        Ok(Self { root })
    }

    pub fn from_json(text: &str) -> Result<Self, TreeError> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    pub fn to_json_pretty(&self) -> Result<String, TreeError> {
        Ok(serde_json::to_string_pretty(&self.root)?)
    }

    /// Resolves a path to the node it addresses.
    pub fn node(&self, path: &NodePath) -> Option<&Value> {
        let mut current = &self.root;
        for &index in path.indices() {
            current = children(current)?.get(index)?;
        }
        Some(current)
    }

    pub(crate) fn node_mut(&mut self, path: &NodePath) -> Option<&mut Value> {
        let mut current = &mut self.root;
        for &index in path.indices() {
            current = current
                .get_mut("content")
                .and_then(Value::as_array_mut)?
                .get_mut(index)?;
        }
        Some(current)
    }

    /// Returns the path of the outermost macro on the way to `path`, if any.
    pub fn enclosing_macro(&self, path: &NodePath, denylist: &MacroDenylist) -> Option<NodePath> {
        let mut current = &self.root;
        let mut walked = NodePath::root();
        if denylist.is_macro(current) {
            return Some(walked);
        }
        for &index in path.indices() {
            current = children(current)?.get(index)?;
            walked = walked.child(index);
            if denylist.is_macro(current) {
                return Some(walked);
            }
        }
        None
    }
}

/// Position of a node: child indices from the root, one per nesting level.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_indices(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.0.split_last()?;
        Some(Self(rest.to_vec()))
    }

    pub fn starts_with(&self, prefix: &NodePath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for index in &self.0 {
            write!(f, "/{index}")?;
        }
        Ok(())
    }
}

/// Whether macro bodies take part in extraction, rendering and patching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroMode {
    #[default]
    Safe,
    IncludeBodies,
}

impl MacroMode {
    pub fn includes_bodies(self) -> bool {
        matches!(self, MacroMode::IncludeBodies)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind<'a> {
    Text(&'a str),
    Macro {
        node_type: &'a str,
        identifier: &'a str,
    },
    Container {
        node_type: &'a str,
    },
    Leaf {
        node_type: &'a str,
    },
    /// Not a JSON object, or an object without a `type`.
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDenylist {
    types: BTreeSet<String>,
}

impl Default for MacroDenylist {
    fn default() -> Self {
        Self::new(DEFAULT_MACRO_TYPES.iter().copied())
    }
}

impl MacroDenylist {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(String::as_str)
    }

    pub fn contains_type(&self, node_type: &str) -> bool {
        self.types.contains(node_type)
    }

    pub fn is_macro(&self, node: &Value) -> bool {
        matches!(self.classify(node), NodeKind::Macro { .. })
    }

    pub fn classify<'a>(&self, node: &'a Value) -> NodeKind<'a> {
        let Some(node_type) = node_type(node) else {
            return NodeKind::Opaque;
        };

        let attr_identifier = MACRO_ATTR_KEYS
            .iter()
            .find_map(|key| attr(node, key).and_then(Value::as_str));
        let attr_marked = MACRO_ATTR_KEYS.iter().any(|key| attr(node, key).is_some());
        if self.types.contains(node_type) || attr_marked {
            return NodeKind::Macro {
                node_type,
                identifier: attr_identifier.unwrap_or(node_type),
            };
        }

        if node_type == "text" {
            return NodeKind::Text(node.get("text").and_then(Value::as_str).unwrap_or(""));
        }

        if children(node).is_some() {
            NodeKind::Container { node_type }
        } else {
            NodeKind::Leaf { node_type }
        }
    }
}

pub fn node_type(node: &Value) -> Option<&str> {
    node.get("type").and_then(Value::as_str)
}

pub fn attr<'a>(node: &'a Value, key: &str) -> Option<&'a Value> {
    node.get("attrs").and_then(|attrs| attrs.get(key))
}

pub fn children(node: &Value) -> Option<&Vec<Value>> {
    node.get("content").and_then(Value::as_array)
}
