//! Form nodes: one per schema location.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::branch::Branch;
use crate::computed::Computed;
use crate::error::JsonSchemaError;
use crate::state::NodeState;

/// Stable handle to a node inside a [`crate::FormTree`].
///
/// Ids are never reused, so a handle to a destroyed node simply stops
/// resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Object,
    Array,
    String,
    Number,
    Boolean,
    Null,
    /// Projection over sibling fields; owns nothing.
    Virtual,
}

impl NodeKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeKind::String | NodeKind::Number | NodeKind::Boolean | NodeKind::Null
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Object => "object",
            NodeKind::Array => "array",
            NodeKind::String => "string",
            NodeKind::Number => "number",
            NodeKind::Boolean => "boolean",
            NodeKind::Null => "null",
            NodeKind::Virtual => "virtual",
        }
    }
}

/// Kind-specific storage.
#[derive(Debug)]
pub(crate) enum Payload {
    /// Owned children in display order. Virtual children live here too but
    /// never contribute to the aggregate value.
    Object { children: Vec<(String, NodeId)> },
    /// Owned items; item keys are their indices.
    Array { items: Vec<NodeId> },
    /// `None` is "undefined": absent from any aggregate.
    Terminal { value: Option<Value> },
    /// Field references are resolved through the node's dependency slots,
    /// one slot per field in declaration order.
    Virtual { fields: Vec<String> },
}

/// Presentation and editability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Flags {
    pub visible: bool,
    pub active: bool,
    pub read_only: bool,
    pub disabled: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            visible: true,
            active: true,
            read_only: false,
            disabled: false,
        }
    }
}

/// A node of the form tree.
#[derive(Debug)]
pub struct Node {
    pub(crate) key: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind,
    /// Effective schema fragment (branch keywords removed, selected branch merged).
    pub(crate) schema: Value,
    pub(crate) payload: Payload,
    pub(crate) flags: Flags,
    pub(crate) state: NodeState,
    pub(crate) computed: Option<Box<Computed>>,
    /// Nodes whose computed declarations read this node.
    pub(crate) dependents: BTreeSet<NodeId>,
    pub(crate) branch: Option<Box<Branch>>,
    /// Value at the last commit; `DIRTY` compares against it.
    pub(crate) baseline: Option<Value>,
    pub(crate) errors: Vec<JsonSchemaError>,
    pub(crate) watch_values: Vec<Value>,
}

impl Node {
    pub(crate) fn new(key: String, parent: Option<NodeId>, kind: NodeKind, schema: Value) -> Self {
        let payload = match kind {
            NodeKind::Object => Payload::Object {
                children: Vec::new(),
            },
            NodeKind::Array => Payload::Array { items: Vec::new() },
            NodeKind::Virtual => Payload::Virtual { fields: Vec::new() },
            _ => Payload::Terminal { value: None },
        };
        Self {
            key,
            parent,
            kind,
            schema,
            payload,
            flags: Flags::default(),
            state: NodeState::empty(),
            computed: None,
            dependents: BTreeSet::new(),
            branch: None,
            baseline: None,
            errors: Vec::new(),
            watch_values: Vec::new(),
        }
    }

    /// Property name or array index under the parent (`""` for the root).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// The node's own flags, without ancestor inheritance.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn errors(&self) -> &[JsonSchemaError] {
        &self.errors
    }

    /// Current values of the paths named by `watch`.
    pub fn watch_values(&self) -> &[Value] {
        &self.watch_values
    }

    /// Nodes whose computed declarations depend on this node.
    pub fn dependents(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.dependents.iter().copied()
    }

    /// Index of the selected `oneOf`/`if` fragment, if the node branches.
    pub fn selected_branch(&self) -> Option<usize> {
        self.branch.as_ref().and_then(|b| b.selected)
    }

    /// Owned children in order (for virtual nodes: none).
    pub fn children(&self) -> Vec<NodeId> {
        match &self.payload {
            Payload::Object { children } => children.iter().map(|(_, id)| *id).collect(),
            Payload::Array { items } => items.clone(),
            Payload::Terminal { .. } | Payload::Virtual { .. } => Vec::new(),
        }
    }

    /// Field names a virtual node projects.
    pub fn virtual_fields(&self) -> &[String] {
        match &self.payload {
            Payload::Virtual { fields } => fields,
            _ => &[],
        }
    }

    pub(crate) fn child(&self, key: &str) -> Option<NodeId> {
        match &self.payload {
            Payload::Object { children } => {
                children.iter().find(|(k, _)| k == key).map(|(_, id)| *id)
            }
            Payload::Array { items } => key.parse::<usize>().ok().and_then(|i| items.get(i).copied()),
            Payload::Terminal { .. } | Payload::Virtual { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_kinds() {
        assert!(NodeKind::String.is_terminal());
        assert!(NodeKind::Null.is_terminal());
        assert!(!NodeKind::Object.is_terminal());
        assert!(!NodeKind::Virtual.is_terminal());
    }

    #[test]
    fn new_node_defaults() {
        let node = Node::new("name".into(), None, NodeKind::String, json!({"type": "string"}));
        assert_eq!(node.flags(), Flags::default());
        assert!(node.state().is_empty());
        assert!(matches!(node.payload, Payload::Terminal { value: None }));
        assert!(node.children().is_empty());
    }

    #[test]
    fn array_child_lookup() {
        let mut node = Node::new("list".into(), None, NodeKind::Array, json!({}));
        node.payload = Payload::Array {
            items: vec![NodeId(4), NodeId(9)],
        };
        assert_eq!(node.child("1"), Some(NodeId(9)));
        assert_eq!(node.child("2"), None);
        assert_eq!(node.child("x"), None);
    }
}
