//! Serializable view of a form tree.

use serde::Serialize;
use serde_json::Value;

use crate::error::JsonSchemaError;
use crate::node::{Flags, NodeId, NodeKind};
use crate::state::NodeState;
use crate::tree::FormTree;

/// One node with its effective flags and state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub path: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub flags: Flags,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub state: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<JsonSchemaError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

/// The whole form at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSnapshot {
    pub value: Value,
    pub global_state: Vec<String>,
    pub root: NodeSnapshot,
}

fn state_names(state: NodeState) -> Vec<String> {
    let mut names: Vec<String> = state.iter_names().map(|(name, _)| name.to_string()).collect();
    let unnamed = state.bits() & !NodeState::all().bits();
    if unnamed != 0 {
        names.push(format!("{unnamed:#x}"));
    }
    names
}

impl FormTree {
    pub fn snapshot(&self) -> FormSnapshot {
        let root = self.snapshot_node(self.root()).unwrap_or_else(|| NodeSnapshot {
            path: String::new(),
            kind: NodeKind::Null,
            value: None,
            flags: Flags::default(),
            state: Vec::new(),
            branch: None,
            watch: Vec::new(),
            errors: Vec::new(),
            children: Vec::new(),
        });
        FormSnapshot {
            value: self.form_value(),
            global_state: state_names(self.global_state()),
            root,
        }
    }

    /// Snapshot of one subtree.
    pub fn snapshot_node(&self, id: NodeId) -> Option<NodeSnapshot> {
        let node = self.node(id)?;
        let children = node
            .children()
            .into_iter()
            .filter_map(|child| self.snapshot_node(child))
            .collect();
        Some(NodeSnapshot {
            path: self.path(id).to_pointer(),
            kind: node.kind(),
            value: self.value(id),
            flags: self.flags(id).unwrap_or_default(),
            state: state_names(node.state()),
            branch: node.selected_branch(),
            watch: node.watch_values().to_vec(),
            errors: node.errors().to_vec(),
            children,
        })
    }
}
