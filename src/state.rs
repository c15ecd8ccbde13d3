//! Per-node interaction state and its subtree operations.

use bitflags::bitflags;
use tracing::trace;

use crate::node::{NodeId, NodeKind};
use crate::tree::{FormTree, Pass, WriteOrigin};
use crate::types::FormEvent;

bitflags! {
    /// Interaction flags of a node.
    ///
    /// Bits above `SHOW_ERROR` are free for host-defined flags and are kept
    /// as-is by every operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeState: u32 {
        /// Value differs from its committed baseline at least once.
        const DIRTY = 1;
        /// Focus left the field at least once.
        const TOUCHED = 1 << 1;
        /// Errors should be displayed.
        const SHOW_ERROR = 1 << 2;
    }
}

impl FormTree {
    /// Merges `flags` into the node's state.
    pub fn set_state(&mut self, id: NodeId, flags: NodeState) {
        self.run_pass(|tree, pass| tree.merge_state(pass, id, flags));
    }

    /// Empties the node's state.
    pub fn clear_state(&mut self, id: NodeId) {
        self.run_pass(|tree, pass| tree.replace_state(pass, id, NodeState::empty()));
    }

    /// Merges `flags` into the state of the node and every descendant.
    pub fn set_subtree_state(&mut self, id: NodeId, flags: NodeState) {
        self.run_pass(|tree, pass| {
            for node in tree.subtree(id) {
                tree.merge_state(pass, node, flags);
            }
        });
    }

    /// Empties the state of the node and every descendant. Values are untouched.
    pub fn clear_subtree_state(&mut self, id: NodeId) {
        self.run_pass(|tree, pass| {
            for node in tree.subtree(id) {
                tree.replace_state(pass, node, NodeState::empty());
            }
        });
    }

    /// Restores the node and every descendant to the schema defaults and
    /// empties their state. Ancestors keep their other fields.
    ///
    /// A virtual node resets the fields it projects.
    pub fn reset_subtree(&mut self, id: NodeId) {
        self.run_pass(|tree, pass| {
            let Some(kind) = tree.node(id).map(|n| n.kind()) else {
                return;
            };
            let roots = match kind {
                NodeKind::Virtual => tree.virtual_targets(id),
                _ => vec![id],
            };
            for &root in &roots {
                let default = tree.default_value(root);
                tree.write(pass, root, default, WriteOrigin::Reset);
            }

            let mut cleared = vec![id];
            for &root in &roots {
                cleared.extend(tree.subtree(root).into_iter().filter(|n| *n != id));
            }
            for node in cleared {
                tree.replace_state(pass, node, NodeState::empty());
            }
            tree.commit_subtree(id);
            for root in roots.into_iter().filter(|r| *r != id) {
                tree.commit_subtree(root);
            }
        });
    }

    /// Resets the whole form.
    pub fn reset(&mut self) {
        self.reset_subtree(self.root());
    }

    /// Records a focus-loss on the node.
    pub fn blur(&mut self, id: NodeId) {
        self.set_state(id, NodeState::TOUCHED);
    }

    /// Takes the current values of the subtree as the new `DIRTY` baseline.
    pub fn commit(&mut self, id: NodeId) {
        self.commit_subtree(id);
    }

    /// Whether errors of the node should be displayed, combining the
    /// `SHOW_ERROR` bit with the configured policy.
    pub fn show_error(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|node| {
            node.state.contains(NodeState::SHOW_ERROR) || self.options.show_error.forces(node.state)
        })
    }

    /// Bitwise OR of every node's state, as of the last completed pass.
    pub fn global_state(&self) -> NodeState {
        self.global_state
    }

    pub(crate) fn merge_state(&mut self, pass: &mut Pass, id: NodeId, flags: NodeState) {
        let Some(current) = self.node(id).map(|n| n.state) else {
            return;
        };
        self.replace_state(pass, id, current | flags);
    }

    pub(crate) fn replace_state(&mut self, pass: &mut Pass, id: NodeId, state: NodeState) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if node.state == state {
            return;
        }
        trace!(node = ?id, from = ?node.state, to = ?state, "state changed");
        node.state = state;
        pass.state_changed = true;
        let path = self.path(id);
        self.emit(FormEvent::StateChanged {
            node: id,
            path,
            state,
        });
    }

    /// Folds every node's bitmask; emits an event when the result moved.
    pub(crate) fn refresh_global_state(&mut self) {
        let folded = self
            .nodes
            .values()
            .fold(NodeState::empty(), |acc, node| acc | node.state);
        if folded != self.global_state {
            self.global_state = folded;
            self.emit(FormEvent::GlobalStateChanged { state: folded });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_bits_are_retained() {
        let custom = NodeState::from_bits_retain(1 << 8);
        let merged = NodeState::DIRTY | custom;
        assert!(merged.contains(NodeState::DIRTY));
        assert_eq!(merged.bits(), 1 | (1 << 8));
    }

    #[test]
    fn default_is_empty() {
        assert!(NodeState::default().is_empty());
    }
}
