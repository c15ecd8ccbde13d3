//! Conditional structure: `oneOf` members and `if`/`then`/`else` arms.
//!
//! A branching object keeps its shared fragment as `base`. Whenever its
//! dependencies change the first fragment whose condition holds is
//! selected; on a switch the node's children are reconciled against the
//! merged schema.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::computed::{CompiledExpr, Computed};
use crate::eval::truthy;
use crate::expression::ExpressionCache;
use crate::node::{Flags, NodeId, NodeKind, Payload};
use crate::schema::{self, RawCondition};
use crate::tree::{FormTree, Pass};
use crate::types::FormEvent;

#[derive(Debug, Clone)]
pub(crate) enum Condition {
    Expression(CompiledExpr),
    /// The node value must (or must not) validate against `schema`.
    Schema { schema: Value, negate: bool },
    Always,
}

#[derive(Debug, Clone)]
pub(crate) struct Fragment {
    pub(crate) schema: Value,
    pub(crate) condition: Condition,
}

#[derive(Debug, Clone)]
pub(crate) struct Branch {
    /// Schema with the branch keywords removed.
    pub(crate) base: Value,
    pub(crate) fragments: Vec<Fragment>,
    pub(crate) selected: Option<usize>,
    /// Object written to the node during the current pass. Fields created by
    /// a switch take their value from here before falling back to defaults.
    pub(crate) pending: Option<Map<String, Value>>,
}

impl Branch {
    /// Compiles fragment conditions into the owner's slots.
    ///
    /// Schema conditions subscribe to every child (`./*`) since the test
    /// runs against the whole node value.
    pub(crate) fn compile(
        schema: &Value,
        initial: Option<&Value>,
        computed: &mut Computed,
        cache: &mut ExpressionCache,
    ) -> Self {
        let fragments = schema::branch_fragments(schema)
            .into_iter()
            .map(|raw| {
                let condition = match raw.condition {
                    RawCondition::Expression(expression) => {
                        Condition::Expression(computed.compile(cache, &expression))
                    }
                    RawCondition::Schema { schema, negate } => {
                        computed.slot("./*");
                        Condition::Schema { schema, negate }
                    }
                    RawCondition::Always => Condition::Always,
                };
                Fragment {
                    schema: raw.schema,
                    condition,
                }
            })
            .collect();
        Branch {
            base: schema::strip_branches(schema),
            fragments,
            selected: None,
            pending: initial.and_then(Value::as_object).cloned(),
        }
    }
}

impl FormTree {
    /// Selects the applicable fragment and switches to it if it changed.
    pub(crate) fn resolve_branch(&mut self, pass: &mut Pass, id: NodeId) {
        let Some(branch) = self.nodes.get(&id).and_then(|n| n.branch.as_ref()) else {
            return;
        };
        let current = branch.selected;
        let fragments = branch.fragments.clone();
        let selected = fragments
            .iter()
            .position(|f| self.condition_holds(id, &f.condition));
        if selected == current {
            return;
        }
        debug!(node = %self.path(id), from = ?current, to = ?selected, "branch switch");
        self.switch_branch(pass, id, selected);
    }

    fn condition_holds(&self, id: NodeId, condition: &Condition) -> bool {
        match condition {
            Condition::Expression(expr) => match self.evaluate(id, expr) {
                Ok(value) => truthy(&value),
                Err(err) => {
                    debug!(node = %self.path(id), error = %err, "branch condition failed");
                    false
                }
            },
            Condition::Schema { schema, negate } => {
                let value = self.value_of(id).unwrap_or(Value::Null);
                match self.validator.validate(schema, &value) {
                    Ok(errors) => errors.is_empty() != *negate,
                    Err(err) => {
                        debug!(node = %self.path(id), error = %err, "branch schema failed to compile");
                        false
                    }
                }
            }
            Condition::Always => true,
        }
    }

    /// Rebuilds the node's children for the fragment `selected`.
    ///
    /// A field in both the old and new shape keeps its node when its schema
    /// is unchanged; a terminal of the same kind keeps its node and value;
    /// a container of the same kind is rebuilt around its value. Any other
    /// field starts from the pending write or its default.
    fn switch_branch(&mut self, pass: &mut Pass, id: NodeId, selected: Option<usize>) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let Some(branch) = node.branch.as_mut() else {
            return;
        };
        branch.selected = selected;
        let fragment = selected
            .and_then(|i| branch.fragments.get(i))
            .map(|f| f.schema.clone())
            .unwrap_or_else(|| json!({}));
        let merged = schema::merge_schemas(&branch.base, &fragment);
        let pending = branch.pending.clone();
        node.schema = merged.clone();

        let previous: Vec<(String, NodeId)> = match &node.payload {
            Payload::Object { children } => children.clone(),
            _ => return,
        };
        let (virtuals, fields): (Vec<_>, Vec<_>) = previous.into_iter().partition(|(_, child)| {
            self.nodes
                .get(child)
                .is_some_and(|c| c.kind == NodeKind::Virtual)
        });

        let mut created = Vec::new();
        let mut children = Vec::new();
        let desired = schema::properties(&merged);
        for (key, child_schema) in &desired {
            let explicit = pending.as_ref().and_then(|p| p.get(key)).cloned();
            let existing = fields.iter().find(|(k, _)| k == key).map(|(_, c)| *c);
            let child = match existing {
                Some(child) => {
                    self.reconcile_child(pass, id, key, child, child_schema, explicit, &mut created)
                }
                None => self.create_node(Some(id), key.clone(), child_schema, explicit, &mut created),
            };
            children.push((key.clone(), child));
        }
        for (key, child) in &fields {
            if !desired.iter().any(|(k, _)| k == key) {
                self.destroy_subtree(pass, *child);
            }
        }
        children.extend(virtuals);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.payload = Payload::Object { children };
        }

        let path = self.path(id);
        self.emit(FormEvent::ChildrenChanged {
            node: id,
            path: path.clone(),
        });
        self.attach(pass, &created, Some(&path));
        pass.value_changed = true;
        self.propagate(pass, vec![id]);
    }

    fn reconcile_child(
        &mut self,
        pass: &mut Pass,
        parent: NodeId,
        key: &str,
        child: NodeId,
        schema: &Value,
        explicit: Option<Value>,
        created: &mut Vec<NodeId>,
    ) -> NodeId {
        let Some(node) = self.nodes.get(&child) else {
            return self.create_node(Some(parent), key.to_string(), schema, explicit, created);
        };
        let declared = match &node.branch {
            Some(branch) => &branch.base,
            None => &node.schema,
        };
        if *declared == schema::strip_branches(schema) {
            return child;
        }

        let kind = schema::infer_kind(schema);
        if kind != node.kind {
            self.destroy_subtree(pass, child);
            return self.create_node(Some(parent), key.to_string(), schema, explicit, created);
        }
        if kind.is_terminal() {
            self.replace_terminal_schema(child, schema);
            created.push(child);
            return child;
        }
        let value = explicit.or_else(|| self.value_of(child));
        self.destroy_subtree(pass, child);
        self.create_node(Some(parent), key.to_string(), schema, value, created)
    }

    /// Swaps a terminal's schema in place, keeping its value and state.
    fn replace_terminal_schema(&mut self, id: NodeId, schema: &Value) {
        self.unregister(id);
        let declarations = schema::declarations(schema);
        let mut computed = Computed::default();
        computed.declare(&mut self.expressions, &declarations);
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        node.schema = schema::strip_branches(schema);
        node.flags = Flags::default();
        crate::computed::apply_static(&mut node.flags, &declarations);
        node.computed = (!computed.is_empty()).then(|| Box::new(computed));
        node.watch_values.clear();
    }
}
