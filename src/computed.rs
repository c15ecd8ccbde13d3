//! Computed properties: compiled declarations, dependency bookkeeping and
//! recomputation.
//!
//! Each node with declarations owns a list of dependency *slots*. A slot is
//! a reference string resolved against the node's address into a pattern
//! and the nodes it currently matches. Targets keep the reverse edge in
//! their `dependents` set, so a value change only recomputes the nodes that
//! actually read it.

use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::eval::{truthy, EvalError};
use crate::expression::{ExpressionCache, Extracted};
use crate::node::{Flags, NodeId, NodeKind};
use crate::path::{self, Path};
use crate::schema::{Declarations, Declared};
use crate::state::NodeState;
use crate::tree::{FormTree, Pass, WriteOrigin};
use crate::types::FormEvent;

/// Computed properties, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Property {
    Visible,
    Active,
    ReadOnly,
    Disabled,
    Derived,
    Pristine,
}

impl Property {
    fn is_flag(self) -> bool {
        matches!(
            self,
            Property::Visible | Property::Active | Property::ReadOnly | Property::Disabled
        )
    }

    /// Flag value used when the expression fails.
    fn fallback(self) -> bool {
        matches!(self, Property::Visible | Property::Active)
    }

    fn name(self) -> &'static str {
        match self {
            Property::Visible => "visible",
            Property::Active => "active",
            Property::ReadOnly => "readOnly",
            Property::Disabled => "disabled",
            Property::Derived => "derived",
            Property::Pristine => "pristine",
        }
    }
}

/// An expression with its path tokens mapped to the owner's slots.
#[derive(Debug, Clone)]
pub(crate) struct CompiledExpr {
    pub(crate) extracted: Rc<Extracted>,
    /// Slot index for each `dependencies[i]`.
    pub(crate) slots: Vec<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct Dependency {
    pub(crate) reference: String,
    pub(crate) pattern: Path,
    pub(crate) targets: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Computed {
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) properties: Vec<(Property, CompiledExpr)>,
    /// Slots whose values are mirrored into `watch_values`.
    pub(crate) watch: Vec<usize>,
}

impl Computed {
    /// Returns the slot for `reference`, adding it on first use.
    pub(crate) fn slot(&mut self, reference: &str) -> usize {
        if let Some(index) = self.dependencies.iter().position(|d| d.reference == reference) {
            return index;
        }
        self.dependencies.push(Dependency {
            reference: reference.to_string(),
            pattern: Path::root(),
            targets: Vec::new(),
        });
        self.dependencies.len() - 1
    }

    pub(crate) fn compile(&mut self, cache: &mut ExpressionCache, expression: &str) -> CompiledExpr {
        let extracted = cache.extract(expression);
        let slots = extracted.paths.iter().map(|p| self.slot(p)).collect();
        CompiledExpr { extracted, slots }
    }

    /// Compiles the expression-valued declarations and `watch` paths.
    pub(crate) fn declare(&mut self, cache: &mut ExpressionCache, declarations: &Declarations) {
        let flags = [
            (Property::Visible, &declarations.visible),
            (Property::Active, &declarations.active),
            (Property::ReadOnly, &declarations.read_only),
            (Property::Disabled, &declarations.disabled),
        ];
        for (property, declared) in flags {
            if let Some(Declared::Expression(expression)) = declared {
                let compiled = self.compile(cache, expression);
                self.properties.push((property, compiled));
            }
        }
        if let Some(expression) = &declarations.derived {
            let compiled = self.compile(cache, expression);
            self.properties.push((Property::Derived, compiled));
        }
        if let Some(expression) = &declarations.pristine {
            let compiled = self.compile(cache, expression);
            self.properties.push((Property::Pristine, compiled));
        }
        for reference in &declarations.watch {
            let slot = self.slot(reference);
            self.watch.push(slot);
        }
        self.properties.sort_by_key(|(property, _)| *property);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.properties.is_empty()
    }

    fn targets(&self) -> Vec<Vec<NodeId>> {
        self.dependencies.iter().map(|d| d.targets.clone()).collect()
    }
}

/// Applies statically declared flags.
pub(crate) fn apply_static(flags: &mut Flags, declarations: &Declarations) {
    if let Some(Declared::Static(v)) = declarations.visible {
        flags.visible = v;
    }
    if let Some(Declared::Static(v)) = declarations.active {
        flags.active = v;
    }
    if let Some(Declared::Static(v)) = declarations.read_only {
        flags.read_only = v;
    }
    if let Some(Declared::Static(v)) = declarations.disabled {
        flags.disabled = v;
    }
}

impl FormTree {
    /// Resolves the node's slots and subscribes it to their targets.
    pub(crate) fn register(&mut self, id: NodeId) {
        let references: Vec<String> = match self.nodes.get(&id).and_then(|n| n.computed.as_ref()) {
            Some(computed) => computed
                .dependencies
                .iter()
                .map(|d| d.reference.clone())
                .collect(),
            None => return,
        };
        let base = self.path(id);
        let mut resolved = Vec::with_capacity(references.len());
        for reference in &references {
            let pattern = path::resolve(&base, reference);
            let targets = self.find_all(&pattern);
            if targets.is_empty() {
                debug!(node = %base, %reference, "dependency does not resolve");
            }
            for target in &targets {
                if let Some(node) = self.nodes.get_mut(target) {
                    node.dependents.insert(id);
                }
            }
            resolved.push((pattern, targets));
        }
        if let Some(computed) = self.nodes.get_mut(&id).and_then(|n| n.computed.as_mut()) {
            for (dependency, (pattern, targets)) in computed.dependencies.iter_mut().zip(resolved) {
                dependency.pattern = pattern;
                dependency.targets = targets;
            }
        }
    }

    /// Drops the node's subscriptions.
    pub(crate) fn unregister(&mut self, id: NodeId) {
        let targets: Vec<NodeId> = match self.nodes.get_mut(&id).and_then(|n| n.computed.as_mut()) {
            Some(computed) => computed
                .dependencies
                .iter_mut()
                .flat_map(|d| std::mem::take(&mut d.targets))
                .collect(),
            None => return,
        };
        for target in targets {
            if let Some(node) = self.nodes.get_mut(&target) {
                node.dependents.remove(&id);
            }
        }
    }

    /// Re-resolves the dependencies that a structural change under `prefix`
    /// may have moved. Returns the nodes whose targets changed, oldest first.
    pub(crate) fn refresh_affected(&mut self, prefix: &Path, skip: &[NodeId]) -> Vec<NodeId> {
        let mut candidates: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(id, node)| node.computed.is_some() && !skip.contains(*id))
            .map(|(id, _)| *id)
            .collect();
        candidates.sort();

        let mut refreshed = Vec::new();
        for id in candidates {
            let own = self.path(id);
            let Some(computed) = self.nodes.get(&id).and_then(|n| n.computed.as_ref()) else {
                continue;
            };
            let affected = own.starts_with(prefix)
                || computed.dependencies.iter().any(|d| {
                    d.targets.is_empty() || d.pattern.has_wildcard() || d.pattern.starts_with(prefix)
                });
            if !affected {
                continue;
            }
            let before = computed.targets();
            self.unregister(id);
            self.register(id);
            let after = self
                .nodes
                .get(&id)
                .and_then(|n| n.computed.as_ref())
                .map(|c| c.targets())
                .unwrap_or_default();
            if before != after {
                trace!(node = %own, "dependencies moved");
                refreshed.push(id);
            }
        }
        refreshed
    }

    /// Value of one slot: the first target's value, or an array of all
    /// targets' values for wildcard patterns. Unresolved slots read `null`.
    pub(crate) fn dependency_value(&self, id: NodeId, slot: usize) -> Value {
        let Some(dependency) = self
            .nodes
            .get(&id)
            .and_then(|n| n.computed.as_ref())
            .and_then(|c| c.dependencies.get(slot))
        else {
            return Value::Null;
        };
        if dependency.pattern.has_wildcard() {
            Value::Array(
                dependency
                    .targets
                    .iter()
                    .map(|t| self.value_of(*t).unwrap_or(Value::Null))
                    .collect(),
            )
        } else {
            dependency
                .targets
                .first()
                .and_then(|t| self.value_of(*t))
                .unwrap_or(Value::Null)
        }
    }

    pub(crate) fn evaluate(&self, id: NodeId, expr: &CompiledExpr) -> Result<Value, EvalError> {
        let dependencies: Vec<Value> = expr
            .slots
            .iter()
            .map(|slot| self.dependency_value(id, *slot))
            .collect();
        self.evaluator
            .evaluate(&expr.extracted.rewritten, &dependencies)
    }

    fn slot_reads(&self, id: NodeId, slot: usize, trigger: NodeId) -> bool {
        self.nodes
            .get(&id)
            .and_then(|n| n.computed.as_ref())
            .and_then(|c| c.dependencies.get(slot))
            .is_some_and(|d| d.targets.contains(&trigger))
    }

    /// Re-evaluates the node's computed properties.
    ///
    /// With a `trigger`, only properties reading that node are evaluated;
    /// without one (creation, moved dependencies) everything is. A node
    /// already being recomputed further up the stack is skipped.
    pub(crate) fn recompute(&mut self, pass: &mut Pass, id: NodeId, trigger: Option<NodeId>) {
        if pass.recomputing.contains(&id) {
            trace!(node = %id, "recompute cycle skipped");
            return;
        }
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let (properties, watch) = match &node.computed {
            Some(c) => (c.properties.clone(), c.watch.clone()),
            None => (Vec::new(), Vec::new()),
        };
        let field_count = node.virtual_fields().len();
        let is_virtual = node.kind == NodeKind::Virtual;
        let reads = |tree: &FormTree, slots: &[usize]| match trigger {
            Some(t) => slots.iter().any(|s| tree.slot_reads(id, *s, t)),
            None => true,
        };

        pass.recomputing.push(id);

        for (property, expr) in properties.iter().filter(|(p, _)| p.is_flag()) {
            if !self.nodes.contains_key(&id) || !reads(self, &expr.slots) {
                continue;
            }
            let flag = match self.evaluate(id, expr) {
                Ok(value) => truthy(&value),
                Err(err) => {
                    debug!(node = %self.path(id), property = property.name(), error = %err, "expression failed");
                    property.fallback()
                }
            };
            self.set_flag(pass, id, *property, flag);
        }

        if !watch.is_empty() && self.nodes.contains_key(&id) && reads(self, &watch) {
            let values: Vec<Value> = watch
                .iter()
                .map(|slot| self.dependency_value(id, *slot))
                .collect();
            if let Some(node) = self.nodes.get_mut(&id) {
                if node.watch_values != values {
                    node.watch_values = values;
                    let path = self.path(id);
                    self.emit(FormEvent::WatchChanged { node: id, path });
                }
            }
        }

        for (property, expr) in properties.iter().filter(|(p, _)| !p.is_flag()) {
            if !self.nodes.contains_key(&id) || !reads(self, &expr.slots) {
                continue;
            }
            let result = self.evaluate(id, expr);
            match (property, result) {
                (Property::Derived, Ok(value)) => {
                    if self.value_of(id).as_ref() != Some(&value) {
                        self.write(pass, id, Some(value), WriteOrigin::Derived);
                    }
                }
                (Property::Pristine, Ok(value)) => {
                    if truthy(&value) {
                        self.replace_state(pass, id, NodeState::empty());
                    }
                }
                (_, Err(err)) => {
                    debug!(node = %self.path(id), property = property.name(), error = %err, "expression failed");
                }
                _ => {}
            }
        }

        if self.nodes.get(&id).is_some_and(|n| n.branch.is_some()) {
            self.resolve_branch(pass, id);
        }

        if is_virtual {
            if let Some(t) = trigger {
                let field_changed = (0..field_count).any(|slot| self.slot_reads(id, slot, t));
                if field_changed {
                    self.propagate(pass, vec![id]);
                }
            }
        }

        pass.recomputing.retain(|n| *n != id);
    }

    fn set_flag(&mut self, pass: &mut Pass, id: NodeId, property: Property, value: bool) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let slot = match property {
            Property::Visible => &mut node.flags.visible,
            Property::Active => &mut node.flags.active,
            Property::ReadOnly => &mut node.flags.read_only,
            Property::Disabled => &mut node.flags.disabled,
            Property::Derived | Property::Pristine => return,
        };
        if *slot == value {
            return;
        }
        *slot = value;
        let parent = node.parent;
        let path = self.path(id);
        trace!(node = %path, property = property.name(), value, "flag changed");
        self.emit(FormEvent::FlagsChanged { node: id, path });

        // Activity decides membership in the parent's value.
        if property == Property::Active {
            if let Some(parent) = parent {
                pass.value_changed = true;
                self.propagate(pass, vec![parent]);
            }
        }
    }
}
