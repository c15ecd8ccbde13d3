//! The form tree: node arena, write pipeline and queries.
//!
//! Every public mutation runs inside a *pass*. A pass writes values,
//! propagates them to dependents and injection targets, and once the work
//! settles it clears pending branch values, optionally validates, folds the
//! global state and finally flushes deduplicated events to listeners.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::{json, Map, Value};
use tracing::{debug, trace, warn};

use crate::branch::Branch;
use crate::computed::{apply_static, Computed};
use crate::error::FormError;
use crate::eval::{ExpressionEvaluator, SandboxEvaluator};
use crate::expression::ExpressionCache;
use crate::inject::Injector;
use crate::node::{Flags, Node, NodeId, NodeKind, Payload};
use crate::path::{self, Path, Segment};
use crate::schema;
use crate::state::NodeState;
use crate::types::{FormEvent, FormOptions, ValidationMode};
use crate::validator::{JsonSchemaValidator, SchemaValidator};

type Listener = Box<dyn FnMut(&FormEvent)>;

/// Bookkeeping for one propagation pass.
#[derive(Debug, Default)]
pub(crate) struct Pass {
    /// `(target, source)` pairs already applied by injection.
    pub(crate) injected: HashSet<(NodeId, NodeId)>,
    /// Nodes on the current write/injection stack.
    pub(crate) chain: Vec<NodeId>,
    /// Nodes whose computed properties are being evaluated.
    pub(crate) recomputing: Vec<NodeId>,
    pub(crate) state_changed: bool,
    pub(crate) value_changed: bool,
}

/// Who asked for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOrigin {
    External,
    Injected,
    Derived,
    Reset,
}

impl WriteOrigin {
    fn marks_dirty(self) -> bool {
        matches!(self, WriteOrigin::External | WriteOrigin::Injected)
    }
}

#[derive(Debug, Default)]
struct Changes {
    /// Nodes whose value changed, parents before their children.
    changed: Vec<NodeId>,
    created: Vec<NodeId>,
    /// Arrays whose length changed.
    resized: Vec<NodeId>,
}

/// A form built from a JSON Schema.
///
/// ```
/// use schema_form::FormTree;
/// use serde_json::json;
///
/// let schema = json!({
///     "type": "object",
///     "properties": {
///         "age": { "type": "number" },
///         "license": { "type": "string", "&visible": "../age >= 18" }
///     }
/// });
/// let mut form = FormTree::new(schema).unwrap();
/// let age = form.find("/age").unwrap();
/// let license = form.find("/license").unwrap();
///
/// assert!(!form.is_visible(license));
/// form.set_value(age, json!(21));
/// assert!(form.is_visible(license));
/// ```
pub struct FormTree {
    pub(crate) nodes: HashMap<NodeId, Node>,
    next_id: u32,
    root: NodeId,
    pub(crate) options: FormOptions,
    pub(crate) evaluator: Box<dyn ExpressionEvaluator>,
    pub(crate) validator: Box<dyn SchemaValidator>,
    pub(crate) expressions: ExpressionCache,
    pub(crate) injectors: Vec<Injector>,
    listeners: Vec<Listener>,
    pub(crate) global_state: NodeState,
    pending_events: Vec<FormEvent>,
}

impl fmt::Debug for FormTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormTree")
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .field("options", &self.options)
            .field("injectors", &self.injectors.len())
            .field("global_state", &self.global_state)
            .finish()
    }
}

/// Builder for [`FormTree`].
pub struct FormBuilder {
    schema: Value,
    value: Option<Value>,
    options: FormOptions,
    evaluator: Option<Box<dyn ExpressionEvaluator>>,
    validator: Option<Box<dyn SchemaValidator>>,
    injectors: Vec<Injector>,
}

impl FormBuilder {
    pub fn new(schema: Value) -> Self {
        Self {
            schema,
            value: None,
            options: FormOptions::default(),
            evaluator: None,
            validator: None,
            injectors: Vec::new(),
        }
    }

    /// Initial form value. Missing fields fall back to schema defaults.
    pub fn value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the built-in expression sandbox.
    pub fn evaluator(mut self, evaluator: impl ExpressionEvaluator + 'static) -> Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    /// Replaces the built-in JSON Schema validator.
    pub fn validator(mut self, validator: impl SchemaValidator + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Registers an injection handler for nodes matching `pattern`.
    /// See [`FormTree::inject_to`].
    pub fn inject_to<F>(mut self, pattern: &str, inject: F) -> Self
    where
        F: Fn(&Value) -> Option<Map<String, Value>> + 'static,
    {
        self.injectors.push(Injector::new(pattern, inject));
        self
    }

    /// Builds the node tree, wires dependencies and settles computed state.
    ///
    /// # Errors
    ///
    /// Returns `FormError::InvalidSchema` if the root schema is not an object.
    pub fn build(self) -> Result<FormTree, FormError> {
        let FormBuilder {
            schema,
            value,
            options,
            evaluator,
            validator,
            injectors,
        } = self;

        if !schema.is_object() {
            return Err(FormError::InvalidSchema {
                message: "root schema must be a JSON object".into(),
            });
        }

        let mut tree = FormTree {
            nodes: HashMap::new(),
            next_id: 0,
            root: NodeId(0),
            options,
            evaluator: evaluator.unwrap_or_else(|| Box::new(SandboxEvaluator::new())),
            validator: validator.unwrap_or_else(|| Box::new(JsonSchemaValidator::new())),
            expressions: ExpressionCache::new(),
            injectors,
            listeners: Vec::new(),
            global_state: NodeState::empty(),
            pending_events: Vec::new(),
        };

        tree.run_pass(|tree, pass| {
            let mut created = Vec::new();
            let root = tree.create_node(None, String::new(), &schema, value, &mut created);
            tree.root = root;
            tree.attach(pass, &created, None);
        });
        tree.commit_subtree(tree.root);

        debug!(
            nodes = tree.nodes.len(),
            expressions = tree.expressions.len(),
            "form tree built"
        );
        Ok(tree)
    }
}

impl FormTree {
    /// Builds a form with default options and no initial value.
    pub fn new(schema: Value) -> Result<Self, FormError> {
        FormBuilder::new(schema).build()
    }

    pub fn builder(schema: Value) -> FormBuilder {
        FormBuilder::new(schema)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn options(&self) -> &FormOptions {
        &self.options
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Absolute address of a node. Unknown ids yield the root path.
    pub fn path(&self, id: NodeId) -> Path {
        let mut keys = Vec::new();
        let mut current = self.nodes.get(&id);
        while let Some(node) = current {
            let Some(parent) = node.parent else {
                break;
            };
            keys.push(node.key.clone());
            current = self.nodes.get(&parent);
        }
        keys.reverse();
        Path::from_keys(keys)
    }

    /// Every node matching `pattern`, in tree order.
    pub fn find_all(&self, pattern: &Path) -> Vec<NodeId> {
        let mut current = vec![self.root];
        for segment in pattern.segments() {
            let mut next = Vec::new();
            for id in current {
                let Some(node) = self.nodes.get(&id) else {
                    continue;
                };
                match segment {
                    Segment::Key(key) => next.extend(node.child(key)),
                    Segment::Wildcard => next.extend(node.children()),
                }
            }
            current = next;
        }
        current
    }

    /// Looks up a node by absolute reference (`/a/b` or `#/a/b`).
    pub fn find(&self, reference: &str) -> Option<NodeId> {
        self.find_all(&Path::parse(reference)).into_iter().next()
    }

    /// Looks up a node by a reference relative to `base`.
    pub fn find_from(&self, base: NodeId, reference: &str) -> Option<NodeId> {
        let pattern = path::resolve(&self.path(base), reference);
        self.find_all(&pattern).into_iter().next()
    }

    /// Current value of a node; `None` is undefined.
    pub fn value(&self, id: NodeId) -> Option<Value> {
        self.value_of(id)
    }

    /// Value of the whole form.
    pub fn form_value(&self) -> Value {
        self.value_of(self.root).unwrap_or(Value::Null)
    }

    /// Writes `value` into the node and propagates the change.
    /// Returns whether any value changed.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> bool {
        self.external_write(id, Some(value))
    }

    /// Makes the node (and, for containers, its subtree) undefined.
    pub fn unset_value(&mut self, id: NodeId) -> bool {
        self.external_write(id, None)
    }

    /// [`set_value`](Self::set_value) addressed by an absolute reference.
    ///
    /// # Errors
    ///
    /// Returns `FormError::NodeNotFound` if nothing lives at `reference`.
    pub fn set_value_at(&mut self, reference: &str, value: Value) -> Result<bool, FormError> {
        let id = self.find(reference).ok_or_else(|| FormError::NodeNotFound {
            path: reference.to_string(),
        })?;
        Ok(self.set_value(id, value))
    }

    /// Appends an item (schema default when `value` is `None`).
    ///
    /// # Errors
    ///
    /// Fails when `array` is not an array node or already holds `maxItems`.
    pub fn push(&mut self, array: NodeId, value: Option<Value>) -> Result<NodeId, FormError> {
        let (items, schema) = self.array_parts(array)?;
        if let Some(max) = schema::max_items(&schema) {
            if items.len() >= max {
                debug!(node = %array, max, "push rejected at maxItems");
                return Err(FormError::MaxItems {
                    path: self.path(array).to_pointer(),
                    max,
                });
            }
        }
        let item_schema = item_schema(&schema);
        let index = items.len();
        let item = self.run_pass(|tree, pass| {
            let mut created = Vec::new();
            let item = tree.create_node(
                Some(array),
                index.to_string(),
                &item_schema,
                value,
                &mut created,
            );
            if let Some(Payload::Array { items }) =
                tree.nodes.get_mut(&array).map(|n| &mut n.payload)
            {
                items.push(item);
            }
            tree.structure_changed(pass, array, &created);
            item
        });
        Ok(item)
    }

    /// Replaces the value of item `index`.
    ///
    /// # Errors
    ///
    /// Fails when `array` is not an array node or has no such item.
    pub fn update(&mut self, array: NodeId, index: usize, value: Value) -> Result<bool, FormError> {
        let (items, _) = self.array_parts(array)?;
        let item = items
            .get(index)
            .copied()
            .ok_or_else(|| FormError::IndexOutOfBounds {
                path: self.path(array).to_pointer(),
                index,
            })?;
        Ok(self.set_value(item, value))
    }

    /// Removes item `index`, re-keying the items after it. Returns the
    /// removed item's value.
    ///
    /// # Errors
    ///
    /// Fails when `array` is not an array node or has no such item.
    pub fn remove(&mut self, array: NodeId, index: usize) -> Result<Option<Value>, FormError> {
        let (items, _) = self.array_parts(array)?;
        if index >= items.len() {
            return Err(FormError::IndexOutOfBounds {
                path: self.path(array).to_pointer(),
                index,
            });
        }
        let removed = self.run_pass(|tree, pass| {
            let item = items[index];
            let removed = tree.value_of(item);
            tree.destroy_subtree(pass, item);
            let mut remaining = items;
            remaining.remove(index);
            for (i, id) in remaining.iter().enumerate().skip(index) {
                if let Some(node) = tree.nodes.get_mut(id) {
                    node.key = i.to_string();
                }
            }
            if let Some(node) = tree.nodes.get_mut(&array) {
                node.payload = Payload::Array { items: remaining };
            }
            tree.structure_changed(pass, array, &[]);
            removed
        });
        Ok(removed)
    }

    /// Removes every item.
    ///
    /// # Errors
    ///
    /// Fails when `array` is not an array node.
    pub fn clear(&mut self, array: NodeId) -> Result<bool, FormError> {
        self.array_parts(array)?;
        Ok(self.set_value(array, json!([])))
    }

    /// Effective visibility: the node and, when flags are inherited, every
    /// ancestor must be visible.
    pub fn is_visible(&self, id: NodeId) -> bool {
        self.effective_flag(id, |f| f.visible, true)
    }

    pub fn is_active(&self, id: NodeId) -> bool {
        self.effective_flag(id, |f| f.active, true)
    }

    /// Effective read-only: set on the node or, when inherited, on any ancestor.
    pub fn is_read_only(&self, id: NodeId) -> bool {
        self.effective_flag(id, |f| f.read_only, false)
    }

    pub fn is_disabled(&self, id: NodeId) -> bool {
        self.effective_flag(id, |f| f.disabled, false)
    }

    /// All four effective flags of a node.
    pub fn flags(&self, id: NodeId) -> Option<Flags> {
        self.nodes.get(&id)?;
        Some(Flags {
            visible: self.is_visible(id),
            active: self.is_active(id),
            read_only: self.is_read_only(id),
            disabled: self.is_disabled(id),
        })
    }

    /// Registers a listener for events flushed at the end of every pass.
    pub fn subscribe(&mut self, listener: impl FnMut(&FormEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Node and every descendant in pre-order.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            out.push(current);
            stack.extend(node.children().into_iter().rev());
        }
        out
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(parent) = current {
            out.push(parent);
            current = self.nodes.get(&parent).and_then(|n| n.parent);
        }
        out
    }

    pub(crate) fn run_pass<R>(&mut self, f: impl FnOnce(&mut FormTree, &mut Pass) -> R) -> R {
        let mut pass = Pass::default();
        let result = f(self, &mut pass);
        self.finish_pass(&pass);
        result
    }

    fn finish_pass(&mut self, pass: &Pass) {
        for node in self.nodes.values_mut() {
            if let Some(branch) = node.branch.as_mut() {
                branch.pending = None;
            }
        }
        if pass.value_changed && self.options.validation == ValidationMode::OnChange {
            if let Err(err) = self.run_validation(self.root) {
                warn!(error = %err, "validation could not run");
            }
        }
        if pass.state_changed {
            self.refresh_global_state();
        }
        self.flush_events();
    }

    pub(crate) fn flush_events(&mut self) {
        let events = std::mem::take(&mut self.pending_events);
        if events.is_empty() {
            return;
        }
        trace!(count = events.len(), "flushing events");
        for listener in self.listeners.iter_mut() {
            for event in &events {
                listener(event);
            }
        }
    }

    pub(crate) fn emit(&mut self, event: FormEvent) {
        if !self.pending_events.contains(&event) {
            self.pending_events.push(event);
        }
    }

    fn external_write(&mut self, id: NodeId, value: Option<Value>) -> bool {
        self.run_pass(|tree, pass| {
            pass.chain.push(id);
            tree.write(pass, id, value, WriteOrigin::External)
        })
    }

    /// Creates a node (and its subtree) from a schema fragment.
    /// New ids are appended to `created` in pre-order.
    pub(crate) fn create_node(
        &mut self,
        parent: Option<NodeId>,
        key: String,
        schema: &Value,
        initial: Option<Value>,
        created: &mut Vec<NodeId>,
    ) -> NodeId {
        let id = self.allocate();
        let kind = schema::infer_kind(schema);
        let declarations = schema::declarations(schema);

        let mut computed = Computed::default();
        computed.declare(&mut self.expressions, &declarations);
        let branch = schema::has_branches(schema).then(|| {
            Box::new(Branch::compile(
                schema,
                initial.as_ref(),
                &mut computed,
                &mut self.expressions,
            ))
        });

        let node_schema = schema::strip_branches(schema);
        let mut node = Node::new(key, parent, kind, node_schema.clone());
        apply_static(&mut node.flags, &declarations);
        node.computed = (!computed.is_empty()).then(|| Box::new(computed));
        node.branch = branch;
        self.nodes.insert(id, node);
        created.push(id);

        let initial = initial.or_else(|| node_schema.get("default").cloned());
        let payload = match kind {
            NodeKind::Object => {
                let values = initial.as_ref().and_then(Value::as_object);
                let mut children = Vec::new();
                for (key, child_schema) in schema::properties(&node_schema) {
                    let value = values.and_then(|m| m.get(&key)).cloned();
                    let child = self.create_node(Some(id), key.clone(), &child_schema, value, created);
                    children.push((key, child));
                }
                for (name, declaration) in schema::virtual_declarations(&node_schema) {
                    let child = self.create_virtual(id, name.clone(), &declaration, created);
                    children.push((name, child));
                }
                Payload::Object { children }
            }
            NodeKind::Array => {
                let mut values: Vec<Option<Value>> = match initial {
                    Some(Value::Array(values)) => values.into_iter().map(Some).collect(),
                    _ => Vec::new(),
                };
                let min = schema::min_items(&node_schema);
                if values.len() < min {
                    values.resize(min, None);
                }
                let item_schema = item_schema(&node_schema);
                let items = values
                    .into_iter()
                    .enumerate()
                    .map(|(i, value)| {
                        self.create_node(Some(id), i.to_string(), &item_schema, value, created)
                    })
                    .collect();
                Payload::Array { items }
            }
            _ => Payload::Terminal { value: initial },
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            node.payload = payload;
        }
        let baseline = self.value_of(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.baseline = baseline;
        }
        id
    }

    fn create_virtual(
        &mut self,
        parent: NodeId,
        name: String,
        declaration: &Value,
        created: &mut Vec<NodeId>,
    ) -> NodeId {
        let id = self.allocate();
        let fields = schema::virtual_fields(declaration);
        let declarations = schema::declarations(declaration);

        let mut computed = Computed::default();
        for field in &fields {
            computed.slot(&format!("../{}", path::escape_segment(field)));
        }
        computed.declare(&mut self.expressions, &declarations);

        let mut node = Node::new(name, Some(parent), NodeKind::Virtual, declaration.clone());
        node.payload = Payload::Virtual { fields };
        apply_static(&mut node.flags, &declarations);
        node.computed = Some(Box::new(computed));
        self.nodes.insert(id, node);
        created.push(id);
        id
    }

    fn allocate(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Removes the node and its subtree and drops their subscriptions.
    ///
    /// Surviving nodes that read a destroyed node keep the stale id until the
    /// caller's [`attach`](Self::attach) re-resolves them; the stale id is
    /// what marks them for recomputation. The parent's child list is left to
    /// the caller.
    pub(crate) fn destroy_subtree(&mut self, pass: &mut Pass, id: NodeId) {
        let doomed = self.subtree(id);
        for &node in &doomed {
            self.unregister(node);
        }
        // Departing bitmasks leave the global fold.
        if doomed
            .iter()
            .any(|n| self.nodes.get(n).is_some_and(|n| !n.state.is_empty()))
        {
            pass.state_changed = true;
        }
        trace!(node = %id, count = doomed.len(), "destroyed subtree");
        for node in doomed {
            self.nodes.remove(&node);
        }
    }

    /// Wires freshly created nodes in and settles them.
    ///
    /// With `changed`, nodes outside the new subtree whose dependencies may
    /// resolve differently under that address are re-resolved, and those
    /// whose targets moved are recomputed.
    pub(crate) fn attach(&mut self, pass: &mut Pass, created: &[NodeId], changed: Option<&Path>) {
        for &id in created {
            self.register(id);
        }
        let refreshed = match changed {
            Some(prefix) => self.refresh_affected(prefix, created),
            None => Vec::new(),
        };
        for &id in created {
            if self.is_reactive(id) {
                self.recompute(pass, id, None);
            }
        }
        for id in refreshed {
            self.recompute(pass, id, None);
        }
    }

    fn is_reactive(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|n| n.computed.is_some() || n.branch.is_some())
    }

    /// Children of `container` were created or destroyed by an explicit
    /// array operation.
    fn structure_changed(&mut self, pass: &mut Pass, container: NodeId, created: &[NodeId]) {
        let path = self.path(container);
        self.emit(FormEvent::ChildrenChanged {
            node: container,
            path: path.clone(),
        });
        self.attach(pass, created, Some(&path));
        pass.value_changed = true;
        self.mark_dirty(pass, &[container]);
        self.propagate(pass, vec![container]);
    }

    /// Applies a value and propagates it. Returns whether anything changed.
    pub(crate) fn write(
        &mut self,
        pass: &mut Pass,
        id: NodeId,
        value: Option<Value>,
        origin: WriteOrigin,
    ) -> bool {
        if !self.nodes.contains_key(&id) {
            return false;
        }
        trace!(node = %id, ?origin, "write");
        let mut changes = Changes::default();
        self.assign(pass, id, value, &mut changes);

        if !changes.resized.is_empty() {
            for &container in &changes.resized {
                let path = self.path(container);
                self.emit(FormEvent::ChildrenChanged {
                    node: container,
                    path,
                });
            }
            let prefix = self.path(id);
            self.attach(pass, &changes.created, Some(&prefix));
        }

        changes.changed.retain(|n| self.nodes.contains_key(n));
        if changes.changed.is_empty() {
            return false;
        }
        pass.value_changed = true;
        if origin.marks_dirty() {
            self.mark_dirty(pass, &changes.changed);
        }
        self.propagate(pass, changes.changed);
        true
    }

    fn assign(&mut self, pass: &mut Pass, id: NodeId, value: Option<Value>, changes: &mut Changes) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        match node.kind {
            NodeKind::Object => {
                if let Some(branch) = node.branch.as_mut() {
                    branch.pending = value.as_ref().and_then(Value::as_object).cloned();
                }
                let children: Vec<(String, NodeId)> = match &node.payload {
                    Payload::Object { children } => children.clone(),
                    _ => Vec::new(),
                };
                let values = match value {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                let position = changes.changed.len();
                for (key, child) in children {
                    if self.nodes.get(&child).is_some_and(|c| c.kind == NodeKind::Virtual) {
                        continue;
                    }
                    self.assign(pass, child, values.get(&key).cloned(), changes);
                }
                if changes.changed.len() > position {
                    changes.changed.insert(position, id);
                }
            }
            NodeKind::Array => {
                let items = match &node.payload {
                    Payload::Array { items } => items.clone(),
                    _ => Vec::new(),
                };
                let item_schema = item_schema(&node.schema);
                let values = match value {
                    Some(Value::Array(values)) => values,
                    _ => Vec::new(),
                };
                let position = changes.changed.len();
                let mut kept = items.clone();
                let resized = values.len() != items.len();
                if values.len() < items.len() {
                    for &extra in &items[values.len()..] {
                        self.destroy_subtree(pass, extra);
                    }
                    kept.truncate(values.len());
                }
                for (i, value) in values.into_iter().enumerate() {
                    match kept.get(i) {
                        Some(&item) => self.assign(pass, item, Some(value), changes),
                        None => {
                            let item = self.create_node(
                                Some(id),
                                i.to_string(),
                                &item_schema,
                                Some(value),
                                &mut changes.created,
                            );
                            kept.push(item);
                        }
                    }
                }
                if resized {
                    if let Some(node) = self.nodes.get_mut(&id) {
                        node.payload = Payload::Array { items: kept };
                    }
                    changes.resized.push(id);
                }
                if resized || changes.changed.len() > position {
                    changes.changed.insert(position, id);
                }
            }
            NodeKind::Virtual => {
                let fields = node.virtual_fields().len();
                let targets: Vec<Option<NodeId>> = (0..fields)
                    .map(|slot| {
                        node.computed
                            .as_ref()
                            .and_then(|c| c.dependencies.get(slot))
                            .and_then(|d| d.targets.first().copied())
                    })
                    .collect();
                let values = match value {
                    Some(Value::Array(values)) => values,
                    _ => Vec::new(),
                };
                for (i, target) in targets.into_iter().enumerate() {
                    if let Some(target) = target {
                        self.assign(pass, target, values.get(i).cloned(), changes);
                    }
                }
            }
            _ => {
                if let Payload::Terminal { value: slot } = &mut node.payload {
                    if *slot != value {
                        *slot = value;
                        changes.changed.push(id);
                    }
                }
            }
        }
    }

    /// Marks changed nodes and their ancestors `DIRTY` where they now
    /// differ from their baseline.
    fn mark_dirty(&mut self, pass: &mut Pass, changed: &[NodeId]) {
        let mut seen = HashSet::new();
        for &id in changed {
            let lineage: Vec<NodeId> = std::iter::once(id).chain(self.ancestors(id)).collect();
            for node in lineage {
                if !seen.insert(node) {
                    continue;
                }
                let differs = self
                    .nodes
                    .get(&node)
                    .is_some_and(|n| self.value_of(node) != n.baseline);
                if differs {
                    self.merge_state(pass, node, NodeState::DIRTY);
                }
            }
        }
    }

    /// Notifies listeners, dependents and injectors about changed nodes and
    /// their ancestors.
    pub(crate) fn propagate(&mut self, pass: &mut Pass, changed: Vec<NodeId>) {
        let mut seen = HashSet::new();
        let mut affected = Vec::new();
        for &id in &changed {
            if seen.insert(id) {
                affected.push(id);
            }
        }
        for &id in &changed {
            if self.nodes.get(&id).is_some_and(|n| n.kind == NodeKind::Virtual) {
                continue;
            }
            for ancestor in self.ancestors(id) {
                if seen.insert(ancestor) {
                    affected.push(ancestor);
                }
            }
        }

        for &id in &affected {
            let path = self.path(id);
            self.emit(FormEvent::ValueChanged { node: id, path });
        }
        for &id in &affected {
            let dependents: Vec<NodeId> = self
                .nodes
                .get(&id)
                .map(|n| n.dependents.iter().copied().collect())
                .unwrap_or_default();
            for dependent in dependents {
                self.recompute(pass, dependent, Some(id));
            }
        }
        for id in affected {
            if self.nodes.contains_key(&id) {
                self.run_injectors(pass, id);
            }
        }
    }

    /// Takes the current values of the subtree as the new `DIRTY` baseline.
    pub(crate) fn commit_subtree(&mut self, id: NodeId) {
        for node in self.subtree(id) {
            let value = self.value_of(node);
            if let Some(n) = self.nodes.get_mut(&node) {
                n.baseline = value;
            }
        }
    }

    pub(crate) fn value_of(&self, id: NodeId) -> Option<Value> {
        let node = self.nodes.get(&id)?;
        match &node.payload {
            Payload::Terminal { value } => value.clone(),
            Payload::Object { children } => {
                let mut map = Map::new();
                for (key, child) in children {
                    let Some(c) = self.nodes.get(child) else {
                        continue;
                    };
                    if c.kind == NodeKind::Virtual || !c.flags.active {
                        continue;
                    }
                    if let Some(value) = self.value_of(*child) {
                        map.insert(key.clone(), value);
                    }
                }
                Some(Value::Object(map))
            }
            Payload::Array { items } => Some(Value::Array(
                items
                    .iter()
                    .filter(|item| self.nodes.get(item).is_some_and(|n| n.flags.active))
                    .map(|item| self.value_of(*item).unwrap_or(Value::Null))
                    .collect(),
            )),
            Payload::Virtual { fields } => {
                let computed = node.computed.as_ref();
                Some(Value::Array(
                    (0..fields.len())
                        .map(|slot| {
                            computed
                                .and_then(|c| c.dependencies.get(slot))
                                .and_then(|d| d.targets.first())
                                .and_then(|t| self.value_of(*t))
                                .unwrap_or(Value::Null)
                        })
                        .collect(),
                ))
            }
        }
    }

    /// Nodes a virtual node projects, in field order. Unresolved fields are
    /// skipped.
    pub(crate) fn virtual_targets(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let Some(computed) = node.computed.as_ref() else {
            return Vec::new();
        };
        computed
            .dependencies
            .iter()
            .take(node.virtual_fields().len())
            .filter_map(|d| d.targets.first().copied())
            .collect()
    }

    /// Schema default for a node: its own `default`, else the parent's
    /// explicit default for this key, else the structural default.
    pub(crate) fn default_value(&self, id: NodeId) -> Option<Value> {
        let node = self.nodes.get(&id)?;
        if let Some(default) = node.schema.get("default") {
            return Some(default.clone());
        }
        let inherited = node
            .parent
            .and_then(|p| self.nodes.get(&p))
            .and_then(|p| p.schema.get("default"))
            .and_then(|d| match d {
                Value::Object(map) => map.get(&node.key).cloned(),
                Value::Array(items) => node.key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
                _ => None,
            });
        if inherited.is_some() {
            return inherited;
        }
        match &node.payload {
            Payload::Object { children } => Some(Value::Object(
                children
                    .iter()
                    .filter(|(_, c)| self.nodes.get(c).is_some_and(|n| n.kind != NodeKind::Virtual))
                    .filter_map(|(k, c)| self.default_value(*c).map(|v| (k.clone(), v)))
                    .collect(),
            )),
            Payload::Array { .. } => schema::schema_default(&node.schema),
            _ => None,
        }
    }

    fn array_parts(&self, array: NodeId) -> Result<(Vec<NodeId>, Value), FormError> {
        let node = self.nodes.get(&array).ok_or_else(|| FormError::NodeNotFound {
            path: array.to_string(),
        })?;
        match &node.payload {
            Payload::Array { items } => Ok((items.clone(), node.schema.clone())),
            _ => Err(FormError::NotAnArray {
                path: self.path(array).to_pointer(),
            }),
        }
    }

    fn effective_flag(&self, id: NodeId, pick: fn(&Flags) -> bool, require_all: bool) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        if !self.options.inherit_flags {
            return pick(&node.flags);
        }
        let mut lineage = std::iter::once(id)
            .chain(self.ancestors(id))
            .filter_map(|n| self.nodes.get(&n))
            .map(|n| pick(&n.flags));
        if require_all {
            lineage.all(|f| f)
        } else {
            lineage.any(|f| f)
        }
    }
}

fn item_schema(array_schema: &Value) -> Value {
    array_schema
        .get("items")
        .filter(|items| items.is_object())
        .cloned()
        .unwrap_or_else(|| json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn person() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "default": "anon" },
                "age": { "type": "number" },
                "tags": { "type": "array", "items": { "type": "string" }, "maxItems": 2 }
            }
        })
    }

    #[test]
    fn root_must_be_object() {
        let err = FormTree::new(json!(true)).unwrap_err();
        assert!(matches!(err, FormError::InvalidSchema { .. }));
    }

    #[test]
    fn builds_with_defaults() {
        let form = FormTree::new(person()).unwrap();
        assert_eq!(form.form_value(), json!({ "name": "anon", "tags": [] }));
        let age = form.find("/age").unwrap();
        assert_eq!(form.value(age), None);
        assert_eq!(form.path(age).to_pointer(), "/age");
    }

    #[test]
    fn initial_value_overrides_defaults() {
        let form = FormTree::builder(person())
            .value(json!({ "age": 30, "tags": ["a"] }))
            .build()
            .unwrap();
        assert_eq!(
            form.form_value(),
            json!({ "name": "anon", "age": 30, "tags": ["a"] })
        );
    }

    #[test]
    fn set_value_marks_dirty_up_the_tree() {
        let mut form = FormTree::new(person()).unwrap();
        let age = form.find("/age").unwrap();
        assert!(form.set_value(age, json!(40)));
        assert!(!form.set_value(age, json!(40)));
        assert!(form.node(age).unwrap().state().contains(NodeState::DIRTY));
        assert!(form
            .node(form.root())
            .unwrap()
            .state()
            .contains(NodeState::DIRTY));
        assert!(form.global_state().contains(NodeState::DIRTY));
    }

    #[test]
    fn array_operations() {
        let mut form = FormTree::new(person()).unwrap();
        let tags = form.find("/tags").unwrap();
        let first = form.push(tags, Some(json!("a"))).unwrap();
        form.push(tags, Some(json!("b"))).unwrap();
        assert!(matches!(
            form.push(tags, Some(json!("c"))),
            Err(FormError::MaxItems { max: 2, .. })
        ));
        assert_eq!(form.value(tags), Some(json!(["a", "b"])));

        assert_eq!(form.remove(tags, 0).unwrap(), Some(json!("a")));
        assert!(form.node(first).is_none());
        let moved = form.find("/tags/0").unwrap();
        assert_eq!(form.value(moved), Some(json!("b")));
        assert!(form.find("/tags/1").is_none());

        form.update(tags, 0, json!("z")).unwrap();
        assert_eq!(form.value(tags), Some(json!(["z"])));
        assert!(matches!(
            form.update(tags, 3, json!("x")),
            Err(FormError::IndexOutOfBounds { index: 3, .. })
        ));

        form.clear(tags).unwrap();
        assert_eq!(form.value(tags), Some(json!([])));

        let name = form.find("/name").unwrap();
        assert!(matches!(form.push(name, None), Err(FormError::NotAnArray { .. })));
    }

    #[test]
    fn writing_an_array_resizes_it() {
        let mut form = FormTree::new(person()).unwrap();
        let tags = form.find("/tags").unwrap();
        form.set_value(tags, json!(["x", "y"]));
        assert_eq!(form.node(tags).unwrap().children().len(), 2);
        form.set_value(tags, json!(["x"]));
        assert_eq!(form.node(tags).unwrap().children().len(), 1);
    }

    #[test]
    fn unset_container_clears_fields() {
        let mut form = FormTree::new(person()).unwrap();
        form.set_value_at("/age", json!(5)).unwrap();
        form.unset_value(form.root());
        assert_eq!(form.form_value(), json!({ "tags": [] }));
    }

    #[test]
    fn listeners_get_deduplicated_events() {
        let mut form = FormTree::new(person()).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        form.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        form.set_value_at("/age", json!(1)).unwrap();
        let events = seen.borrow();
        let root_changes = events
            .iter()
            .filter(|e| matches!(e, FormEvent::ValueChanged { path, .. } if path.is_root()))
            .count();
        assert_eq!(root_changes, 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, FormEvent::GlobalStateChanged { .. })));
    }

    #[test]
    fn set_value_at_unknown_path() {
        let mut form = FormTree::new(person()).unwrap();
        assert!(matches!(
            form.set_value_at("/nope", json!(1)),
            Err(FormError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn find_relative_and_wildcard() {
        let form = FormTree::builder(person())
            .value(json!({ "tags": ["a", "b"] }))
            .build()
            .unwrap();
        let name = form.find("#/name").unwrap();
        assert_eq!(form.find_from(name, "../age"), form.find("/age"));
        assert_eq!(form.find_all(&Path::parse("/tags/*")).len(), 2);
    }
}
