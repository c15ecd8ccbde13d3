//! Validation of form values against the schema the form currently presents.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use jsonschema::error::ValidationErrorKind;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{FormError, JsonSchemaError, ValidateError};
use crate::node::{NodeId, NodeKind, Payload};
use crate::path::Path;
use crate::tree::FormTree;
use crate::types::FormEvent;

/// Validates a value against a schema, returning every finding.
///
/// Closures of type `Fn(&Value, &Value) -> Vec<JsonSchemaError>` (schema,
/// value) implement this trait, which makes it easy to plug in another
/// validator or a fake in tests.
pub trait SchemaValidator {
    /// # Errors
    ///
    /// Returns `FormError::ValidatorCompile` if `schema` is not usable.
    fn validate(&self, schema: &Value, value: &Value) -> Result<Vec<JsonSchemaError>, FormError>;
}

impl<F> SchemaValidator for F
where
    F: Fn(&Value, &Value) -> Vec<JsonSchemaError>,
{
    fn validate(&self, schema: &Value, value: &Value) -> Result<Vec<JsonSchemaError>, FormError> {
        Ok(self(schema, value))
    }
}

/// Default validator backed by the `jsonschema` crate. Compiled schemas are
/// cached by their serialized text.
#[derive(Default)]
pub struct JsonSchemaValidator {
    compiled: RefCell<HashMap<String, Rc<jsonschema::Validator>>>,
}

impl fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchemaValidator")
            .field("compiled", &self.compiled.borrow().len())
            .finish()
    }
}

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, schema: &Value) -> Result<Rc<jsonschema::Validator>, FormError> {
        let key = schema.to_string();
        if let Some(hit) = self.compiled.borrow().get(&key) {
            return Ok(Rc::clone(hit));
        }
        let validator = jsonschema::validator_for(schema).map_err(|e| FormError::ValidatorCompile {
            message: e.to_string(),
        })?;
        let validator = Rc::new(validator);
        self.compiled.borrow_mut().insert(key, Rc::clone(&validator));
        Ok(validator)
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, schema: &Value, value: &Value) -> Result<Vec<JsonSchemaError>, FormError> {
        let validator = self.compile(schema)?;
        let errors = validator.iter_errors(value).map(|e| convert(&e)).collect();
        Ok(errors)
    }
}

fn convert(error: &jsonschema::ValidationError<'_>) -> JsonSchemaError {
    let schema_path = error.schema_path.to_string();
    let keyword = schema_path
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    let params = match &error.kind {
        ValidationErrorKind::Required { property } => json!({ "missingProperty": property }),
        _ => json!({}),
    };
    JsonSchemaError {
        keyword,
        instance_path: error.instance_path.to_string(),
        schema_path,
        params,
        message: error.to_string(),
    }
}

/// Validates a standalone value against a schema.
///
/// # Errors
///
/// Returns `ValidateError::Invalid` with every finding, or
/// `ValidateError::Form` if the schema does not compile.
pub fn validate_value(schema: &Value, value: &Value) -> Result<(), ValidateError> {
    let errors = JsonSchemaValidator::new().validate(schema, value)?;
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidateError::Invalid { errors })
    }
}

impl FormTree {
    /// Validates the whole form and attaches errors to nodes.
    ///
    /// Each error is stored on the deepest existing node along its instance
    /// path; `required` errors land on the missing field when it exists.
    ///
    /// # Errors
    ///
    /// Returns `FormError::ValidatorCompile` if the effective schema does not compile.
    pub fn validate(&mut self) -> Result<Vec<JsonSchemaError>, FormError> {
        let errors = self.run_validation(self.root());
        self.flush_events();
        errors
    }

    /// Validates one subtree. Errors elsewhere are left untouched.
    ///
    /// # Errors
    ///
    /// Fails when the node does not exist or its schema does not compile.
    pub fn validate_node(&mut self, id: NodeId) -> Result<Vec<JsonSchemaError>, FormError> {
        let errors = self.run_validation(id);
        self.flush_events();
        errors
    }

    /// Schema describing what the subtree presents right now: branch
    /// keywords resolved, inactive and virtual fields dropped, array items
    /// pinned with `prefixItems`.
    pub fn effective_schema(&self, id: NodeId) -> Option<Value> {
        let node = self.nodes.get(&id)?;
        let mut schema = match &node.schema {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        schema.remove("virtual");
        match &node.payload {
            Payload::Object { children } => {
                let mut properties = Map::new();
                for (key, child) in children {
                    let Some(c) = self.nodes.get(child) else {
                        continue;
                    };
                    if c.kind == NodeKind::Virtual || !c.flags.active {
                        continue;
                    }
                    if let Some(child_schema) = self.effective_schema(*child) {
                        properties.insert(key.clone(), child_schema);
                    }
                }
                if let Some(Value::Array(required)) = schema.get("required") {
                    let kept: Vec<Value> = required
                        .iter()
                        .filter(|name| name.as_str().is_some_and(|n| properties.contains_key(n)))
                        .cloned()
                        .collect();
                    schema.insert("required".into(), Value::Array(kept));
                }
                schema.insert("properties".into(), Value::Object(properties));
            }
            Payload::Array { items } => {
                let prefix: Vec<Value> = items
                    .iter()
                    .filter(|item| self.nodes.get(item).is_some_and(|n| n.flags.active))
                    .filter_map(|item| self.effective_schema(*item))
                    .collect();
                if !prefix.is_empty() {
                    schema.insert("prefixItems".into(), Value::Array(prefix));
                }
            }
            Payload::Terminal { .. } | Payload::Virtual { .. } => {}
        }
        Some(Value::Object(schema))
    }

    pub(crate) fn run_validation(&mut self, id: NodeId) -> Result<Vec<JsonSchemaError>, FormError> {
        let schema = self
            .effective_schema(id)
            .ok_or_else(|| FormError::NodeNotFound {
                path: id.to_string(),
            })?;
        let value = self.value_of(id).unwrap_or(Value::Null);
        let mut errors = self.validator.validate(&schema, &value)?;

        for node in self.subtree(id) {
            if let Some(n) = self.nodes.get_mut(&node) {
                n.errors.clear();
            }
        }

        let base = self.path(id);
        for error in &mut errors {
            let mut address = base.clone();
            for segment in Path::parse(&error.instance_path).segments() {
                if let Some(key) = segment.as_key() {
                    address = address.child(key);
                }
            }
            error.instance_path = address.to_pointer();
            if error.keyword == "required" {
                if let Some(missing) = error.params.get("missingProperty").and_then(Value::as_str) {
                    address = address.child(missing);
                }
            }
            let owner = self.deepest_existing(&address);
            if let Some(node) = self.nodes.get_mut(&owner) {
                node.errors.push(error.clone());
            }
        }

        debug!(node = %base, errors = errors.len(), "validated");
        self.emit(FormEvent::Validated {
            errors: errors.len(),
        });
        Ok(errors)
    }

    fn deepest_existing(&self, address: &Path) -> NodeId {
        let mut current = self.root();
        for segment in address.segments() {
            let next = segment
                .as_key()
                .and_then(|key| self.nodes.get(&current).and_then(|n| n.child(key)));
            match next {
                Some(child) => current = child,
                None => break,
            }
        }
        current
    }
}
