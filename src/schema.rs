//! Reading form-relevant information out of schema fragments.

use serde_json::{Map, Value};

use crate::node::NodeKind;
use crate::types::{json_type_name, BRANCH_KEYWORDS, COMPUTED_KEY, SHORTHAND_PREFIX};

/// A computed flag declared either statically or as an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Declared {
    Static(bool),
    Expression(String),
}

/// Computed declarations found on one schema fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Declarations {
    pub(crate) visible: Option<Declared>,
    pub(crate) active: Option<Declared>,
    pub(crate) read_only: Option<Declared>,
    pub(crate) disabled: Option<Declared>,
    pub(crate) derived: Option<String>,
    pub(crate) pristine: Option<String>,
    pub(crate) watch: Vec<String>,
    /// Branch condition of a `oneOf` fragment.
    pub(crate) condition: Option<String>,
}

/// How a branch fragment decides whether it applies.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RawCondition {
    Expression(String),
    /// The node value must (or, negated, must not) match this schema.
    Schema { schema: Value, negate: bool },
    Always,
}

/// A `oneOf` member or an `if` arm, before compilation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawFragment {
    pub(crate) schema: Value,
    pub(crate) condition: RawCondition,
}

/// Infers the node kind of a fragment.
///
/// `type` wins (first non-`null` entry of a type array, `integer` counts as
/// number); otherwise structure and example values decide.
pub fn infer_kind(schema: &Value) -> NodeKind {
    let declared = match schema.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            names
                .iter()
                .find(|t| **t != "null")
                .or(names.first())
                .copied()
        }
        _ => None,
    };
    if let Some(kind) = declared.and_then(kind_from_name) {
        return kind;
    }

    if schema.get("properties").is_some()
        || schema.get("virtual").is_some()
        || schema.get("oneOf").is_some()
        || schema.get("then").is_some()
    {
        return NodeKind::Object;
    }
    if schema.get("items").is_some() {
        return NodeKind::Array;
    }
    let example = schema
        .get("const")
        .or_else(|| schema.get("default"))
        .or_else(|| schema.get("enum").and_then(|e| e.get(0)));
    example
        .and_then(|v| kind_from_name(json_type_name(v)))
        .unwrap_or(NodeKind::Null)
}

fn kind_from_name(name: &str) -> Option<NodeKind> {
    Some(match name {
        "object" => NodeKind::Object,
        "array" => NodeKind::Array,
        "string" => NodeKind::String,
        "number" | "integer" => NodeKind::Number,
        "boolean" => NodeKind::Boolean,
        "null" => NodeKind::Null,
        _ => return None,
    })
}

/// The `properties` of a fragment, in declaration order.
pub(crate) fn properties(schema: &Value) -> Vec<(String, Value)> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// `virtual` declarations of an object fragment.
pub(crate) fn virtual_declarations(schema: &Value) -> Vec<(String, Value)> {
    schema
        .get("virtual")
        .and_then(Value::as_object)
        .map(|decls| decls.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// `fields` of a virtual declaration.
pub(crate) fn virtual_fields(declaration: &Value) -> Vec<String> {
    declaration
        .get("fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Default a schema produces without any node context.
///
/// `default` wins; objects collect their properties' defaults; arrays are
/// padded to `minItems`; terminals without a default are undefined.
pub fn schema_default(schema: &Value) -> Option<Value> {
    if let Some(default) = schema.get("default") {
        return Some(default.clone());
    }
    match infer_kind(schema) {
        NodeKind::Object => {
            let map: Map<String, Value> = properties(schema)
                .into_iter()
                .filter_map(|(k, s)| schema_default(&s).map(|v| (k, v)))
                .collect();
            Some(Value::Object(map))
        }
        NodeKind::Array => {
            let items = schema.get("items").cloned().unwrap_or(Value::Null);
            let count = min_items(schema);
            Some(Value::Array(
                (0..count)
                    .map(|_| schema_default(&items).unwrap_or(Value::Null))
                    .collect(),
            ))
        }
        _ => None,
    }
}

pub(crate) fn min_items(schema: &Value) -> usize {
    schema
        .get("minItems")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(0)
}

pub(crate) fn max_items(schema: &Value) -> Option<usize> {
    schema
        .get("maxItems")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
}

/// Whether the fragment declares branches.
pub(crate) fn has_branches(schema: &Value) -> bool {
    schema.get("oneOf").is_some_and(Value::is_array) || schema.get("if").is_some()
}

/// Removes branch keywords, leaving the fragment every branch shares.
pub(crate) fn strip_branches(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !BRANCH_KEYWORDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Branch fragments of a schema, in declaration order.
///
/// `oneOf` members are guarded by their `if` declaration, else by their
/// discriminator properties (`const`/`enum`), else always apply.
/// `if`/`then`/`else` becomes two fragments guarded by the `if` schema.
pub(crate) fn branch_fragments(schema: &Value) -> Vec<RawFragment> {
    if let Some(members) = schema.get("oneOf").and_then(Value::as_array) {
        return members
            .iter()
            .map(|member| RawFragment {
                schema: member.clone(),
                condition: fragment_condition(member),
            })
            .collect();
    }
    if let Some(test) = schema.get("if") {
        let empty = Value::Object(Map::new());
        let then = schema.get("then").cloned().unwrap_or_else(|| empty.clone());
        let otherwise = schema.get("else").cloned().unwrap_or(empty);
        return vec![
            RawFragment {
                schema: then,
                condition: RawCondition::Schema {
                    schema: test.clone(),
                    negate: false,
                },
            },
            RawFragment {
                schema: otherwise,
                condition: RawCondition::Schema {
                    schema: test.clone(),
                    negate: true,
                },
            },
        ];
    }
    Vec::new()
}

fn fragment_condition(member: &Value) -> RawCondition {
    if let Some(expression) = declarations(member).condition {
        return RawCondition::Expression(expression);
    }
    let mut discriminators = Map::new();
    let mut required = Vec::new();
    for (key, prop) in properties(member) {
        let mut pinned = Map::new();
        for keyword in ["const", "enum"] {
            if let Some(v) = prop.get(keyword) {
                pinned.insert(keyword.to_string(), v.clone());
            }
        }
        if !pinned.is_empty() {
            required.push(Value::String(key.clone()));
            discriminators.insert(key, Value::Object(pinned));
        }
    }
    if discriminators.is_empty() {
        return RawCondition::Always;
    }
    let mut test = Map::new();
    test.insert("properties".into(), Value::Object(discriminators));
    test.insert("required".into(), Value::Array(required));
    RawCondition::Schema {
        schema: Value::Object(test),
        negate: false,
    }
}

/// Merges a branch fragment onto the shared fragment.
///
/// Top-level keys of `overlay` replace those of `base`, except `properties`
/// (merged per property, shallowly) and `required` (union).
pub(crate) fn merge_schemas(base: &Value, overlay: &Value) -> Value {
    let (Some(base_map), Some(overlay_map)) = (base.as_object(), overlay.as_object()) else {
        return base.clone();
    };
    let mut merged = base_map.clone();
    for (key, value) in overlay_map {
        match key.as_str() {
            "properties" => {
                let mut props = base_map
                    .get("properties")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                if let Some(extra) = value.as_object() {
                    for (name, prop) in extra {
                        let combined = match props.get(name) {
                            Some(existing) => shallow_merge(existing, prop),
                            None => prop.clone(),
                        };
                        props.insert(name.clone(), combined);
                    }
                }
                merged.insert(key.clone(), Value::Object(props));
            }
            "required" => {
                let mut required = base_map
                    .get("required")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for name in value.as_array().into_iter().flatten() {
                    if !required.contains(name) {
                        required.push(name.clone());
                    }
                }
                merged.insert(key.clone(), Value::Array(required));
            }
            k if BRANCH_KEYWORDS.contains(&k) => {}
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(merged)
}

fn shallow_merge(base: &Value, overlay: &Value) -> Value {
    match (base.as_object(), overlay.as_object()) {
        (Some(b), Some(o)) => {
            let mut merged = b.clone();
            for (k, v) in o {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

/// Reads computed declarations from `computed: {…}` and `&`-prefixed keys.
/// The shorthand wins when both are present.
pub(crate) fn declarations(schema: &Value) -> Declarations {
    let lookup = |name: &str| -> Option<&Value> {
        schema
            .get(format!("{SHORTHAND_PREFIX}{name}"))
            .or_else(|| schema.get(COMPUTED_KEY).and_then(|c| c.get(name)))
    };
    let flag = |name: &str| -> Option<Declared> {
        match lookup(name)? {
            Value::Bool(b) => Some(Declared::Static(*b)),
            Value::String(s) => Some(Declared::Expression(s.clone())),
            _ => None,
        }
    };
    let expression = |name: &str| lookup(name).and_then(Value::as_str).map(String::from);

    let read_only = flag("readOnly").or_else(|| {
        schema
            .get("readOnly")
            .and_then(Value::as_bool)
            .map(Declared::Static)
    });
    let watch = match lookup("watch") {
        Some(Value::String(path)) => vec![path.clone()],
        Some(Value::Array(paths)) => paths
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    };

    Declarations {
        visible: flag("visible"),
        active: flag("active"),
        read_only,
        disabled: flag("disabled"),
        derived: expression("derived"),
        pristine: expression("pristine"),
        watch,
        condition: expression("if"),
    }
}
