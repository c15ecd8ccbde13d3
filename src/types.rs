//! Core types: configuration, events and JSON helpers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::NodeId;
use crate::path::Path;
use crate::state::NodeState;

/// Keys under which computed declarations may appear.
pub const COMPUTED_KEY: &str = "computed";

/// Prefix for the shorthand form of computed declarations (`&visible`).
pub const SHORTHAND_PREFIX: char = '&';

/// Schema keys that describe branches rather than the node itself.
pub const BRANCH_KEYWORDS: &[&str] = &["oneOf", "if", "then", "else"];

/// Returns the JSON type name for messages and kind inference.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// When a node's errors should be shown regardless of its `SHOW_ERROR` bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShowErrorPolicy {
    /// Only the explicit `SHOW_ERROR` bit decides.
    #[default]
    Never,
    /// Errors are always shown.
    Always,
    /// Shown once the node is dirty.
    Dirty,
    /// Shown once the node is touched.
    Touched,
    /// Shown once the node is both dirty and touched.
    DirtyTouched,
}

impl ShowErrorPolicy {
    /// Whether the policy forces errors on for a node in `state`.
    pub fn forces(&self, state: NodeState) -> bool {
        match self {
            ShowErrorPolicy::Never => false,
            ShowErrorPolicy::Always => true,
            ShowErrorPolicy::Dirty => state.contains(NodeState::DIRTY),
            ShowErrorPolicy::Touched => state.contains(NodeState::TOUCHED),
            ShowErrorPolicy::DirtyTouched => {
                state.contains(NodeState::DIRTY | NodeState::TOUCHED)
            }
        }
    }
}

/// When the tree runs the validator on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationMode {
    /// Only when `validate` is called.
    #[default]
    Manual,
    /// After every pass that changed a value.
    OnChange,
}

/// Options for building a form tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormOptions {
    pub show_error: ShowErrorPolicy,
    pub validation: ValidationMode,
    /// When true, `readOnly`/`disabled` are inherited from ancestors and
    /// `visible`/`active` require every ancestor to be visible/active in the
    /// effective view.
    pub inherit_flags: bool,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            show_error: ShowErrorPolicy::Never,
            validation: ValidationMode::Manual,
            inherit_flags: true,
        }
    }
}

impl FormOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_error(mut self, policy: ShowErrorPolicy) -> Self {
        self.show_error = policy;
        self
    }

    pub fn validation(mut self, mode: ValidationMode) -> Self {
        self.validation = mode;
        self
    }

    pub fn inherit_flags(mut self, inherit: bool) -> Self {
        self.inherit_flags = inherit;
        self
    }
}

/// Notification delivered to listeners once a pass completes.
#[derive(Debug, Clone, PartialEq)]
pub enum FormEvent {
    ValueChanged { node: NodeId, path: Path },
    FlagsChanged { node: NodeId, path: Path },
    WatchChanged { node: NodeId, path: Path },
    StateChanged { node: NodeId, path: Path, state: NodeState },
    /// Children were created or destroyed (array resize, branch switch).
    ChildrenChanged { node: NodeId, path: Path },
    GlobalStateChanged { state: NodeState },
    Validated { errors: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: FormOptions = serde_json::from_value(json!({ "showError": "dirty" })).unwrap();
        assert_eq!(opts.show_error, ShowErrorPolicy::Dirty);
        assert_eq!(opts.validation, ValidationMode::Manual);
        assert!(opts.inherit_flags);

        let opts: FormOptions =
            serde_json::from_value(json!({ "validation": "onChange", "inheritFlags": false }))
                .unwrap();
        assert_eq!(opts.validation, ValidationMode::OnChange);
        assert!(!opts.inherit_flags);
    }

    #[test]
    fn options_builder() {
        let opts = FormOptions::new()
            .show_error(ShowErrorPolicy::Always)
            .validation(ValidationMode::OnChange);
        assert_eq!(opts.show_error, ShowErrorPolicy::Always);
        assert_eq!(opts.validation, ValidationMode::OnChange);
    }

    #[test]
    fn show_error_policy() {
        assert!(!ShowErrorPolicy::Never.forces(NodeState::all()));
        assert!(ShowErrorPolicy::Always.forces(NodeState::empty()));
        assert!(ShowErrorPolicy::Dirty.forces(NodeState::DIRTY));
        assert!(!ShowErrorPolicy::Touched.forces(NodeState::DIRTY));
        assert!(!ShowErrorPolicy::DirtyTouched.forces(NodeState::TOUCHED));
        assert!(ShowErrorPolicy::DirtyTouched.forces(NodeState::DIRTY | NodeState::TOUCHED));
    }

    #[test]
    fn type_names() {
        assert_eq!(json_type_name(&json!(null)), "null");
        assert_eq!(json_type_name(&json!(1.5)), "number");
        assert_eq!(json_type_name(&json!({})), "object");
    }
}
