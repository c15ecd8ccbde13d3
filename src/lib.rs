//! Schema Form
//!
//! Reactive form trees built from JSON Schema.
//!
//! Every schema location becomes a node holding a value, presentation flags
//! and an interaction state. Schema fragments can declare computed
//! properties as expressions over other nodes' values; the tree keeps them
//! current by pushing every change to the nodes that read it.
//!
//! # Example
//!
//! ```
//! use schema_form::{FormTree, NodeState};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "price": { "type": "number", "default": 10 },
//!         "quantity": { "type": "number", "default": 1 },
//!         "total": { "type": "number", "&derived": "../price * ../quantity" }
//!     }
//! });
//!
//! let mut form = FormTree::new(schema).unwrap();
//! assert_eq!(form.form_value()["total"], json!(10));
//!
//! form.set_value_at("/quantity", json!(3)).unwrap();
//! assert_eq!(form.form_value()["total"], json!(30));
//! assert!(form.global_state().contains(NodeState::DIRTY));
//! ```
//!
//! # Computed declarations
//!
//! Declared under `computed` or with the `&` shorthand (`&visible`):
//!
//! | Key | Value | Effect |
//! |-----|-------|--------|
//! | `visible` | bool or expression | presentation |
//! | `active` | bool or expression | inactive nodes drop out of the value |
//! | `readOnly` | bool or expression | also read from the `readOnly` keyword |
//! | `disabled` | bool or expression | |
//! | `watch` | path or paths | mirrored into [`Node::watch_values`] |
//! | `derived` | expression | written into the node's value |
//! | `pristine` | expression | clears the node's state when truthy |
//! | `if` | expression | guards a `oneOf` member |
//!
//! Expressions reference nodes with `#/a/b`, `/a/b`, `./a` and `../a` paths.

mod branch;
mod computed;
mod error;
mod eval;
mod expression;
mod inject;
mod loader;
mod node;
mod path;
mod schema;
mod snapshot;
mod state;
mod tree;
mod types;
mod validator;

pub use error::{FormError, JsonSchemaError, LoadError, ValidateError};
pub use eval::{truthy, EvalError, ExpressionEvaluator, SandboxEvaluator};
pub use expression::{extract_dependencies, ExpressionCache, Extracted, DEPENDENCIES_IDENT};
pub use inject::InjectFn;
pub use loader::{is_url, load_document, load_document_auto, load_document_str};
pub use node::{Flags, Node, NodeId, NodeKind};
pub use path::{
    escape_segment, reference_kind, resolve, resolve_pointer, unescape_segment, Path,
    ReferenceKind, Segment,
};
pub use schema::{infer_kind, schema_default};
pub use snapshot::{FormSnapshot, NodeSnapshot};
pub use state::NodeState;
pub use tree::{FormBuilder, FormTree};
pub use types::{
    json_type_name, FormEvent, FormOptions, ShowErrorPolicy, ValidationMode, BRANCH_KEYWORDS,
    COMPUTED_KEY, SHORTHAND_PREFIX,
};
pub use validator::{validate_value, JsonSchemaValidator, SchemaValidator};

#[cfg(feature = "remote")]
pub use loader::load_document_url;
