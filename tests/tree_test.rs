//! Integration tests for form trees.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::{json, Map, Value};
use schema_form::{
    EvalError, ExpressionEvaluator, FormEvent, FormOptions, FormTree, JsonSchemaError,
    NodeState, ShowErrorPolicy, ValidationMode,
};

fn inject(target: &'static str, delta: i64) -> impl Fn(&Value) -> Option<Map<String, Value>> {
    move |value: &Value| {
        let n = value.as_i64()?;
        let mut writes = Map::new();
        writes.insert(target.to_string(), json!(n + delta));
        Some(writes)
    }
}

fn numbers(keys: &[&str]) -> Value {
    let properties: Map<String, Value> = keys
        .iter()
        .map(|k| (k.to_string(), json!({ "type": "number" })))
        .collect();
    json!({ "type": "object", "properties": properties })
}

// === Computed Flags ===

mod computed_flags {
    use super::*;

    fn license_form() -> FormTree {
        FormTree::new(json!({
            "type": "object",
            "properties": {
                "age": { "type": "number", "default": 10 },
                "license": { "type": "string", "&visible": "../age >= 18" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn visibility_follows_dependency() {
        let mut form = license_form();
        let age = form.find("/age").unwrap();
        let license = form.find("/license").unwrap();

        assert!(!form.is_visible(license));
        form.set_value(age, json!(21));
        assert!(form.is_visible(license));
        form.set_value(age, json!(3));
        assert!(!form.is_visible(license));
    }

    #[test]
    fn flag_change_emits_event() {
        let mut form = license_form();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        form.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        form.set_value_at("/age", json!(30)).unwrap();
        let license = form.find("/license").unwrap();
        assert!(seen
            .borrow()
            .iter()
            .any(|e| matches!(e, FormEvent::FlagsChanged { node, .. } if *node == license)));
    }

    #[test]
    fn inactive_fields_leave_the_value() {
        let mut form = FormTree::builder(json!({
            "type": "object",
            "properties": {
                "enabled": { "type": "boolean", "default": false },
                "detail": { "type": "string", "computed": { "active": "../enabled" } }
            }
        }))
        .value(json!({ "detail": "kept" }))
        .build()
        .unwrap();

        assert_eq!(form.form_value(), json!({ "enabled": false }));
        form.set_value_at("/enabled", json!(true)).unwrap();
        assert_eq!(form.form_value(), json!({ "enabled": true, "detail": "kept" }));
    }

    #[test]
    fn failing_expression_falls_back_to_default() {
        let form = FormTree::new(json!({
            "type": "object",
            "properties": {
                "a": { "type": "string", "&visible": "../missing.deep.path" },
                "b": { "type": "string", "&disabled": "../missing.deep.path" }
            }
        }))
        .unwrap();
        let a = form.find("/a").unwrap();
        let b = form.find("/b").unwrap();
        assert!(form.is_visible(a));
        assert!(!form.is_disabled(b));
    }

    #[test]
    fn flags_inherit_from_ancestors() {
        let schema = json!({
            "type": "object",
            "properties": {
                "group": {
                    "type": "object",
                    "readOnly": true,
                    "&visible": false,
                    "properties": { "field": { "type": "string" } }
                }
            }
        });
        let form = FormTree::new(schema.clone()).unwrap();
        let field = form.find("/group/field").unwrap();
        assert!(form.is_read_only(field));
        assert!(!form.is_visible(field));
        assert!(form.node(field).unwrap().flags().visible);

        let form = FormTree::builder(schema)
            .options(FormOptions::new().inherit_flags(false))
            .build()
            .unwrap();
        let field = form.find("/group/field").unwrap();
        assert!(!form.is_read_only(field));
        assert!(form.is_visible(field));
    }

    #[test]
    fn custom_evaluator_is_used() {
        struct Never;
        impl ExpressionEvaluator for Never {
            fn evaluate(&self, _: &str, _: &[Value]) -> Result<Value, EvalError> {
                Ok(json!(false))
            }
        }

        let form = FormTree::builder(json!({
            "type": "object",
            "properties": { "a": { "type": "string", "&visible": "true" } }
        }))
        .evaluator(Never)
        .build()
        .unwrap();
        assert!(!form.is_visible(form.find("/a").unwrap()));
    }
}

// === Derived Values And Watch ===

mod derived {
    use super::*;

    fn chain() -> FormTree {
        FormTree::new(json!({
            "type": "object",
            "properties": {
                "a": { "type": "number", "default": 2 },
                "b": { "type": "number", "&derived": "../a * 2" },
                "c": { "type": "number", "&derived": "../b + 1" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn derived_values_settle_at_build() {
        let form = chain();
        assert_eq!(form.form_value(), json!({ "a": 2, "b": 4, "c": 5 }));
        assert!(form.global_state().is_empty());
    }

    #[test]
    fn derived_values_follow_writes() {
        let mut form = chain();
        form.set_value_at("/a", json!(5)).unwrap();
        assert_eq!(form.form_value(), json!({ "a": 5, "b": 10, "c": 11 }));

        let b = form.find("/b").unwrap();
        assert!(!form.node(b).unwrap().state().contains(NodeState::DIRTY));
        let a = form.find("/a").unwrap();
        assert!(form.node(a).unwrap().state().contains(NodeState::DIRTY));
    }

    #[test]
    fn watch_mirrors_values() {
        let mut form = FormTree::new(json!({
            "type": "object",
            "properties": {
                "first": { "type": "string", "default": "Ada" },
                "last": { "type": "string" },
                "summary": { "type": "string", "&watch": ["../first", "../last"] }
            }
        }))
        .unwrap();
        let summary = form.find("/summary").unwrap();
        assert_eq!(form.node(summary).unwrap().watch_values(), &[json!("Ada"), json!(null)]);

        form.set_value_at("/last", json!("Lovelace")).unwrap();
        assert_eq!(
            form.node(summary).unwrap().watch_values(),
            &[json!("Ada"), json!("Lovelace")]
        );
    }

    #[test]
    fn wildcard_dependencies_track_array_items() {
        let mut form = FormTree::new(json!({
            "type": "object",
            "properties": {
                "items": { "type": "array", "items": { "type": "number" } },
                "count": { "type": "number", "&derived": "../items/*.length" }
            }
        }))
        .unwrap();
        let items = form.find("/items").unwrap();
        let count = form.find("/count").unwrap();
        assert_eq!(form.value(count), Some(json!(0)));

        form.push(items, Some(json!(4))).unwrap();
        form.push(items, Some(json!(7))).unwrap();
        assert_eq!(form.value(count), Some(json!(2)));

        form.remove(items, 0).unwrap();
        assert_eq!(form.value(count), Some(json!(1)));

        form.set_value(items, json!([1, 2, 3]));
        assert_eq!(form.value(count), Some(json!(3)));
    }

    #[test]
    fn relative_dependencies_follow_reindexed_items() {
        let mut form = FormTree::builder(json!({
            "type": "object",
            "properties": {
                "rows": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "qty": { "type": "number" },
                            "double": { "type": "number", "&derived": "../qty * 2" }
                        }
                    }
                }
            }
        }))
        .value(json!({ "rows": [{ "qty": 1 }, { "qty": 5 }] }))
        .build()
        .unwrap();
        let rows = form.find("/rows").unwrap();
        assert_eq!(
            form.value(rows),
            Some(json!([{ "qty": 1, "double": 2 }, { "qty": 5, "double": 10 }]))
        );

        form.remove(rows, 0).unwrap();
        form.set_value_at("/rows/0/qty", json!(6)).unwrap();
        assert_eq!(form.value(rows), Some(json!([{ "qty": 6, "double": 12 }])));
    }

    #[test]
    fn pristine_clears_state() {
        let mut form = FormTree::new(json!({
            "type": "object",
            "properties": {
                "submitted": { "type": "boolean", "default": false },
                "name": { "type": "string", "&pristine": "../submitted" }
            }
        }))
        .unwrap();
        let name = form.find("/name").unwrap();
        form.set_value(name, json!("x"));
        form.blur(name);
        assert!(!form.node(name).unwrap().state().is_empty());

        form.set_value_at("/submitted", json!(true)).unwrap();
        assert!(form.node(name).unwrap().state().is_empty());
    }
}

// === Branches ===

mod branches {
    use super::*;

    fn kinds(second_count: Value) -> Value {
        json!({
            "type": "object",
            "properties": { "kind": { "type": "string", "default": "a" } },
            "oneOf": [
                {
                    "&if": "./kind === 'a'",
                    "properties": { "count": { "type": "number", "default": 1 } }
                },
                {
                    "&if": "./kind === 'b'",
                    "properties": {
                        "count": second_count,
                        "label": { "type": "string", "default": "x" }
                    }
                }
            ]
        })
    }

    #[test]
    fn expression_branch_selects_fields() {
        let mut form = FormTree::new(kinds(json!({ "type": "number" }))).unwrap();
        assert_eq!(form.node(form.root()).unwrap().selected_branch(), Some(0));
        assert_eq!(form.form_value(), json!({ "kind": "a", "count": 1 }));

        form.set_value_at("/kind", json!("b")).unwrap();
        assert_eq!(form.node(form.root()).unwrap().selected_branch(), Some(1));
        assert!(form.find("/label").is_some());
    }

    #[test]
    fn shared_field_keeps_value_across_switch() {
        let mut form = FormTree::new(kinds(json!({ "type": "number" }))).unwrap();
        let count = form.find("/count").unwrap();
        form.set_value(count, json!(9));

        form.set_value_at("/kind", json!("b")).unwrap();
        assert_eq!(form.find("/count"), Some(count));
        assert_eq!(
            form.form_value(),
            json!({ "kind": "b", "count": 9, "label": "x" })
        );

        form.set_value_at("/kind", json!("a")).unwrap();
        assert!(form.find("/label").is_none());
        assert_eq!(form.form_value(), json!({ "kind": "a", "count": 9 }));
    }

    #[test]
    fn changed_field_type_resets_to_default() {
        let mut form =
            FormTree::new(kinds(json!({ "type": "string", "default": "none" }))).unwrap();
        form.set_value_at("/count", json!(9)).unwrap();
        form.set_value_at("/kind", json!("b")).unwrap();
        assert_eq!(form.value(form.find("/count").unwrap()), Some(json!("none")));
    }

    #[test]
    fn written_values_seed_new_fields() {
        let mut form = FormTree::new(kinds(json!({ "type": "number" }))).unwrap();
        form.set_value(form.root(), json!({ "kind": "b", "label": "hello" }));
        assert_eq!(form.value(form.find("/label").unwrap()), Some(json!("hello")));
    }

    #[test]
    fn discriminator_selects_branch() {
        let schema = json!({
            "type": "object",
            "properties": { "type": { "type": "string" } },
            "oneOf": [
                { "properties": { "type": { "const": "person" }, "name": { "type": "string" } } },
                { "properties": { "type": { "const": "company" }, "vat": { "type": "string" } } }
            ]
        });
        let mut form = FormTree::builder(schema)
            .value(json!({ "type": "company", "vat": "NL1" }))
            .build()
            .unwrap();
        assert_eq!(form.node(form.root()).unwrap().selected_branch(), Some(1));
        assert_eq!(form.form_value(), json!({ "type": "company", "vat": "NL1" }));

        form.set_value_at("/type", json!("person")).unwrap();
        assert_eq!(form.node(form.root()).unwrap().selected_branch(), Some(0));
        assert!(form.find("/vat").is_none());
        assert!(form.find("/name").is_some());
    }

    #[test]
    fn if_then_else() {
        let schema = json!({
            "type": "object",
            "properties": { "country": { "type": "string", "default": "NL" } },
            "if": { "properties": { "country": { "const": "US" } } },
            "then": { "properties": { "state": { "type": "string" } } },
            "else": { "properties": { "postcode": { "type": "string" } } }
        });
        let mut form = FormTree::new(schema).unwrap();
        assert!(form.find("/postcode").is_some());
        assert!(form.find("/state").is_none());

        form.set_value_at("/country", json!("US")).unwrap();
        assert!(form.find("/state").is_some());
        assert!(form.find("/postcode").is_none());
    }

    #[test]
    fn dependents_rewire_to_new_fields() {
        let schema = json!({
            "type": "object",
            "properties": {
                "kind": { "type": "string", "default": "a" },
                "echo": { "type": "string", "&derived": "../detail/label" },
                "detail": {
                    "type": "object",
                    "properties": { "mode": { "type": "string" } },
                    "oneOf": [
                        { "&if": "#/kind === 'a'", "properties": {} },
                        { "&if": "#/kind === 'b'", "properties": { "label": { "type": "string", "default": "B" } } }
                    ]
                }
            }
        });
        let mut form = FormTree::new(schema).unwrap();
        let echo = form.find("/echo").unwrap();
        assert_eq!(form.value(echo), Some(json!(null)));

        form.set_value_at("/kind", json!("b")).unwrap();
        assert_eq!(form.value(echo), Some(json!("B")));
    }
}

// === Virtual Nodes ===

mod virtual_nodes {
    use super::*;

    fn range() -> FormTree {
        FormTree::builder(json!({
            "type": "object",
            "properties": {
                "start": { "type": "string" },
                "end": { "type": "string" }
            },
            "virtual": { "range": { "fields": ["start", "end"] } }
        }))
        .value(json!({ "start": "mon" }))
        .build()
        .unwrap()
    }

    #[test]
    fn reads_project_fields() {
        let form = range();
        let range_node = form.find("/range").unwrap();
        assert_eq!(form.value(range_node), Some(json!(["mon", null])));
        assert_eq!(form.form_value(), json!({ "start": "mon" }));
    }

    #[test]
    fn writes_distribute_to_fields() {
        let mut form = range();
        let range_node = form.find("/range").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        form.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        form.set_value(range_node, json!(["tue", "fri"]));
        assert_eq!(form.form_value(), json!({ "start": "tue", "end": "fri" }));
        assert!(seen.borrow().iter().any(
            |e| matches!(e, FormEvent::ValueChanged { node, .. } if *node == range_node)
        ));
    }

    #[test]
    fn reset_restores_field_defaults() {
        let mut form = FormTree::new(json!({
            "type": "object",
            "properties": {
                "s": { "type": "string", "default": "S" },
                "e": { "type": "string", "default": "E" }
            },
            "virtual": { "r": { "fields": ["s", "e"] } }
        }))
        .unwrap();
        let s = form.find("/s").unwrap();
        form.set_value(s, json!("x"));
        assert!(form.node(s).unwrap().state().contains(NodeState::DIRTY));

        let r = form.find("/r").unwrap();
        form.reset_subtree(r);
        assert_eq!(form.form_value(), json!({ "s": "S", "e": "E" }));
        assert_eq!(form.value(r), Some(json!(["S", "E"])));
        assert!(form.node(s).unwrap().state().is_empty());
    }
}

// === Injection ===

mod injection {
    use super::*;

    #[test]
    fn chained_injection() {
        let mut form = FormTree::builder(numbers(&["a", "b", "c"]))
            .inject_to("/a", inject("../b", 1))
            .inject_to("/b", inject("../c", 1))
            .build()
            .unwrap();
        form.set_value_at("/a", json!(1)).unwrap();
        assert_eq!(form.form_value(), json!({ "a": 1, "b": 2, "c": 3 }));
    }

    fn counted(
        target: &'static str,
        calls: &Rc<Cell<usize>>,
    ) -> impl Fn(&Value) -> Option<Map<String, Value>> {
        let calls = Rc::clone(calls);
        let handler = inject(target, 1);
        move |value: &Value| {
            calls.set(calls.get() + 1);
            handler(value)
        }
    }

    #[test]
    fn mutual_cycle_terminates() {
        let a_calls = Rc::new(Cell::new(0));
        let b_calls = Rc::new(Cell::new(0));
        let mut form = FormTree::builder(numbers(&["a", "b"]))
            .inject_to("/a", counted("../b", &a_calls))
            .inject_to("/b", counted("../a", &b_calls))
            .build()
            .unwrap();
        form.set_value_at("/a", json!(1)).unwrap();
        assert_eq!(form.form_value(), json!({ "a": 1, "b": 2 }));
        assert_eq!((a_calls.get(), b_calls.get()), (1, 1));

        form.set_value_at("/b", json!(10)).unwrap();
        assert_eq!(form.form_value(), json!({ "a": 11, "b": 10 }));
        assert_eq!((a_calls.get(), b_calls.get()), (2, 2));
    }

    #[test]
    fn transitive_cycle_terminates() {
        let mut form = FormTree::builder(numbers(&["a", "b", "c"]))
            .inject_to("/a", inject("../b", 1))
            .inject_to("/b", inject("../c", 1))
            .inject_to("/c", inject("#/a", 1))
            .build()
            .unwrap();
        form.set_value_at("/a", json!(1)).unwrap();
        assert_eq!(form.form_value(), json!({ "a": 1, "b": 2, "c": 3 }));
    }

    #[test]
    fn last_source_wins() {
        let mut form = FormTree::builder(numbers(&["x", "y", "t"]))
            .inject_to("/x", inject("../t", 0))
            .inject_to("/y", inject("../t", 0))
            .build()
            .unwrap();
        form.set_value(form.root(), json!({ "x": 1, "y": 2 }));
        assert_eq!(form.value(form.find("/t").unwrap()), Some(json!(2)));
    }

    #[test]
    fn wildcard_sources_and_injected_dirty() {
        let mut form = FormTree::builder(json!({
            "type": "object",
            "properties": {
                "rows": { "type": "array", "items": { "type": "number" } },
                "last": { "type": "number" }
            }
        }))
        .build()
        .unwrap();
        form.inject_to("/rows/*", inject("#/last", 0));

        let rows = form.find("/rows").unwrap();
        form.push(rows, Some(json!(1))).unwrap();
        form.update(rows, 0, json!(8)).unwrap();

        let last = form.find("/last").unwrap();
        assert_eq!(form.value(last), Some(json!(8)));
        assert!(form.node(last).unwrap().state().contains(NodeState::DIRTY));
    }
}

// === Interaction State ===

mod state {
    use super::*;

    fn profile() -> FormTree {
        FormTree::builder(json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "default": "anon", "minLength": 3 },
                "tags": {
                    "type": "array",
                    "items": { "type": "string", "default": "t" },
                    "minItems": 1
                }
            }
        }))
        .options(FormOptions::new().show_error(ShowErrorPolicy::Touched))
        .build()
        .unwrap()
    }

    #[test]
    fn min_items_are_padded_with_defaults() {
        let form = profile();
        assert_eq!(form.form_value(), json!({ "name": "anon", "tags": ["t"] }));
    }

    #[test]
    fn dirty_is_sticky_until_reset() {
        let mut form = profile();
        let name = form.find("/name").unwrap();
        form.set_value(name, json!("bob"));
        form.set_value(name, json!("anon"));
        assert!(form.node(name).unwrap().state().contains(NodeState::DIRTY));

        form.reset_subtree(name);
        assert!(form.node(name).unwrap().state().is_empty());
        assert_eq!(form.value(name), Some(json!("anon")));
    }

    #[test]
    fn reset_restores_defaults() {
        let mut form = profile();
        let tags = form.find("/tags").unwrap();
        form.set_value(tags, json!(["a", "b", "c"]));
        form.set_value_at("/name", json!("zed")).unwrap();
        form.blur(tags);

        form.reset();
        assert_eq!(form.form_value(), json!({ "name": "anon", "tags": ["t"] }));
        assert!(form.global_state().is_empty());
    }

    #[test]
    fn reset_nested_object_keeps_siblings() {
        let mut form = FormTree::new(json!({
            "type": "object",
            "properties": {
                "x": { "type": "number", "default": 1 },
                "g": {
                    "type": "object",
                    "properties": {
                        "a": { "type": "string", "default": "A" },
                        "b": { "type": "number", "default": 2 }
                    }
                }
            }
        }))
        .unwrap();
        form.set_value_at("/x", json!(5)).unwrap();
        form.set_value_at("/g/a", json!("z")).unwrap();
        form.set_value_at("/g/b", json!(7)).unwrap();

        let g = form.find("/g").unwrap();
        form.reset_subtree(g);
        assert_eq!(form.form_value(), json!({ "x": 5, "g": { "a": "A", "b": 2 } }));
        let x = form.find("/x").unwrap();
        assert!(form.node(x).unwrap().state().contains(NodeState::DIRTY));
        let a = form.find("/g/a").unwrap();
        assert!(form.node(a).unwrap().state().is_empty());
    }

    #[test]
    fn removed_items_leave_global_state() {
        let mut form = FormTree::new(json!({
            "type": "object",
            "properties": {
                "tags": { "type": "array", "items": { "type": "string" } }
            }
        }))
        .unwrap();
        let tags = form.find("/tags").unwrap();
        form.push(tags, Some(json!("a"))).unwrap();
        form.push(tags, Some(json!("b"))).unwrap();
        form.clear_subtree_state(form.root());

        let item = form.find("/tags/1").unwrap();
        form.blur(item);
        assert!(form.global_state().contains(NodeState::TOUCHED));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        form.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        form.remove(tags, 1).unwrap();
        assert!(!form.global_state().contains(NodeState::TOUCHED));
        assert!(seen.borrow().iter().any(|e| matches!(
            e,
            FormEvent::GlobalStateChanged { state } if !state.contains(NodeState::TOUCHED)
        )));
    }

    #[test]
    fn blur_and_show_error_policy() {
        let mut form = profile();
        let name = form.find("/name").unwrap();
        assert!(!form.show_error(name));
        form.blur(name);
        assert!(form.node(name).unwrap().state().contains(NodeState::TOUCHED));
        assert!(form.show_error(name));

        let tags = form.find("/tags").unwrap();
        form.set_state(tags, NodeState::SHOW_ERROR);
        assert!(form.show_error(tags));
    }

    #[test]
    fn subtree_state_operations() {
        let mut form = profile();
        let custom = NodeState::from_bits_retain(1 << 8);
        form.set_subtree_state(form.root(), NodeState::TOUCHED | custom);
        let item = form.find("/tags/0").unwrap();
        assert!(form.node(item).unwrap().state().contains(custom));
        assert!(form.global_state().contains(NodeState::TOUCHED | custom));

        form.clear_subtree_state(form.root());
        assert!(form.global_state().is_empty());
        assert_eq!(form.form_value(), json!({ "name": "anon", "tags": ["t"] }));
    }

    #[test]
    fn commit_moves_the_baseline() {
        let mut form = profile();
        let name = form.find("/name").unwrap();
        form.set_value(name, json!("bob"));
        form.commit(form.root());
        form.clear_state(name);
        form.set_value(name, json!("bob"));
        assert!(form.node(name).unwrap().state().is_empty());
    }
}

// === Validation ===

mod validation {
    use super::*;

    #[test]
    fn on_change_validation_attaches_errors() {
        let mut form = FormTree::builder(json!({
            "type": "object",
            "properties": { "name": { "type": "string", "minLength": 3 } }
        }))
        .options(FormOptions::new().validation(ValidationMode::OnChange))
        .build()
        .unwrap();
        let name = form.find("/name").unwrap();

        form.set_value(name, json!("ab"));
        assert_eq!(form.node(name).unwrap().errors()[0].keyword, "minLength");

        form.set_value(name, json!("abc"));
        assert!(form.node(name).unwrap().errors().is_empty());
    }

    #[test]
    fn inactive_required_field_is_not_reported() {
        let mut form = FormTree::new(json!({
            "type": "object",
            "properties": {
                "wants": { "type": "boolean", "default": false },
                "email": { "type": "string", "&active": "../wants" }
            },
            "required": ["email"]
        }))
        .unwrap();
        assert!(form.validate().unwrap().is_empty());

        form.set_value_at("/wants", json!(true)).unwrap();
        let errors = form.validate().unwrap();
        assert_eq!(errors.len(), 1);
        let email = form.find("/email").unwrap();
        assert_eq!(form.node(email).unwrap().errors()[0].keyword, "required");
    }

    #[test]
    fn validate_node_only_touches_subtree() {
        let mut form = FormTree::builder(json!({
            "type": "object",
            "properties": {
                "a": { "type": "string", "minLength": 2 },
                "b": { "type": "string", "minLength": 2 }
            }
        }))
        .value(json!({ "a": "x", "b": "y" }))
        .build()
        .unwrap();
        let a = form.find("/a").unwrap();
        let b = form.find("/b").unwrap();

        let errors = form.validate_node(a).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].instance_path, "/a");
        assert!(form.node(b).unwrap().errors().is_empty());
    }

    #[test]
    fn custom_validator() {
        let mut form = FormTree::builder(numbers(&["n"]))
            .validator(|_: &Value, value: &Value| {
                if value.get("n").is_some() {
                    Vec::new()
                } else {
                    vec![JsonSchemaError {
                        keyword: "custom".into(),
                        instance_path: String::new(),
                        schema_path: String::new(),
                        params: json!({}),
                        message: "n is needed".into(),
                    }]
                }
            })
            .build()
            .unwrap();
        assert_eq!(form.validate().unwrap().len(), 1);
        form.set_value_at("/n", json!(1)).unwrap();
        assert!(form.validate().unwrap().is_empty());
    }
}
