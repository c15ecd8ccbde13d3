//! Injection: pushing a node's value into other nodes.
//!
//! A handler registered for a path pattern runs whenever a matching node's
//! value changes. It returns a map from target references (relative to the
//! source) to the values to write there.

use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::node::NodeId;
use crate::path::{self, Path};
use crate::tree::{FormTree, Pass, WriteOrigin};

/// Injection handler: source value in, target writes out.
pub type InjectFn = dyn Fn(&Value) -> Option<Map<String, Value>>;

pub(crate) struct Injector {
    pub(crate) pattern: Path,
    pub(crate) inject: Rc<InjectFn>,
}

impl Injector {
    pub(crate) fn new<F>(pattern: &str, inject: F) -> Self
    where
        F: Fn(&Value) -> Option<Map<String, Value>> + 'static,
    {
        Self {
            pattern: Path::parse(pattern),
            inject: Rc::new(inject),
        }
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("pattern", &self.pattern.to_pointer())
            .finish_non_exhaustive()
    }
}

impl FormTree {
    /// Registers an injection handler for every node matching `pattern`
    /// (absolute, `*` wildcards allowed).
    ///
    /// Within one pass a target is never written again by a source it
    /// already received a write from, and never while it is itself on the
    /// injection stack. This bounds mutual and transitive cycles; for
    /// different sources the last write applied wins.
    pub fn inject_to<F>(&mut self, pattern: &str, inject: F)
    where
        F: Fn(&Value) -> Option<Map<String, Value>> + 'static,
    {
        self.injectors.push(Injector::new(pattern, inject));
    }

    pub(crate) fn run_injectors(&mut self, pass: &mut Pass, source: NodeId) {
        if self.injectors.is_empty() {
            return;
        }
        let address = self.path(source);
        let handlers: Vec<Rc<InjectFn>> = self
            .injectors
            .iter()
            .filter(|i| i.pattern.matches(&address))
            .map(|i| Rc::clone(&i.inject))
            .collect();
        if handlers.is_empty() {
            return;
        }
        let value = self.value_of(source).unwrap_or(Value::Null);

        pass.chain.push(source);
        for handler in handlers {
            let Some(writes) = handler(&value) else {
                continue;
            };
            for (reference, injected) in writes {
                let targets = self.find_all(&path::resolve(&address, &reference));
                if targets.is_empty() {
                    debug!(source = %address, %reference, "injection target does not resolve");
                }
                for target in targets {
                    if pass.chain.contains(&target) {
                        debug!(source = %address, target = %self.path(target), "injection cycle suppressed");
                        continue;
                    }
                    if !pass.injected.insert((target, source)) {
                        continue;
                    }
                    self.write(pass, target, Some(injected.clone()), WriteOrigin::Injected);
                }
            }
        }
        pass.chain.pop();
    }
}
