//! Operator registry
//!
//! Operators are named primitives that pop their documented arguments and
//! push their documented results. Macros refer to them by name; the name is
//! looked up in the stack's [`Registry`] each time the step runs.
//!
//! A registry is built once, then shared read-only (`Arc<Registry>`) by every
//! stack created from it.

use crate::error::ScriptError;
use crate::stack::{Flow, Stack};
use std::collections::HashMap;
use std::sync::Arc;

/// A named primitive operating on a stack
pub trait Operator: Send + Sync {
    /// Name under which scripts call this operator
    fn name(&self) -> &str;

    /// Apply to the stack. Loop signals are returned as `Ok(Flow::Break)` /
    /// `Ok(Flow::Continue)`; everything else that is not `Flow::Proceed` is
    /// an error.
    fn apply(&self, stack: &mut Stack) -> Result<Flow, ScriptError>;
}

/// Plain function implementing an operator; receives its own name for errors
pub type BuiltinFn = fn(&str, &mut Stack) -> Result<Flow, ScriptError>;

/// Operator backed by a plain function
#[derive(Clone, Copy)]
pub struct Builtin {
    name: &'static str,
    f: BuiltinFn,
}

impl Builtin {
    pub const fn new(name: &'static str, f: BuiltinFn) -> Self {
        Self { name, f }
    }
}

impl Operator for Builtin {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut Stack) -> Result<Flow, ScriptError> {
        (self.f)(self.name, stack)
    }
}

/// Name -> operator table
#[derive(Clone, Default)]
pub struct Registry {
    ops: HashMap<String, Arc<dyn Operator>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator, replacing any previous one with the same name
    pub fn register(&mut self, op: impl Operator + 'static) -> &mut Self {
        self.ops.insert(op.name().to_string(), Arc::new(op));
        self
    }

    /// Register a batch of function-backed operators
    pub fn register_builtins(&mut self, builtins: &[Builtin]) -> &mut Self {
        for b in builtins {
            self.register(*b);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.ops.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("operators", &self.names())
            .finish()
    }
}
