//! Stack and execution engine
//!
//! A [`Stack`] is the whole state of one interpreter instance: the LIFO value
//! sequence, the binding table, the attributes operators and the host read
//! (budgets, counters), the operator registry and the capability handles.
//! One stack per script execution, owned by the thread running it.
//!
//! # Loop signals
//!
//! `exec` returns `Result<Flow, ScriptError>`. Break and continue are `Ok`
//! values, so `?` forwards errors without ever touching a signal, and a
//! signal can never be swallowed by code that handles errors. A loop
//! operator consumes the signals raised by its body; anything reaching the
//! top level is reported by [`Stack::exec_top`] as misuse.

use crate::capabilities::Capabilities;
use crate::context::StackContext;
use crate::error::ScriptError;
use crate::macros::{Macro, Step};
use crate::reader;
use crate::registry::Registry;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of executing a step or a macro
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Carry on with the next step
    Proceed,
    /// Leave the innermost loop
    Break,
    /// Start the next iteration of the innermost loop
    Continue,
}

/// Execution budgets. Zero (or a negative loop duration) means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    /// Ambient wall-clock budget for loop operators, in milliseconds
    pub loop_max_duration_ms: i64,
    /// Maximum number of executed steps
    pub max_ops: u64,
    /// Maximum number of values on the stack
    pub max_depth: usize,
}

/// Named attributes of a stack: budgets and counters
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    pub limits: Limits,
    ops: u64,
    fetch_count: Arc<AtomicU64>,
}

impl Attributes {
    pub fn loop_max_duration_ms(&self) -> i64 {
        self.limits.loop_max_duration_ms
    }

    /// Steps executed so far
    pub fn ops(&self) -> u64 {
        self.ops
    }

    /// Samples fetched from storage so far
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Shared handle on the fetch counter (readable after the stack is gone)
    pub fn fetch_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.fetch_count)
    }

    pub fn record_fetch(&self, count: u64) {
        self.fetch_count.fetch_add(count, Ordering::Relaxed);
    }
}

/// Interpreter state for one execution
pub struct Stack {
    values: Vec<Value>,
    bindings: HashMap<String, Value>,
    marks: Vec<usize>,
    attributes: Attributes,
    registry: Arc<Registry>,
    capabilities: Capabilities,
}

impl Stack {
    pub fn new(registry: Arc<Registry>, capabilities: Capabilities, limits: Limits) -> Self {
        Self {
            values: Vec::new(),
            bindings: HashMap::new(),
            marks: Vec::new(),
            attributes: Attributes {
                limits,
                ..Attributes::default()
            },
            registry,
            capabilities,
        }
    }

    /// Unbounded stack with in-memory capabilities
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self::new(registry, Capabilities::default(), Limits::default())
    }

    // ---------------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------------

    pub fn push(&mut self, value: Value) -> Result<(), ScriptError> {
        let max = self.attributes.limits.max_depth;
        if max > 0 && self.values.len() >= max {
            return Err(ScriptError::LimitExceeded(format!(
                "Stack depth limit ({}) reached.",
                max
            )));
        }
        self.values.push(value);
        Ok(())
    }

    /// Pop the top value; `op` names the caller on underflow
    pub fn pop(&mut self, op: &str) -> Result<Value, ScriptError> {
        self.values.pop().ok_or_else(|| ScriptError::Underflow {
            op: op.to_string(),
        })
    }

    pub fn peek(&self) -> Option<&Value> {
        self.values.last()
    }

    pub fn depth(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Contents, bottom first
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.marks.clear();
    }

    /// Remember the current depth (list and map constructors)
    pub fn mark(&mut self) {
        self.marks.push(self.values.len());
    }

    /// Pop the innermost mark and every value pushed since
    pub fn take_since_mark(&mut self, op: &str) -> Result<Vec<Value>, ScriptError> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| ScriptError::failed(format!("{} without a matching opening mark.", op)))?;
        if mark > self.values.len() {
            return Err(ScriptError::failed(format!(
                "{} found values consumed below its opening mark.",
                op
            )));
        }
        Ok(self.values.split_off(mark))
    }

    // ---------------------------------------------------------------------
    // Bindings
    // ---------------------------------------------------------------------

    pub fn store(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn load(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn bindings(&self) -> &HashMap<String, Value> {
        &self.bindings
    }

    // ---------------------------------------------------------------------
    // Contexts
    // ---------------------------------------------------------------------

    /// Snapshot bindings and contents
    pub fn save(&self) -> StackContext {
        StackContext::new(self.bindings.clone(), self.values.clone())
    }

    /// Replace bindings and contents with a snapshot
    pub fn restore(&mut self, context: &StackContext) {
        self.bindings = context.bindings.clone();
        self.values = context.values.clone();
        self.marks.clear();
    }

    // ---------------------------------------------------------------------
    // Attributes and handles
    // ---------------------------------------------------------------------

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    /// Run every step of `program` in order
    ///
    /// Errors propagate unchanged. A `Break` or `Continue` raised by a step
    /// stops the macro and is returned to the caller untouched.
    pub fn exec(&mut self, program: &Macro) -> Result<Flow, ScriptError> {
        for step in program.steps() {
            self.count_op()?;
            let flow = match step {
                Step::Literal(value) => {
                    self.push(value.clone())?;
                    Flow::Proceed
                }
                Step::Macro(m) => {
                    self.push(Value::Macro(Arc::clone(m)))?;
                    Flow::Proceed
                }
                Step::Call(name) => self.call(name)?,
                Step::Load(name) => {
                    let value = self
                        .load(name)
                        .cloned()
                        .ok_or_else(|| ScriptError::UnboundSymbol(name.clone()))?;
                    self.push(value)?;
                    Flow::Proceed
                }
                Step::Run(name) => match self.load(name) {
                    Some(Value::Macro(m)) => {
                        let m = Arc::clone(m);
                        self.exec(&m)?
                    }
                    Some(other) => {
                        return Err(ScriptError::type_error(
                            &format!("@{}", name),
                            format!("expects a macro, found {}.", other.type_name()),
                        ));
                    }
                    None => return Err(ScriptError::UnboundSymbol(name.clone())),
                },
            };
            if flow != Flow::Proceed {
                return Ok(flow);
            }
        }
        Ok(Flow::Proceed)
    }

    /// Apply the operator registered under `name`
    pub fn call(&mut self, name: &str) -> Result<Flow, ScriptError> {
        let op = self
            .registry
            .get(name)
            .ok_or_else(|| ScriptError::UnknownOperator(name.to_string()))?;
        op.apply(self)
    }

    /// Run a macro as a whole program: loop signals may not escape it
    pub fn exec_top(&mut self, program: &Macro) -> Result<(), ScriptError> {
        match self.exec(program)? {
            Flow::Proceed => Ok(()),
            Flow::Break => Err(ScriptError::SignalEscaped("BREAK")),
            Flow::Continue => Err(ScriptError::SignalEscaped("CONTINUE")),
        }
    }

    /// Read script text and run it as a whole program
    pub fn exec_script(&mut self, source: &str) -> Result<(), ScriptError> {
        let program = reader::read(source)?;
        self.exec_top(&program)
    }

    fn count_op(&mut self) -> Result<(), ScriptError> {
        self.attributes.ops += 1;
        let max = self.attributes.limits.max_ops;
        if max > 0 && self.attributes.ops > max {
            return Err(ScriptError::LimitExceeded(format!(
                "Operation count exceeded maximum ({}).",
                max
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("values", &self.values)
            .field("bindings", &self.bindings.len())
            .field("attributes", &self.attributes)
            .finish()
    }
}
