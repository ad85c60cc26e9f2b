//! Stack context operators

use std::sync::Arc;
use tessel_core::{Builtin, Flow, Registry, ScriptError, Stack, Value};

/// Binding holding the macro `BOOTSTRAP` runs
pub const BOOTSTRAP_BINDING: &str = "bootstrap";

pub fn register(registry: &mut Registry) {
    registry.register_builtins(&[
        Builtin::new("SAVE", save),
        Builtin::new("RESTORE", restore),
        Builtin::new("BOOTSTRAP", bootstrap),
    ]);
}

/// Snapshot bindings and contents
///
/// Stack effect: ( -- context )
fn save(_name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let ctx = stack.save();
    stack.push(Value::Context(Arc::new(ctx)))?;
    Ok(Flow::Proceed)
}

/// Replace bindings and contents with a snapshot
///
/// Stack effect: ( context -- ... )
fn restore(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    match stack.pop(name)? {
        Value::Context(ctx) => {
            stack.restore(&ctx);
            Ok(Flow::Proceed)
        }
        other => Err(ScriptError::type_error(
            name,
            format!("expects a CONTEXT, found {}.", other.type_name()),
        )),
    }
}

/// Run the macro bound to `bootstrap`; nothing when unbound
///
/// Stack effect: ( -- ... )
fn bootstrap(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    match stack.load(BOOTSTRAP_BINDING) {
        None => Ok(Flow::Proceed),
        Some(Value::Macro(m)) => {
            let m = Arc::clone(m);
            stack.exec(&m)
        }
        Some(other) => Err(ScriptError::type_error(
            name,
            format!(
                "expects '{}' to be bound to a macro, found {}.",
                BOOTSTRAP_BINDING,
                other.type_name()
            ),
        )),
    }
}
