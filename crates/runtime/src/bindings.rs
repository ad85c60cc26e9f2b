//! Named bindings: STORE and LOAD

use tessel_core::{Builtin, Flow, Registry, ScriptError, Stack, Value};

pub fn register(registry: &mut Registry) {
    registry.register_builtins(&[Builtin::new("STORE", store), Builtin::new("LOAD", load)]);
}

fn pop_name(name: &str, stack: &mut Stack) -> Result<String, ScriptError> {
    match stack.pop(name)? {
        Value::String(s) => Ok(s.to_string()),
        other => Err(ScriptError::type_error(
            name,
            format!("expects a symbol name (STRING), found {}.", other.type_name()),
        )),
    }
}

/// Bind a value to a name, replacing any previous binding
///
/// Stack effect: ( value name -- )
fn store(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let symbol = pop_name(name, stack)?;
    let value = stack.pop(name)?;
    stack.store(symbol, value);
    Ok(Flow::Proceed)
}

/// Stack effect: ( name -- value )
fn load(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let symbol = pop_name(name, stack)?;
    let value = stack
        .load(&symbol)
        .cloned()
        .ok_or(ScriptError::UnboundSymbol(symbol))?;
    stack.push(value)?;
    Ok(Flow::Proceed)
}

#[cfg(test)]
mod tests {
    use crate::test_stack;
    use tessel_core::{ErrorKind, ScriptError, Value};

    #[test]
    fn test_store_then_load() {
        let mut stack = test_stack();
        stack.exec_script("'v' 'k' STORE 'k' LOAD $k").unwrap();
        assert_eq!(stack.values(), &[Value::text("v"), Value::text("v")]);
    }

    #[test]
    fn test_unbound_and_bad_names() {
        let mut stack = test_stack();
        assert!(matches!(
            stack.exec_script("'nope' LOAD"),
            Err(ScriptError::UnboundSymbol(_))
        ));
        let err = stack.exec_script("1 2 STORE").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }
}
