//! Stack shuffling operators

use tessel_core::{Builtin, Flow, Registry, ScriptError, Stack, Value};

pub fn register(registry: &mut Registry) {
    registry.register_builtins(&[
        Builtin::new("DUP", dup),
        Builtin::new("DROP", drop_top),
        Builtin::new("SWAP", swap),
        Builtin::new("CLEAR", clear),
        Builtin::new("DEPTH", depth),
    ]);
}

/// Stack effect: ( a -- a a )
fn dup(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let top = stack
        .peek()
        .cloned()
        .ok_or_else(|| ScriptError::Underflow {
            op: name.to_string(),
        })?;
    stack.push(top)?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( a -- )
fn drop_top(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    stack.pop(name)?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( a b -- b a )
fn swap(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let b = stack.pop(name)?;
    let a = stack.pop(name)?;
    stack.push(b)?;
    stack.push(a)?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( ... -- )
///
/// Bindings are kept.
fn clear(_name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    stack.clear();
    Ok(Flow::Proceed)
}

/// Stack effect: ( -- n )
fn depth(_name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let n = stack.depth() as i64;
    stack.push(Value::Int(n))?;
    Ok(Flow::Proceed)
}

#[cfg(test)]
mod tests {
    use crate::test_stack;
    use tessel_core::Value;

    #[test]
    fn test_shuffles() {
        let mut stack = test_stack();
        stack.exec_script("1 2 SWAP DUP").unwrap();
        assert_eq!(
            stack.values(),
            &[Value::Int(2), Value::Int(1), Value::Int(1)]
        );
        stack.exec_script("DROP DEPTH").unwrap();
        assert_eq!(
            stack.values(),
            &[Value::Int(2), Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn test_clear_keeps_bindings() {
        let mut stack = test_stack();
        stack.exec_script("42 'x' STORE 1 2 3 CLEAR").unwrap();
        assert!(stack.is_empty());
        assert_eq!(stack.load("x"), Some(&Value::Int(42)));
    }

    #[test]
    fn test_underflow() {
        let mut stack = test_stack();
        assert!(stack.exec_script("DUP").is_err());
        assert!(stack.exec_script("1 SWAP").is_err());
    }
}
