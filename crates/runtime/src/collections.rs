//! Collection operators
//!
//! Lists and maps are built between marks: `[` and `{` remember the current
//! depth, `]` and `}` gather everything pushed since.
//!
//! ```text
//! [ 1 2 3 ]            // ( -- list )
//! { 'a' 1 'b' 2 }      // ( -- map )
//! [ 10 20 ] 1 GET      // 20
//! ```

use std::collections::HashMap;
use tessel_core::{Builtin, Flow, Registry, ScriptError, Stack, Value, extract};

pub fn register(registry: &mut Registry) {
    registry.register_builtins(&[
        Builtin::new("GET", get),
        Builtin::new("[", mark),
        Builtin::new("]", close_list),
        Builtin::new("{", mark),
        Builtin::new("}", close_map),
        Builtin::new("SIZE", size),
        Builtin::new("->BYTES", to_bytes),
    ]);
}

/// Stack effect: ( container key -- value )
fn get(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let key = stack.pop(name)?;
    let container = stack.pop(name)?;
    let value = extract(name, &container, &key)?;
    stack.push(value)?;
    Ok(Flow::Proceed)
}

fn mark(_name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    stack.mark();
    Ok(Flow::Proceed)
}

/// Stack effect: ( mark v1 ... vn -- list )
fn close_list(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let items = stack.take_since_mark(name)?;
    stack.push(Value::list(items))?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( mark k1 v1 ... kn vn -- map )
fn close_map(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let items = stack.take_since_mark(name)?;
    if items.len() % 2 != 0 {
        return Err(ScriptError::type_error(
            name,
            "expects key/value pairs, found an odd number of elements.",
        ));
    }

    let mut map = HashMap::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        match key {
            Value::String(k) => {
                map.insert(k.to_string(), value);
            }
            other => {
                return Err(ScriptError::type_error(
                    name,
                    format!("expects STRING keys, found {}.", other.type_name()),
                ));
            }
        }
    }
    stack.push(Value::map(map))?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( container -- n )
///
/// Text size is counted in characters.
fn size(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let n = match stack.pop(name)? {
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        Value::Bytes(bytes) => bytes.len(),
        Value::String(s) => s.chars().count(),
        Value::Macro(m) => m.len(),
        other => {
            return Err(ScriptError::type_error(
                name,
                format!("cannot size a {}.", other.type_name()),
            ));
        }
    };
    stack.push(Value::Int(n as i64))?;
    Ok(Flow::Proceed)
}

/// UTF-8 encode text
///
/// Stack effect: ( string -- bytes )
fn to_bytes(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let bytes = match stack.pop(name)? {
        Value::String(s) => Value::bytes(s.as_bytes()),
        Value::Bytes(b) => Value::Bytes(b),
        other => {
            return Err(ScriptError::type_error(
                name,
                format!("expects a STRING, found {}.", other.type_name()),
            ));
        }
    };
    stack.push(bytes)?;
    Ok(Flow::Proceed)
}
