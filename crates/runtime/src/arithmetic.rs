//! Arithmetic, comparison and logic operators
//!
//! # Numeric semantics
//!
//! - Integer with integer stays integer and uses **wrapping** arithmetic:
//!   `i64::MAX 1 +` wraps to `i64::MIN`, `i64::MIN -1 /` wraps to `i64::MIN`.
//! - Any float operand promotes the operation to float (IEEE 754).
//! - Integer division by zero fails; float division follows IEEE
//!   (`1.0 0 /` is `Infinity`).
//! - `+` also concatenates two texts.

use std::cmp::Ordering;
use tessel_core::{Builtin, Flow, Registry, ScriptError, Stack, Value};

pub fn register(registry: &mut Registry) {
    registry.register_builtins(&[
        Builtin::new("+", add),
        Builtin::new("-", subtract),
        Builtin::new("*", multiply),
        Builtin::new("/", divide),
        Builtin::new("==", equals),
        Builtin::new("<", less_than),
        Builtin::new(">", greater_than),
        Builtin::new("NOT", not),
    ]);
}

fn pop_two(name: &str, stack: &mut Stack) -> Result<(Value, Value), ScriptError> {
    let b = stack.pop(name)?;
    let a = stack.pop(name)?;
    Ok((a, b))
}

/// Apply `int_op` to two integers, `float_op` to any other pair of numbers
fn numeric(
    name: &str,
    a: &Value,
    b: &Value,
    int_op: impl Fn(i64, i64) -> Result<i64, ScriptError>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value, ScriptError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => int_op(*x, *y).map(Value::Int),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Float(float_op(x, y))),
            _ => Err(ScriptError::type_error(
                name,
                format!(
                    "expects two numbers, found {} and {}.",
                    a.type_name(),
                    b.type_name()
                ),
            )),
        },
    }
}

/// Stack effect: ( a b -- a+b )
fn add(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let (a, b) = pop_two(name, stack)?;
    let result = match (&a, &b) {
        (Value::String(x), Value::String(y)) => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Value::from(s)
        }
        _ => numeric(name, &a, &b, |x, y| Ok(x.wrapping_add(y)), |x, y| x + y)?,
    };
    stack.push(result)?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( a b -- a-b )
fn subtract(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let (a, b) = pop_two(name, stack)?;
    let result = numeric(name, &a, &b, |x, y| Ok(x.wrapping_sub(y)), |x, y| x - y)?;
    stack.push(result)?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( a b -- a*b )
fn multiply(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let (a, b) = pop_two(name, stack)?;
    let result = numeric(name, &a, &b, |x, y| Ok(x.wrapping_mul(y)), |x, y| x * y)?;
    stack.push(result)?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( a b -- a/b )
fn divide(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let (a, b) = pop_two(name, stack)?;
    let result = numeric(
        name,
        &a,
        &b,
        |x, y| {
            if y == 0 {
                Err(ScriptError::failed(format!("{} division by zero.", name)))
            } else {
                Ok(x.wrapping_div(y))
            }
        },
        |x, y| x / y,
    )?;
    stack.push(result)?;
    Ok(Flow::Proceed)
}

/// Numbers compare by value across integer and float; everything else
/// structurally
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            a.as_f64() == b.as_f64()
        }
        _ => a == b,
    }
}

fn compare(name: &str, a: &Value, b: &Value) -> Result<Option<Ordering>, ScriptError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Some(x.cmp(y))),
        (Value::String(x), Value::String(y)) => Ok(Some(x.cmp(y))),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
            _ => Err(ScriptError::type_error(
                name,
                format!(
                    "can only compare two numbers or two strings, found {} and {}.",
                    a.type_name(),
                    b.type_name()
                ),
            )),
        },
    }
}

/// Stack effect: ( a b -- bool )
fn equals(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let (a, b) = pop_two(name, stack)?;
    stack.push(Value::Bool(values_equal(&a, &b)))?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( a b -- a<b )
fn less_than(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let (a, b) = pop_two(name, stack)?;
    let lt = compare(name, &a, &b)? == Some(Ordering::Less);
    stack.push(Value::Bool(lt))?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( a b -- a>b )
fn greater_than(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let (a, b) = pop_two(name, stack)?;
    let gt = compare(name, &a, &b)? == Some(Ordering::Greater);
    stack.push(Value::Bool(gt))?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( bool -- !bool )
fn not(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    match stack.pop(name)? {
        Value::Bool(b) => stack.push(Value::Bool(!b))?,
        other => {
            return Err(ScriptError::type_error(
                name,
                format!("expects a BOOLEAN, found {}.", other.type_name()),
            ));
        }
    }
    Ok(Flow::Proceed)
}
