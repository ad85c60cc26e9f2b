//! Control-flow operators
//!
//! Loops consume the loop signals raised by their body: `Flow::Break` ends
//! the loop normally and `Flow::Continue` starts the next iteration. Signals
//! raised anywhere else (a WHILE condition, an EVAL outside any loop) are
//! returned unchanged to whoever called the operator.
//!
//! # Budgets
//!
//! WHILE, UNTIL and FOR carry an optional wall-clock budget. A positive
//! per-operator budget wins; otherwise the stack's `loop_max_duration_ms`
//! attribute applies. Zero or negative means unbounded. The budget is
//! checked before every iteration, so a single body run is never
//! interrupted. Elapsed time comes from [`Instant`], never from the stack's
//! time source.

use std::sync::Arc;
use std::time::Instant;
use tessel_core::{Builtin, Flow, Macro, Operator, Registry, ScriptError, Stack, Value};

/// Register the control operators, with `loop_max_ms` as the per-operator
/// budget of the loops (`<= 0` defers to the stack attribute)
pub fn register(registry: &mut Registry, loop_max_ms: i64) {
    registry
        .register(While::new("WHILE", loop_max_ms))
        .register(Until::new("UNTIL", loop_max_ms))
        .register(For::new("FOR", loop_max_ms))
        .register_builtins(&[
            Builtin::new("BREAK", brk),
            Builtin::new("CONTINUE", cont),
            Builtin::new("EVAL", eval),
            Builtin::new("IFT", ift),
            Builtin::new("IFTE", ifte),
        ]);
}

/// Wall-clock budget of one loop operator invocation
struct Budget<'a> {
    op: &'a str,
    limit_ms: i64,
    start: Instant,
}

impl<'a> Budget<'a> {
    fn start(op: &'a str, override_ms: i64, stack: &Stack) -> Self {
        let limit_ms = if override_ms > 0 {
            override_ms
        } else {
            stack.attributes().loop_max_duration_ms()
        };
        Self {
            op,
            limit_ms,
            start: Instant::now(),
        }
    }

    fn check(&self) -> Result<(), ScriptError> {
        if self.limit_ms > 0 && self.start.elapsed().as_millis() > self.limit_ms as u128 {
            return Err(ScriptError::Timeout {
                op: self.op.to_string(),
                budget_ms: self.limit_ms,
            });
        }
        Ok(())
    }
}

/// Outcome of one loop body run
enum Body {
    Next,
    Stop,
}

fn run_body(stack: &mut Stack, body: &Macro) -> Result<Body, ScriptError> {
    match stack.exec(body)? {
        Flow::Break => Ok(Body::Stop),
        Flow::Proceed | Flow::Continue => Ok(Body::Next),
    }
}

/// Pop the two macros a loop takes: (second, top)
fn pop_two_macros(
    op: &str,
    stack: &mut Stack,
) -> Result<(Arc<Macro>, Arc<Macro>), ScriptError> {
    let top = stack.pop(op)?;
    let second = stack.pop(op)?;
    match (second, top) {
        (Value::Macro(second), Value::Macro(top)) => Ok((second, top)),
        _ => Err(ScriptError::type_error(
            op,
            "expects two macros on top of the stack.",
        )),
    }
}

fn pop_macro(op: &str, stack: &mut Stack) -> Result<Arc<Macro>, ScriptError> {
    match stack.pop(op)? {
        Value::Macro(m) => Ok(m),
        other => Err(ScriptError::type_error(
            op,
            format!("expects a macro, found {}.", other.type_name()),
        )),
    }
}

fn pop_bool(op: &str, stack: &mut Stack, message: &str) -> Result<bool, ScriptError> {
    match stack.pop(op)? {
        Value::Bool(b) => Ok(b),
        _ => Err(ScriptError::type_error(op, message)),
    }
}

/// Bounded conditional loop
///
/// Stack effect: ( condition-macro run-macro -- )
///
/// The condition runs first and must leave a boolean; while it is true the
/// run macro executes.
pub struct While {
    name: &'static str,
    max_time_ms: i64,
}

impl While {
    pub fn new(name: &'static str, max_time_ms: i64) -> Self {
        Self { name, max_time_ms }
    }
}

impl Operator for While {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut Stack) -> Result<Flow, ScriptError> {
        let (condition, run) = pop_two_macros(self.name, stack)?;
        let budget = Budget::start(self.name, self.max_time_ms, stack);

        loop {
            budget.check()?;

            let flow = stack.exec(&condition)?;
            if flow != Flow::Proceed {
                return Ok(flow);
            }
            let go = pop_bool(
                self.name,
                stack,
                "expects its 'WHILE' macro to leave a boolean on top of the stack.",
            )?;
            if !go {
                break;
            }

            if let Body::Stop = run_body(stack, &run)? {
                break;
            }
        }
        Ok(Flow::Proceed)
    }
}

/// Do/while loop: the run macro executes first, then the condition; the
/// loop stops once the condition is true
///
/// Stack effect: ( run-macro condition-macro -- )
pub struct Until {
    name: &'static str,
    max_time_ms: i64,
}

impl Until {
    pub fn new(name: &'static str, max_time_ms: i64) -> Self {
        Self { name, max_time_ms }
    }
}

impl Operator for Until {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut Stack) -> Result<Flow, ScriptError> {
        let (run, condition) = pop_two_macros(self.name, stack)?;
        let budget = Budget::start(self.name, self.max_time_ms, stack);

        loop {
            budget.check()?;

            if let Body::Stop = run_body(stack, &run)? {
                break;
            }

            let flow = stack.exec(&condition)?;
            if flow != Flow::Proceed {
                return Ok(flow);
            }
            let done = pop_bool(
                self.name,
                stack,
                "expects its 'UNTIL' macro to leave a boolean on top of the stack.",
            )?;
            if done {
                break;
            }
        }
        Ok(Flow::Proceed)
    }
}

/// Counted loop over `from..=to` (descending when `from > to`), pushing the
/// index before each body run
///
/// Stack effect: ( from to macro -- )
pub struct For {
    name: &'static str,
    max_time_ms: i64,
}

impl For {
    pub fn new(name: &'static str, max_time_ms: i64) -> Self {
        Self { name, max_time_ms }
    }
}

impl Operator for For {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, stack: &mut Stack) -> Result<Flow, ScriptError> {
        let body = pop_macro(self.name, stack)?;
        let to = stack.pop(self.name)?;
        let from = stack.pop(self.name)?;
        let (from, to) = match (from, to) {
            (Value::Int(from), Value::Int(to)) => (from, to),
            _ => {
                return Err(ScriptError::type_error(
                    self.name,
                    "expects two integer bounds below the macro.",
                ));
            }
        };

        let step: i64 = if from <= to { 1 } else { -1 };
        let budget = Budget::start(self.name, self.max_time_ms, stack);
        let mut i = from;
        loop {
            budget.check()?;
            stack.push(Value::Int(i))?;
            if let Body::Stop = run_body(stack, &body)? {
                break;
            }
            if i == to {
                break;
            }
            i += step;
        }
        Ok(Flow::Proceed)
    }
}

/// Stack effect: ( -- ) raises the break signal
fn brk(_name: &str, _stack: &mut Stack) -> Result<Flow, ScriptError> {
    Ok(Flow::Break)
}

/// Stack effect: ( -- ) raises the continue signal
fn cont(_name: &str, _stack: &mut Stack) -> Result<Flow, ScriptError> {
    Ok(Flow::Continue)
}

/// Stack effect: ( macro -- ... )
fn eval(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let m = pop_macro(name, stack)?;
    stack.exec(&m)
}

/// Stack effect: ( bool then-macro -- ... )
fn ift(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let then = pop_macro(name, stack)?;
    let cond = pop_bool(name, stack, "expects a boolean below the macro.")?;
    if cond {
        stack.exec(&then)
    } else {
        Ok(Flow::Proceed)
    }
}

/// Stack effect: ( bool then-macro else-macro -- ... )
fn ifte(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let (then, otherwise) = pop_two_macros(name, stack)?;
    let cond = pop_bool(name, stack, "expects a boolean below the two macros.")?;
    if cond {
        stack.exec(&then)
    } else {
        stack.exec(&otherwise)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_stack;
    use tessel_core::{ErrorKind, Flow, ScriptError, Value, read};

    #[test]
    fn test_while_false_condition_never_runs_body() {
        let mut stack = test_stack();
        stack
            .exec_script("0 'n' STORE <% $n 1 + 'n' STORE false %> <% 'ran' %> WHILE")
            .unwrap();
        assert!(stack.is_empty());
        assert_eq!(stack.load("n"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_while_counts_up() {
        let mut stack = test_stack();
        stack
            .exec_script("0 <% DUP 5 < %> <% 1 + %> WHILE")
            .unwrap();
        assert_eq!(stack.values(), &[Value::Int(5)]);
    }

    #[test]
    fn test_while_continue_skips_rest_of_body() {
        let mut stack = test_stack();
        stack
            .exec_script(
                "0 'i' STORE 0 'odd' STORE \
                 <% $i 6 < %> \
                 <% $i 1 + 'i' STORE  $i 2 / 2 * $i == <% CONTINUE %> IFT  $odd 1 + 'odd' STORE %> \
                 WHILE",
            )
            .unwrap_or_else(|e| panic!("{}", e));
        assert_eq!(stack.load("odd"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_while_shape_errors() {
        let mut stack = test_stack();
        let err = stack.exec_script("1 <% %> WHILE").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert_eq!(
            err.to_string(),
            "WHILE expects two macros on top of the stack."
        );

        let err = stack.exec_script("<% 1 %> <% %> WHILE").unwrap_err();
        assert_eq!(
            err.to_string(),
            "WHILE expects its 'WHILE' macro to leave a boolean on top of the stack."
        );
    }

    #[test]
    fn test_while_body_error_propagates_with_partial_stack() {
        let mut stack = test_stack();
        let err = stack
            .exec_script("<% true %> <% 'partial' NOPE %> WHILE")
            .unwrap_err();
        assert!(matches!(err, ScriptError::UnknownOperator(_)));
        assert_eq!(stack.values(), &[Value::text("partial")]);
    }

    #[test]
    fn test_signal_in_condition_escapes_the_loop() {
        let mut stack = test_stack();
        let program = read("<% BREAK %> <% %> WHILE 'after'").unwrap();
        assert_eq!(stack.exec(&program).unwrap(), Flow::Break);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_until_runs_body_first() {
        let mut stack = test_stack();
        stack.exec_script("0 <% 1 + %> <% DUP 3 > %> UNTIL").unwrap();
        assert_eq!(stack.values(), &[Value::Int(4)]);

        stack.exec_script("CLEAR 10 <% 1 + %> <% true %> UNTIL").unwrap();
        assert_eq!(stack.values(), &[Value::Int(11)]);
    }

    #[test]
    fn test_for_ascending_descending_and_break() {
        let mut stack = test_stack();
        stack.exec_script("1 3 <% %> FOR").unwrap();
        assert_eq!(
            stack.values(),
            &[Value::Int(1), Value::Int(2), Value::Int(3)]
        );

        stack.exec_script("CLEAR 2 0 <% %> FOR").unwrap();
        assert_eq!(
            stack.values(),
            &[Value::Int(2), Value::Int(1), Value::Int(0)]
        );

        stack
            .exec_script("CLEAR 0 100 <% DUP 2 == <% BREAK %> IFT %> FOR")
            .unwrap();
        assert_eq!(
            stack.values(),
            &[Value::Int(0), Value::Int(1), Value::Int(2)]
        );

        assert!(stack.exec_script("'a' 2 <% %> FOR").is_err());
    }

    #[test]
    fn test_eval_and_conditionals() {
        let mut stack = test_stack();
        stack
            .exec_script("<% 1 2 + %> EVAL true <% 'yes' %> IFT false <% 'no' %> IFT")
            .unwrap();
        assert_eq!(stack.values(), &[Value::Int(3), Value::text("yes")]);

        stack
            .exec_script("CLEAR false <% 'then' %> <% 'else' %> IFTE")
            .unwrap();
        assert_eq!(stack.values(), &[Value::text("else")]);

        let err = stack.exec_script("1 <% %> IFT").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn test_eval_propagates_signals() {
        let mut stack = test_stack();
        let err = stack.exec_script("<% BREAK %> EVAL").unwrap_err();
        assert!(matches!(err, ScriptError::SignalEscaped("BREAK")));
    }
}
