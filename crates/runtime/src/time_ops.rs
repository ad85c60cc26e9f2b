//! Time operators
//!
//! ```text
//! NOW          // ( -- ms ) milliseconds since epoch, from the stack's time source
//! 100 SLEEP    // ( ms -- ) block the executing thread
//! ```
//!
//! `NOW` goes through the injected time source so tests can pin it.

use std::time::Duration;
use tessel_core::{Builtin, Flow, Registry, ScriptError, Stack, Value};

pub fn register(registry: &mut Registry) {
    registry.register_builtins(&[Builtin::new("NOW", now), Builtin::new("SLEEP", sleep)]);
}

/// Stack effect: ( -- ms )
fn now(_name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let ms = stack.capabilities().time.now_millis();
    stack.push(Value::Int(ms))?;
    Ok(Flow::Proceed)
}

/// Stack effect: ( ms -- )
///
/// Negative durations sleep for zero.
fn sleep(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    match stack.pop(name)? {
        Value::Int(ms) => {
            if ms > 0 {
                std::thread::sleep(Duration::from_millis(ms as u64));
            }
            Ok(Flow::Proceed)
        }
        other => Err(ScriptError::type_error(
            name,
            format!("expects a LONG duration in ms, found {}.", other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use crate::{default_registry, RegistryOptions};
    use std::sync::Arc;
    use std::time::Instant;
    use tessel_core::{Capabilities, Limits, ManualTimeSource, MemoryStore, Stack, Value};

    #[test]
    fn test_now_uses_time_source() {
        let time = Arc::new(ManualTimeSource::new(1_700_000_000_000));
        let caps = Capabilities::in_memory(Arc::new(MemoryStore::default()), time.clone());
        let mut stack = Stack::new(
            Arc::new(default_registry(&RegistryOptions::default())),
            caps,
            Limits::default(),
        );
        stack.exec_script("NOW").unwrap();
        time.advance(5);
        stack.exec_script("NOW").unwrap();
        assert_eq!(
            stack.values(),
            &[Value::Int(1_700_000_000_000), Value::Int(1_700_000_000_005)]
        );
    }

    #[test]
    fn test_sleep_blocks() {
        let mut stack = crate::test_stack();
        let start = Instant::now();
        stack.exec_script("20 SLEEP -5 SLEEP").unwrap();
        assert!(start.elapsed().as_millis() >= 20);
        assert!(stack.exec_script("'x' SLEEP").is_err());
    }
}
