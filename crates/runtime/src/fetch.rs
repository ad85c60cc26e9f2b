//! Storage access: FETCH
//!
//! The only operator touching the store. The selector is resolved through
//! the directory capability, then the matching series are read through the
//! store capability. Each series comes back as a map:
//!
//! ```text
//! { 'name' 'cpu' 'labels' { 'host' 'a' } 'ticks' [ 10 20 ] 'values' [ 0.5 NULL ] }
//! ```

use tessel_core::{Builtin, Flow, Registry, ScriptError, Selector, Stack, Value};
use tracing::debug;

pub fn register(registry: &mut Registry) {
    registry.register_builtins(&[Builtin::new("FETCH", fetch)]);
}

/// Stack effect: ( selector -- list )
///
/// Adds the number of samples read to the stack's fetch counter.
fn fetch(name: &str, stack: &mut Stack) -> Result<Flow, ScriptError> {
    let selector = match stack.pop(name)? {
        Value::String(s) => Selector::parse(&s)
            .map_err(|e| ScriptError::type_error(name, format!("invalid selector: {}.", e)))?,
        other => {
            return Err(ScriptError::type_error(
                name,
                format!("expects a selector STRING, found {}.", other.type_name()),
            ));
        }
    };

    let caps = stack.capabilities().clone();
    let found = caps.directory.find(&selector)?;
    let series = caps.store.fetch(&found)?;

    let samples: usize = series.iter().map(|s| s.len()).sum();
    stack.attributes().record_fetch(samples as u64);
    debug!(
        selector = %selector.name,
        series = series.len(),
        samples,
        "fetched"
    );

    let list = series.iter().map(|s| s.to_value()).collect();
    stack.push(Value::list(list))?;
    Ok(Flow::Proceed)
}
