//! Tessel Runtime: operator library and script scheduler
//!
//! Everything that turns the bare engine of `tessel-core` into something
//! that runs stored scripts on a schedule.
//!
//! # Modules
//!
//! - Operators: `stack_ops`, `bindings`, `control`, `collections`,
//!   `arithmetic`, `context_ops`, `time_ops`, `fetch`
//! - `combinator`: N-ary series combinators (`op.div` and friends)
//! - `nonce`: run nonces wrapped under a pre-shared key
//! - `metrics`: runner metric names and sinks
//! - `bootstrap`: shared bootstrap context, reloaded periodically
//! - `pool`: bounded worker pool
//! - `scheduler`: script discovery and periodic execution
//! - `config`: runner configuration (TOML + environment)
//! - `diagnostics`: SIGQUIT schedule dump, shutdown signals
//! - `report`: at-exit report

pub mod arithmetic;
pub mod bindings;
pub mod bootstrap;
pub mod collections;
pub mod combinator;
pub mod config;
pub mod context_ops;
pub mod control;
pub mod diagnostics;
pub mod fetch;
pub mod metrics;
pub mod nonce;
pub mod pool;
pub mod report;
pub mod scheduler;
pub mod stack_ops;
pub mod time_ops;

pub use bootstrap::{BootstrapManager, BootstrapSource, FixedBootstrap, Reloader};
pub use combinator::{Arithmetic, NaryCombinator, NaryInput, combinator, combine};
pub use config::{ConfigError, RunnerConfig};
pub use metrics::{LogMetrics, MemoryMetrics, MetricPoint, MetricsSink};
pub use nonce::{AesGcmCipher, NonceCipher, NonceError, Psk};
pub use pool::{SubmitError, WorkerPool};
pub use scheduler::{RunnerError, Schedule, ScheduledScript, ScriptRunner};

use tessel_core::Registry;

/// Knobs applied while building the operator registry
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryOptions {
    /// Per-operator loop budget; `<= 0` defers to the stack attribute
    pub loop_max_duration_ms: i64,
}

/// Registry holding every built-in operator
pub fn default_registry(options: &RegistryOptions) -> Registry {
    let mut registry = Registry::new();
    stack_ops::register(&mut registry);
    bindings::register(&mut registry);
    control::register(&mut registry, options.loop_max_duration_ms);
    collections::register(&mut registry);
    arithmetic::register(&mut registry);
    context_ops::register(&mut registry);
    time_ops::register(&mut registry);
    fetch::register(&mut registry);
    registry
}

#[cfg(test)]
pub(crate) fn test_stack() -> tessel_core::Stack {
    use std::sync::Arc;
    tessel_core::Stack::new(
        Arc::new(default_registry(&RegistryOptions::default())),
        tessel_core::Capabilities::default(),
        tessel_core::Limits::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_every_group() {
        let registry = default_registry(&RegistryOptions::default());
        for name in [
            "DUP", "STORE", "WHILE", "UNTIL", "FOR", "BREAK", "GET", "SIZE", "+", "==", "SAVE",
            "BOOTSTRAP", "NOW", "SLEEP", "FETCH", "CLEAR",
        ] {
            assert!(registry.contains(name), "missing {}", name);
        }
    }
}
