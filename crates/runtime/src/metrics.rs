//! Runner metrics
//!
//! The scheduler reports through a [`MetricsSink`]. Sinks are infallible:
//! a metrics problem never fails a script run.
//!
//! | Name                     | Kind    | Meaning                             |
//! |--------------------------|---------|-------------------------------------|
//! | `tessel.runner.count`    | counter | attempts executed                   |
//! | `tessel.runner.current`  | gauge   | attempts currently running          |
//! | `tessel.runner.time.us`  | counter | cumulative run time, microseconds   |
//! | `tessel.runner.elapsed`  | counter | cumulative run time, nanoseconds    |
//! | `tessel.runner.ops`      | counter | operations executed                 |
//! | `tessel.runner.fetched`  | counter | samples fetched from storage        |
//! | `tessel.runner.failures` | counter | failed attempts                     |
//!
//! Every metric except `current` carries a `path` label, the script path
//! relative to the script root.

use std::collections::BTreeMap;
use std::sync::Mutex;
use tessel_core::Labels;
use tracing::debug;

pub const RUNNER_COUNT: &str = "tessel.runner.count";
pub const RUNNER_CURRENT: &str = "tessel.runner.current";
pub const RUNNER_TIME_US: &str = "tessel.runner.time.us";
pub const RUNNER_ELAPSED: &str = "tessel.runner.elapsed";
pub const RUNNER_OPS: &str = "tessel.runner.ops";
pub const RUNNER_FETCHED: &str = "tessel.runner.fetched";
pub const RUNNER_FAILURES: &str = "tessel.runner.failures";
/// Scripts currently scheduled, set after every scan
pub const RUNNER_SCRIPTS: &str = "tessel.runner.scripts";

/// Label carrying the relative script path
pub const PATH_LABEL: &str = "path";

/// Destination of runner metrics
pub trait MetricsSink: Send + Sync {
    /// Add `delta` to a counter or gauge
    fn update(&self, name: &str, labels: &Labels, delta: i64);

    /// Overwrite a value
    fn set(&self, name: &str, labels: &Labels, value: i64);
}

/// One metric value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricPoint {
    pub name: String,
    pub labels: Labels,
    pub value: i64,
}

/// In-process metrics registry
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    values: Mutex<BTreeMap<(String, Labels), i64>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value, 0 when never reported
    pub fn get(&self, name: &str, labels: &Labels) -> i64 {
        self.values
            .lock()
            .ok()
            .and_then(|values| values.get(&(name.to_string(), labels.clone())).copied())
            .unwrap_or(0)
    }

    /// Sum of a metric across all label sets
    pub fn total(&self, name: &str) -> i64 {
        self.values
            .lock()
            .map(|values| {
                values
                    .iter()
                    .filter(|((n, _), _)| n == name)
                    .map(|(_, v)| *v)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// All values, ordered by name then labels
    pub fn snapshot(&self) -> Vec<MetricPoint> {
        self.values
            .lock()
            .map(|values| {
                values
                    .iter()
                    .map(|((name, labels), value)| MetricPoint {
                        name: name.clone(),
                        labels: labels.clone(),
                        value: *value,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl MetricsSink for MemoryMetrics {
    fn update(&self, name: &str, labels: &Labels, delta: i64) {
        if let Ok(mut values) = self.values.lock() {
            let v = values
                .entry((name.to_string(), labels.clone()))
                .or_insert(0);
            *v = v.wrapping_add(delta);
        }
    }

    fn set(&self, name: &str, labels: &Labels, value: i64) {
        if let Ok(mut values) = self.values.lock() {
            values.insert((name.to_string(), labels.clone()), value);
        }
    }
}

/// Sink writing every report to the log at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn update(&self, name: &str, labels: &Labels, delta: i64) {
        debug!(metric = name, ?labels, delta, "metric update");
    }

    fn set(&self, name: &str, labels: &Labels, value: i64) {
        debug!(metric = name, ?labels, value, "metric set");
    }
}

/// Labels for a script path
pub fn path_labels(path: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert(PATH_LABEL.to_string(), path.to_string());
    labels
}
