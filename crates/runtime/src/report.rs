//! At-exit report for the runner
//!
//! Dumps KPIs when `serve` stops, controlled by the `TESSEL_REPORT` env var:
//! - Unset or `0` → no report
//! - `1` → human-readable to stderr
//! - `json` → JSON to stderr
//! - `json:/path` → JSON to file
//!
//! JSON output needs the `report-json` feature (enabled by default); without
//! it the human format is used.

use crate::metrics::{MemoryMetrics, MetricPoint};
use crate::pool::WorkerPool;
use crate::scheduler::Schedule;
use std::io::Write;
use std::time::Duration;

pub const ENV_REPORT: &str = "TESSEL_REPORT";

/// Output format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

/// Output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stderr,
    File(String),
}

/// Parsed report configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub destination: ReportDestination,
}

impl ReportConfig {
    /// Parse from the `TESSEL_REPORT` environment variable
    pub fn from_env() -> Option<Self> {
        let val = std::env::var(ENV_REPORT).ok()?;
        Self::parse(&val)
    }

    pub fn parse(val: &str) -> Option<Self> {
        match val {
            "" | "0" => None,
            "1" => Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            }),
            "json" => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::Stderr,
            }),
            s if s.starts_with("json:") => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::File(s[5..].to_string()),
            }),
            _ => {
                tracing::warn!("{}='{}' not recognized, ignoring", ENV_REPORT, val);
                None
            }
        }
    }
}

/// Collected figures for the report
#[derive(Debug, Clone, PartialEq)]
pub struct ReportData {
    pub wall_clock_ms: u64,
    pub scripts: usize,
    pub runs: u64,
    pub failures: u64,
    pub workers: usize,
    pub jobs_completed: u64,
    pub jobs_panicked: u64,
    pub metrics: Vec<MetricPoint>,
}

impl ReportData {
    pub fn collect(
        uptime: Duration,
        schedule: &Schedule,
        pool: &WorkerPool,
        metrics: &MemoryMetrics,
    ) -> Self {
        let scripts = schedule.snapshot();
        Self {
            wall_clock_ms: uptime.as_millis() as u64,
            scripts: scripts.len(),
            runs: scripts.iter().map(|(_, s)| s.runs).sum(),
            failures: scripts.iter().map(|(_, s)| s.failures).sum(),
            workers: pool.worker_count(),
            jobs_completed: pool.completed(),
            jobs_panicked: pool.panicked(),
            metrics: metrics.snapshot(),
        }
    }
}

fn format_labels(point: &MetricPoint) -> String {
    let inner: Vec<String> = point
        .labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("{{{}}}", inner.join(","))
}

fn format_human(data: &ReportData) -> String {
    let mut out = String::new();
    out.push_str("=== TESSEL REPORT ===\n");
    out.push_str(&format!("Wall clock:      {} ms\n", data.wall_clock_ms));
    out.push_str(&format!("Scripts:         {}\n", data.scripts));
    out.push_str(&format!("Runs:            {}\n", data.runs));
    out.push_str(&format!("Failures:        {}\n", data.failures));
    out.push_str(&format!("Worker threads:  {}\n", data.workers));
    out.push_str(&format!("Jobs completed:  {}\n", data.jobs_completed));
    out.push_str(&format!("Jobs panicked:   {}\n", data.jobs_panicked));

    if !data.metrics.is_empty() {
        out.push_str("\n--- Metrics ---\n");
        for point in &data.metrics {
            let series = format!("{}{}", point.name, format_labels(point));
            out.push_str(&format!("  {:50} {}\n", series, point.value));
        }
    }

    out.push_str("=====================\n");
    out
}

#[cfg(feature = "report-json")]
fn format_json(data: &ReportData) -> String {
    use serde_json::{Map, Value, json};

    let metrics: Vec<Value> = data
        .metrics
        .iter()
        .map(|p| {
            let labels: Map<String, Value> = p
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            json!({ "name": p.name, "labels": labels, "value": p.value })
        })
        .collect();

    let obj = json!({
        "wall_clock_ms": data.wall_clock_ms,
        "scripts": data.scripts,
        "runs": data.runs,
        "failures": data.failures,
        "worker_threads": data.workers,
        "jobs_completed": data.jobs_completed,
        "jobs_panicked": data.jobs_panicked,
        "metrics": metrics,
    });
    serde_json::to_string(&obj).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(not(feature = "report-json"))]
fn format_json(data: &ReportData) -> String {
    tracing::warn!(
        "{}=json requires the 'report-json' feature, falling back to human format",
        ENV_REPORT
    );
    format_human(data)
}

/// Render `data` as configured
pub fn render(config: &ReportConfig, data: &ReportData) -> String {
    match config.format {
        ReportFormat::Human => format_human(data),
        ReportFormat::Json => format_json(data),
    }
}

/// Write the report to its destination
pub fn emit_report(config: &ReportConfig, data: &ReportData) {
    let output = render(config, data);
    match &config.destination {
        ReportDestination::Stderr => {
            let _ = std::io::stderr().write_all(output.as_bytes());
        }
        ReportDestination::File(path) => {
            let written = std::fs::File::create(path).and_then(|mut f| f.write_all(output.as_bytes()));
            if let Err(e) = written {
                tracing::warn!(path = %path, error = %e, "could not write report");
                let _ = std::io::stderr().write_all(output.as_bytes());
            }
        }
    }
}
