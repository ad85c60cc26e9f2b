//! Runtime diagnostics for production debugging
//!
//! A SIGQUIT (kill -3) handler dumps the schedule table and runner counters
//! to stderr without stopping the process:
//!
//! ```bash
//! kill -3 <pid>
//! ```
//!
//! ## Signal Safety
//!
//! Dumping does I/O and takes locks, which is not async-signal-safe. The
//! handler therefore only wakes a dedicated thread (signal-hook's iterator
//! API) that performs the dump.
//!
//! SIGINT and SIGTERM are wired to a shutdown flag polled by
//! [`ScriptRunner::run`](crate::scheduler::ScriptRunner::run).

use crate::metrics::MemoryMetrics;
use crate::scheduler::Schedule;
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Once};

static SIGNAL_HANDLER_INIT: Once = Once::new();

/// Maximum number of scripts listed in one dump
const SCRIPT_DISPLAY_LIMIT: usize = 50;

/// Install the SIGQUIT handler (first call wins, later calls are no-ops)
#[cfg(all(unix, feature = "diagnostics"))]
pub fn install_signal_handler(schedule: Arc<Schedule>, metrics: Option<Arc<MemoryMetrics>>) {
    SIGNAL_HANDLER_INIT.call_once(|| {
        use signal_hook::consts::SIGQUIT;
        use signal_hook::iterator::Signals;

        let mut signals = match Signals::new([SIGQUIT]) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "cannot register SIGQUIT handler");
                return;
            }
        };

        let spawned = std::thread::Builder::new()
            .name("tessel-diagnostics".to_string())
            .spawn(move || {
                for sig in signals.forever() {
                    if sig == SIGQUIT {
                        let mut out = std::io::stderr().lock();
                        let _ = dump_diagnostics(&mut out, &schedule, metrics.as_deref());
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "cannot start diagnostics thread");
        }
    });
}

#[cfg(not(all(unix, feature = "diagnostics")))]
pub fn install_signal_handler(_schedule: Arc<Schedule>, _metrics: Option<Arc<MemoryMetrics>>) {
    SIGNAL_HANDLER_INIT.call_once(|| {});
}

/// Raise `flag` on SIGINT or SIGTERM
#[cfg(all(unix, feature = "diagnostics"))]
pub fn install_shutdown_flag(flag: Arc<AtomicBool>) -> std::io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    signal_hook::flag::register(SIGINT, Arc::clone(&flag))?;
    signal_hook::flag::register(SIGTERM, flag)?;
    Ok(())
}

#[cfg(not(all(unix, feature = "diagnostics")))]
pub fn install_shutdown_flag(_flag: Arc<AtomicBool>) -> std::io::Result<()> {
    Ok(())
}

/// Write the schedule table and counters to `out`
pub fn dump_diagnostics(
    out: &mut impl Write,
    schedule: &Schedule,
    metrics: Option<&MemoryMetrics>,
) -> std::io::Result<()> {
    writeln!(out, "\n=== Tessel Runner Diagnostics ===")?;
    writeln!(out, "Timestamp: {:?}", std::time::SystemTime::now())?;

    let scripts = schedule.snapshot();
    let runs: u64 = scripts.iter().map(|(_, s)| s.runs).sum();
    let failures: u64 = scripts.iter().map(|(_, s)| s.failures).sum();
    let in_flight = scripts.iter().filter(|(_, s)| s.in_flight).count();

    writeln!(out, "\n[Schedule]")?;
    writeln!(out, "  Scripts:   {}", scripts.len())?;
    writeln!(out, "  In flight: {}", in_flight)?;
    writeln!(out, "  Runs:      {} (total)", runs)?;
    writeln!(out, "  Failures:  {} (total)", failures)?;

    if scripts.is_empty() {
        writeln!(out, "  (no scripts scheduled)")?;
    } else {
        writeln!(
            out,
            "\n  {:<40} {:>10} {:>15} {:>8} {:>8} {:>10}",
            "path", "period", "next run", "runs", "fails", "last"
        )?;
        for (path, s) in scripts.iter().take(SCRIPT_DISPLAY_LIMIT) {
            let state = if s.in_flight { "*" } else { "" };
            writeln!(
                out,
                "  {:<40} {:>10} {:>15} {:>8} {:>8} {:>8}ms{}",
                path,
                s.periodicity_ms,
                s.next_run,
                s.runs,
                s.failures,
                s.last_elapsed.as_millis(),
                state
            )?;
        }
        if scripts.len() > SCRIPT_DISPLAY_LIMIT {
            writeln!(
                out,
                "  ... and {} more scripts",
                scripts.len() - SCRIPT_DISPLAY_LIMIT
            )?;
        }
    }

    if let Some(metrics) = metrics {
        writeln!(out, "\n[Metrics]")?;
        let mut last = String::new();
        for point in metrics.snapshot() {
            if point.name != last {
                writeln!(out, "  {} = {}", point.name, metrics.total(&point.name))?;
                last = point.name;
            }
        }
    }

    writeln!(out, "\n=== End Diagnostics ===\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsSink, RUNNER_COUNT, path_labels};
    use crate::scheduler::ScheduledScript;
    use std::path::PathBuf;

    #[test]
    fn test_dump_lists_scripts_and_totals() {
        let schedule = Schedule::new();
        schedule.insert(
            "60000/a.tsl",
            ScheduledScript::new(PathBuf::from("a.tsl"), 60_000, 123),
        );
        let metrics = MemoryMetrics::new();
        metrics.update(RUNNER_COUNT, &path_labels("60000/a.tsl"), 4);
        metrics.update(RUNNER_COUNT, &path_labels("60000/b.tsl"), 1);

        let mut out = Vec::new();
        dump_diagnostics(&mut out, &schedule, Some(&metrics)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Scripts:   1"));
        assert!(text.contains("60000/a.tsl"));
        assert!(text.contains("tessel.runner.count = 5"));
    }

    #[test]
    fn test_dump_empty_schedule() {
        let mut out = Vec::new();
        dump_diagnostics(&mut out, &Schedule::new(), None).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("no scripts scheduled"));
    }

    #[test]
    fn test_install_signal_handler_idempotent() {
        let schedule = Arc::new(Schedule::new());
        install_signal_handler(Arc::clone(&schedule), None);
        install_signal_handler(schedule, None);
    }
}
