//! Script scheduler
//!
//! Stored scripts live under the script root, grouped by periodicity:
//!
//! ```text
//! <root>/60000/cleanup.tsl      runs every minute
//! <root>/3600000/rollup.tsl     runs every hour
//! ```
//!
//! The runner rescans the root periodically. Each tick submits every due
//! script to the worker pool. One submission is one *attempt*:
//!
//! 1. a brand-new stack is built on the shared registry and capabilities
//! 2. the bootstrap context, if any, is restored and `BOOTSTRAP` runs
//! 3. `runner.periodicity`, `runner.path`, `runner.scheduledat` and, with a
//!    pre-shared key, `runner.nonce` are bound
//! 4. the script body runs, followed by `CLEAR`
//!
//! Whatever happens, the attempt ends with exactly one schedule update
//! (`next_run = attempt start + periodicity`) and one set of metric updates.
//! A failed attempt is counted and logged; it never stops the runner. A
//! submission rejected by a saturated pool makes the script due again
//! immediately.

use crate::bootstrap::{BootstrapManager, BootstrapSource, Reloader};
use crate::config::{ConfigError, RunnerConfig};
use crate::metrics::{
    MetricsSink, RUNNER_COUNT, RUNNER_CURRENT, RUNNER_ELAPSED, RUNNER_FAILURES, RUNNER_FETCHED,
    RUNNER_OPS, RUNNER_SCRIPTS, RUNNER_TIME_US, path_labels,
};
use crate::nonce::{AesGcmCipher, NonceCipher, Psk};
use crate::pool::{SubmitError, WorkerPool};
use crate::{RegistryOptions, default_registry, nonce};
use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tessel_core::{
    Capabilities, Labels, Limits, Macro, Registry, ScriptError, Stack, Step, Value,
};
use tracing::{debug, info, warn};

pub const RUNNER_PERIODICITY: &str = "runner.periodicity";
pub const RUNNER_PATH: &str = "runner.path";
pub const RUNNER_SCHEDULEDAT: &str = "runner.scheduledat";
pub const RUNNER_NONCE: &str = "runner.nonce";

/// Error building or driving a runner
#[derive(Debug)]
pub enum RunnerError {
    Config(ConfigError),
    /// Worker threads could not be spawned
    Pool(std::io::Error),
    /// The bootstrap reload thread could not be spawned
    Reloader(std::io::Error),
    /// Attempts still hold the shared state
    Busy,
    /// Script root could not be listed
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerError::Config(e) => write!(f, "{}", e),
            RunnerError::Pool(e) => write!(f, "cannot start worker pool: {}", e),
            RunnerError::Reloader(e) => write!(f, "cannot start bootstrap reloader: {}", e),
            RunnerError::Busy => write!(f, "runner has attempts in flight"),
            RunnerError::Scan { path, source } => {
                write!(f, "cannot scan '{}': {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunnerError::Config(e) => Some(e),
            RunnerError::Pool(e) | RunnerError::Reloader(e) => Some(e),
            RunnerError::Busy => None,
            RunnerError::Scan { source, .. } => Some(source),
        }
    }
}

impl From<ConfigError> for RunnerError {
    fn from(e: ConfigError) -> Self {
        RunnerError::Config(e)
    }
}

/// Scheduling state of one stored script
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledScript {
    /// Location of the script body
    pub file: PathBuf,
    /// Run interval in milliseconds
    pub periodicity_ms: i64,
    /// Earliest time (ms) the script may run again
    pub next_run: i64,
    /// An attempt is queued or running
    pub in_flight: bool,
    pub runs: u64,
    pub failures: u64,
    pub last_elapsed: Duration,
}

impl ScheduledScript {
    pub fn new(file: PathBuf, periodicity_ms: i64, next_run: i64) -> Self {
        Self {
            file,
            periodicity_ms,
            next_run,
            in_flight: false,
            runs: 0,
            failures: 0,
            last_elapsed: Duration::ZERO,
        }
    }

    fn is_due(&self, now: i64) -> bool {
        !self.in_flight && self.next_run <= now
    }
}

/// Path -> schedule table shared by the runner and its attempts
///
/// Keys are script paths relative to the script root.
#[derive(Debug, Default)]
pub struct Schedule {
    scripts: Mutex<HashMap<String, ScheduledScript>>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ScheduledScript>> {
        // A poisoned table is still consistent: every update is a single assignment
        self.scripts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the table match `found`: new scripts are due at `now`, known
    /// ones keep their state, missing ones are forgotten
    pub fn sync(&self, found: BTreeMap<String, (PathBuf, i64)>, now: i64) -> (usize, usize) {
        let mut scripts = self.lock();
        let before = scripts.len();
        scripts.retain(|key, _| found.contains_key(key));
        let removed = before - scripts.len();

        let mut added = 0;
        for (key, (file, periodicity)) in found {
            scripts.entry(key).or_insert_with(|| {
                added += 1;
                ScheduledScript::new(file, periodicity, now)
            });
        }
        (added, removed)
    }

    pub fn insert(&self, key: impl Into<String>, script: ScheduledScript) {
        self.lock().insert(key.into(), script);
    }

    pub fn get(&self, key: &str) -> Option<ScheduledScript> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Claim every due script, marking it in flight
    pub fn claim_due(&self, now: i64) -> Vec<(String, ScheduledScript)> {
        let mut scripts = self.lock();
        let mut due: Vec<(String, ScheduledScript)> = scripts
            .iter_mut()
            .filter(|(_, s)| s.is_due(now))
            .map(|(k, s)| {
                s.in_flight = true;
                (k.clone(), s.clone())
            })
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0));
        due
    }

    /// A claimed attempt was rejected: eligible again at `now`
    pub fn reject(&self, key: &str, now: i64) {
        if let Some(s) = self.lock().get_mut(key) {
            s.in_flight = false;
            s.next_run = now;
        }
    }

    /// A claimed attempt finished
    pub fn complete(&self, key: &str, next_run: i64, failed: bool, elapsed: Duration) {
        if let Some(s) = self.lock().get_mut(key) {
            s.in_flight = false;
            s.next_run = next_run;
            s.runs += 1;
            if failed {
                s.failures += 1;
            }
            s.last_elapsed = elapsed;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.lock().values().filter(|s| s.in_flight).count()
    }

    /// Copy of the table, ordered by path
    pub fn snapshot(&self) -> Vec<(String, ScheduledScript)> {
        let mut all: Vec<(String, ScheduledScript)> = self
            .lock()
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

/// What every attempt shares
struct Shared {
    registry: Arc<Registry>,
    capabilities: Capabilities,
    limits: Limits,
    bootstrap: Option<Arc<dyn BootstrapSource>>,
    cipher: Arc<dyn NonceCipher>,
    psk: Option<Psk>,
    metrics: Arc<dyn MetricsSink>,
    schedule: Arc<Schedule>,
}

/// Periodic runner over a script directory
pub struct ScriptRunner {
    shared: Arc<Shared>,
    pool: WorkerPool,
    reloader: Option<Reloader>,
    root: PathBuf,
    extension: String,
    scan_period: Duration,
    tick_interval: Duration,
    last_scan: Option<Instant>,
}

impl ScriptRunner {
    /// Build a runner from configuration
    ///
    /// The registry carries `loop.max_duration_ms` as the loop budget; the
    /// bootstrap script, if configured, is loaded before this returns and
    /// reloaded on its own thread afterwards.
    pub fn new(
        config: &RunnerConfig,
        capabilities: Capabilities,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, RunnerError> {
        config.validate()?;
        let registry = Arc::new(default_registry(&RegistryOptions {
            loop_max_duration_ms: config.loops.max_duration_ms,
        }));
        let limits = config.limits();

        let manager = config.bootstrap.path.as_ref().map(|path| {
            Arc::new(BootstrapManager::start(
                Some(path.clone()),
                Duration::from_millis(config.bootstrap.period_ms),
                Arc::clone(&registry),
                capabilities.clone(),
                limits,
            ))
        });
        let bootstrap = manager
            .as_ref()
            .map(|m| Arc::clone(m) as Arc<dyn BootstrapSource>);
        let reloader = manager
            .as_ref()
            .map(|m| m.spawn_reloader())
            .transpose()
            .map_err(RunnerError::Reloader)?;

        let pool = WorkerPool::new(config.worker_count(), config.queue_capacity)
            .map_err(RunnerError::Pool)?;

        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                capabilities,
                limits,
                bootstrap,
                cipher: Arc::new(AesGcmCipher),
                psk: config.psk()?,
                metrics,
                schedule: Arc::new(Schedule::new()),
            }),
            pool,
            reloader,
            root: config.root.clone(),
            extension: config.extension.clone(),
            scan_period: Duration::from_millis(config.scan_period_ms),
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            last_scan: None,
        })
    }

    fn shared_mut(&mut self) -> Result<&mut Shared, RunnerError> {
        Arc::get_mut(&mut self.shared).ok_or(RunnerError::Busy)
    }

    /// Replace the bootstrap source, stopping the configured reloader
    ///
    /// Fails with [`RunnerError::Busy`] while attempts are queued or running.
    pub fn set_bootstrap(
        &mut self,
        source: Arc<dyn BootstrapSource>,
    ) -> Result<(), RunnerError> {
        self.shared_mut()?.bootstrap = Some(source);
        self.reloader = None;
        Ok(())
    }

    /// Replace the nonce cipher
    ///
    /// Fails with [`RunnerError::Busy`] while attempts are queued or running.
    pub fn set_cipher(&mut self, cipher: Arc<dyn NonceCipher>) -> Result<(), RunnerError> {
        self.shared_mut()?.cipher = cipher;
        Ok(())
    }

    pub fn schedule(&self) -> &Arc<Schedule> {
        &self.shared.schedule
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rescan the script root
    ///
    /// Returns the number of scripts now scheduled.
    pub fn scan(&mut self) -> Result<usize, RunnerError> {
        self.last_scan = Some(Instant::now());
        let found = discover(&self.root, &self.extension)?;
        let now = self.shared.capabilities.time.now_millis();
        let (added, removed) = self.shared.schedule.sync(found, now);
        let total = self.shared.schedule.len();
        self.shared
            .metrics
            .set(RUNNER_SCRIPTS, &Labels::new(), total as i64);
        if added > 0 || removed > 0 {
            info!(added, removed, total, root = %self.root.display(), "scripts rescanned");
        }
        Ok(total)
    }

    /// Submit every due script; returns how many were accepted
    pub fn tick(&self) -> usize {
        let shared = &self.shared;
        let now = shared.capabilities.time.now_millis();
        let mut submitted = 0;
        for (key, script) in shared.schedule.claim_due(now) {
            let job_shared = Arc::clone(shared);
            let job_key = key.clone();
            let scheduled_at = now;
            let result = self.pool.submit(Box::new(move || {
                run_attempt(&job_shared, &job_key, &script, scheduled_at);
            }));
            match result {
                Ok(()) => submitted += 1,
                Err(SubmitError::Saturated) | Err(SubmitError::ShutDown) => {
                    let retry_at = shared.capabilities.time.now_millis();
                    shared.schedule.reject(&key, retry_at);
                    debug!(path = %key, "submission rejected, rescheduled");
                }
            }
        }
        submitted
    }

    /// Wait until no attempt is queued or running
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.shared.schedule.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }

    /// Scan, tick and sleep until `shutdown` is raised, then drain the pool
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!(root = %self.root.display(), workers = self.pool.worker_count(), "runner started");
        while !shutdown.load(Ordering::Relaxed) {
            let scan_due = self
                .last_scan
                .is_none_or(|t| t.elapsed() >= self.scan_period);
            if scan_due {
                if let Err(e) = self.scan() {
                    warn!(error = %e, "script scan failed");
                }
            }
            self.tick();
            std::thread::sleep(self.tick_interval);
        }
        self.shutdown();
    }

    /// Stop accepting attempts and wait for the running ones
    pub fn shutdown(&mut self) {
        if let Some(mut reloader) = self.reloader.take() {
            reloader.stop();
        }
        self.pool.shutdown();
        info!("runner stopped");
    }
}

impl std::fmt::Debug for ScriptRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRunner")
            .field("root", &self.root)
            .field("scripts", &self.shared.schedule.len())
            .field("pool", &self.pool)
            .finish()
    }
}

/// List `<root>/<periodicity>/<name>.<extension>` scripts, keyed by their
/// path relative to `root`
pub fn discover(
    root: &Path,
    extension: &str,
) -> Result<BTreeMap<String, (PathBuf, i64)>, RunnerError> {
    let scan_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| RunnerError::Scan { path, source }
    };

    let mut found = BTreeMap::new();
    for entry in std::fs::read_dir(root).map_err(scan_err(root))? {
        let entry = entry.map_err(scan_err(root))?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let dir_name = entry.file_name().to_string_lossy().into_owned();
        let periodicity = match dir_name.parse::<i64>() {
            Ok(p) if p > 0 => p,
            _ => {
                warn!(dir = %dir.display(), "ignoring directory, name is not a periodicity in ms");
                continue;
            }
        };

        for script in std::fs::read_dir(&dir).map_err(scan_err(&dir))? {
            let script = script.map_err(scan_err(&dir))?;
            let file = script.path();
            let matches = file.is_file()
                && file.extension().and_then(|e| e.to_str()) == Some(extension);
            if !matches {
                continue;
            }
            let key = format!("{}/{}", dir_name, script.file_name().to_string_lossy());
            found.insert(key, (file, periodicity));
        }
    }
    Ok(found)
}

/// One execution attempt; never fails, never panics out
fn run_attempt(shared: &Shared, key: &str, script: &ScheduledScript, scheduled_at: i64) {
    let start_ms = shared.capabilities.time.now_millis();
    let labels = path_labels(key);
    let no_labels = Labels::new();
    let metrics = &shared.metrics;

    metrics.update(RUNNER_COUNT, &labels, 1);
    let started = Instant::now();
    metrics.update(RUNNER_CURRENT, &no_labels, 1);

    let mut stack = Stack::new(
        Arc::clone(&shared.registry),
        shared.capabilities.clone(),
        shared.limits,
    );
    let fetched = stack.attributes().fetch_counter();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        execute(shared, &mut stack, key, script, scheduled_at)
    }));
    let failed = match outcome {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            warn!(path = %key, kind = %e.kind(), error = %e, "script failed");
            true
        }
        Err(_) => {
            warn!(path = %key, "script panicked");
            true
        }
    };
    if failed {
        metrics.update(RUNNER_FAILURES, &labels, 1);
    }

    let elapsed = started.elapsed();
    metrics.update(RUNNER_TIME_US, &labels, elapsed.as_micros() as i64);
    metrics.update(RUNNER_ELAPSED, &labels, elapsed.as_nanos() as i64);
    metrics.update(RUNNER_OPS, &labels, stack.attributes().ops() as i64);
    metrics.update(
        RUNNER_FETCHED,
        &labels,
        fetched.load(Ordering::Relaxed) as i64,
    );
    metrics.update(RUNNER_CURRENT, &no_labels, -1);

    // Last, so an idle schedule implies settled metrics
    shared.schedule.complete(
        key,
        start_ms.saturating_add(script.periodicity_ms),
        failed,
        elapsed,
    );
}

fn execute(
    shared: &Shared,
    stack: &mut Stack,
    key: &str,
    script: &ScheduledScript,
    scheduled_at: i64,
) -> Result<(), ScriptError> {
    let mut source = std::fs::read_to_string(&script.file)?;
    // Scheduled scripts never leave anything behind
    source.push_str("\nCLEAR\n");
    let program = tessel_core::read(&source)?;

    if let Some(context) = shared.bootstrap.as_ref().and_then(|b| b.bootstrap_context()) {
        stack.restore(&context);
    }
    stack.exec_top(&Macro::new(vec![Step::call("BOOTSTRAP")]))?;

    stack.store(RUNNER_PERIODICITY, Value::Int(script.periodicity_ms));
    stack.store(RUNNER_PATH, Value::text(key));
    stack.store(RUNNER_SCHEDULEDAT, Value::Int(scheduled_at));

    if let Some(psk) = &shared.psk {
        let now = shared.capabilities.time.now_millis();
        let token = nonce::issue(shared.cipher.as_ref(), psk, now)
            .map_err(|e| ScriptError::failed(format!("cannot issue run nonce: {}", e)))?;
        stack.store(RUNNER_NONCE, Value::from(token));
    }

    stack.exec_top(&program)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(next_run: i64) -> ScheduledScript {
        ScheduledScript::new(PathBuf::from("/x.tsl"), 1000, next_run)
    }

    #[test]
    fn test_claim_marks_in_flight() {
        let schedule = Schedule::new();
        schedule.insert("60000/a.tsl", script(100));
        schedule.insert("60000/b.tsl", script(200));

        let due = schedule.claim_due(150);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, "60000/a.tsl");
        // claimed scripts are not due again until completed
        assert!(schedule.claim_due(1_000).iter().all(|(k, _)| k != "60000/a.tsl"));
        assert_eq!(schedule.in_flight(), 2);
    }

    #[test]
    fn test_complete_and_reject() {
        let schedule = Schedule::new();
        schedule.insert("k", script(0));
        schedule.claim_due(0);
        schedule.complete("k", 1_000, true, Duration::from_millis(3));
        let s = schedule.get("k").unwrap();
        assert_eq!((s.next_run, s.runs, s.failures, s.in_flight), (1_000, 1, 1, false));

        schedule.claim_due(1_000);
        schedule.reject("k", 1_234);
        let s = schedule.get("k").unwrap();
        assert_eq!((s.next_run, s.runs, s.in_flight), (1_234, 1, false));
    }

    #[test]
    fn test_sync_adds_keeps_and_forgets() {
        let schedule = Schedule::new();
        let mut found = BTreeMap::new();
        found.insert("10/a.tsl".to_string(), (PathBuf::from("a"), 10));
        found.insert("10/b.tsl".to_string(), (PathBuf::from("b"), 10));
        assert_eq!(schedule.sync(found.clone(), 5), (2, 0));

        schedule.claim_due(5);
        schedule.complete("10/a.tsl", 15, false, Duration::ZERO);

        found.remove("10/b.tsl");
        assert_eq!(schedule.sync(found, 7), (0, 1));
        let a = schedule.get("10/a.tsl").unwrap();
        assert_eq!((a.next_run, a.runs), (15, 1));
        assert!(schedule.get("10/b.tsl").is_none());
    }

    #[test]
    fn test_discover_layout() {
        let root = tempfile::tempdir().unwrap();
        let minute = root.path().join("60000");
        let bogus = root.path().join("hourly");
        std::fs::create_dir(&minute).unwrap();
        std::fs::create_dir(&bogus).unwrap();
        std::fs::create_dir(root.path().join("0")).unwrap();
        std::fs::write(minute.join("a.tsl"), "1").unwrap();
        std::fs::write(minute.join("notes.txt"), "x").unwrap();
        std::fs::write(bogus.join("b.tsl"), "1").unwrap();
        std::fs::write(root.path().join("top.tsl"), "1").unwrap();

        let found = discover(root.path(), "tsl").unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["60000/a.tsl"]);
        assert_eq!(found["60000/a.tsl"].1, 60_000);

        assert!(matches!(
            discover(&root.path().join("missing"), "tsl"),
            Err(RunnerError::Scan { .. })
        ));
    }
}
