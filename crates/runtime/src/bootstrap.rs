//! Shared bootstrap context
//!
//! A bootstrap script runs once in its own stack; the bindings and values it
//! leaves behind become the starting point of every scheduled run. A
//! [`Reloader`] thread re-runs the script when its period elapses, so a slow
//! bootstrap script never holds up scheduling. A failed reload keeps the
//! previous context.
//!
//! The context is kept in its encoded form (see
//! [`StackContext::to_bytes`]) and decoded once per load, so every run
//! starts from an independent copy of what the script produced.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tessel_core::{Capabilities, Limits, Registry, ScriptError, Stack, StackContext};
use tracing::{info, warn};

/// Provider of the context restored into each new stack
pub trait BootstrapSource: Send + Sync {
    fn bootstrap_context(&self) -> Option<Arc<StackContext>>;
}

/// A context that never changes
#[derive(Debug, Clone)]
pub struct FixedBootstrap(pub Arc<StackContext>);

impl BootstrapSource for FixedBootstrap {
    fn bootstrap_context(&self) -> Option<Arc<StackContext>> {
        Some(Arc::clone(&self.0))
    }
}

#[derive(Debug, Default)]
struct Loaded {
    context: Option<Arc<StackContext>>,
    encoded_len: usize,
    loaded_at: Option<Instant>,
}

/// Bootstrap context loaded from a script file and reloaded periodically
pub struct BootstrapManager {
    path: Option<PathBuf>,
    period: Duration,
    registry: Arc<Registry>,
    capabilities: Capabilities,
    limits: Limits,
    state: RwLock<Loaded>,
}

impl BootstrapManager {
    /// Build the manager and perform the first load
    ///
    /// Without a path the manager provides no context. A failing first load
    /// is logged and retried at the next period.
    pub fn start(
        path: Option<PathBuf>,
        period: Duration,
        registry: Arc<Registry>,
        capabilities: Capabilities,
        limits: Limits,
    ) -> Self {
        let manager = Self {
            path,
            period,
            registry,
            capabilities,
            limits,
            state: RwLock::new(Loaded::default()),
        };
        manager.reload();
        manager
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run the bootstrap script in a fresh stack and snapshot the result
    pub fn load(&self, path: &Path) -> Result<(Arc<StackContext>, usize), ScriptError> {
        let source = std::fs::read_to_string(path)?;
        let mut stack = Stack::new(
            Arc::clone(&self.registry),
            self.capabilities.clone(),
            self.limits,
        );
        stack.exec_script(&source)?;
        let encoded = stack.save().to_bytes()?;
        let context = StackContext::from_bytes(&encoded)?;
        Ok((Arc::new(context), encoded.len()))
    }

    /// Reload now; keep the previous context on failure
    ///
    /// Returns whether a new context was installed.
    pub fn reload(&self) -> bool {
        let Some(path) = self.path.as_deref() else {
            return false;
        };
        let result = self.load(path);
        let Ok(mut state) = self.state.write() else {
            return false;
        };
        state.loaded_at = Some(Instant::now());
        match result {
            Ok((context, encoded_len)) => {
                info!(
                    path = %path.display(),
                    bindings = context.bindings.len(),
                    bytes = encoded_len,
                    "bootstrap context loaded"
                );
                state.context = Some(context);
                state.encoded_len = encoded_len;
                true
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    kept_previous = state.context.is_some(),
                    "bootstrap reload failed"
                );
                false
            }
        }
    }

    /// Reload when the period has elapsed since the last attempt
    pub fn refresh_if_due(&self) -> bool {
        let due = self
            .state
            .read()
            .map(|s| s.loaded_at.is_none_or(|t| t.elapsed() >= self.period))
            .unwrap_or(false);
        due && self.reload()
    }

    /// Size of the current context in its encoded form
    pub fn encoded_len(&self) -> usize {
        self.state.read().map(|s| s.encoded_len).unwrap_or(0)
    }

    /// Reload on a background thread until the returned handle is stopped
    pub fn spawn_reloader(self: &Arc<Self>) -> std::io::Result<Reloader> {
        let stop = Arc::new(AtomicBool::new(false));
        let manager = Arc::clone(self);
        let flag = Arc::clone(&stop);
        let poll = self.period.clamp(Duration::from_millis(1), RELOAD_POLL);
        let handle = std::thread::Builder::new()
            .name("tessel-bootstrap".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    manager.refresh_if_due();
                    std::thread::sleep(poll);
                }
            })?;
        Ok(Reloader {
            stop,
            handle: Some(handle),
        })
    }
}

/// Longest wait between two due checks of the reloader
const RELOAD_POLL: Duration = Duration::from_millis(250);

/// Handle on a running reload thread; stops it when dropped
#[derive(Debug)]
pub struct Reloader {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reloader {
    /// Stop the thread, waiting for a reload in progress
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Reloader {
    fn drop(&mut self) {
        self.stop();
    }
}

impl BootstrapSource for BootstrapManager {
    fn bootstrap_context(&self) -> Option<Arc<StackContext>> {
        self.state.read().ok().and_then(|s| s.context.clone())
    }
}

impl std::fmt::Debug for BootstrapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapManager")
            .field("path", &self.path)
            .field("period", &self.period)
            .field("encoded_len", &self.encoded_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RegistryOptions, default_registry};
    use tessel_core::Value;

    fn manager(path: Option<PathBuf>, period: Duration) -> BootstrapManager {
        BootstrapManager::start(
            path,
            period,
            Arc::new(default_registry(&RegistryOptions::default())),
            Capabilities::default(),
            Limits::default(),
        )
    }

    #[test]
    fn test_no_path_no_context() {
        let m = manager(None, Duration::from_secs(60));
        assert!(m.bootstrap_context().is_none());
        assert!(!m.reload());
    }

    #[test]
    fn test_loads_bindings_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.tsl");
        std::fs::write(&path, "42 'answer' STORE <% 'hello' %> 'bootstrap' STORE 'left'").unwrap();

        let m = manager(Some(path), Duration::from_secs(60));
        let ctx = m.bootstrap_context().unwrap();
        assert_eq!(ctx.bindings.get("answer"), Some(&Value::Int(42)));
        assert!(matches!(ctx.bindings.get("bootstrap"), Some(Value::Macro(_))));
        assert_eq!(ctx.values, vec![Value::text("left")]);
        assert!(m.encoded_len() > 0);
    }

    #[test]
    fn test_failed_reload_keeps_previous_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.tsl");
        std::fs::write(&path, "1 'v' STORE").unwrap();

        let m = manager(Some(path.clone()), Duration::ZERO);
        std::fs::write(&path, "<% unterminated").unwrap();
        assert!(!m.refresh_if_due());
        let ctx = m.bootstrap_context().unwrap();
        assert_eq!(ctx.bindings.get("v"), Some(&Value::Int(1)));

        std::fs::write(&path, "2 'v' STORE").unwrap();
        assert!(m.refresh_if_due());
        let ctx = m.bootstrap_context().unwrap();
        assert_eq!(ctx.bindings.get("v"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_reloader_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.tsl");
        std::fs::write(&path, "1 'v' STORE").unwrap();
        let m = Arc::new(manager(Some(path.clone()), Duration::from_millis(5)));
        let mut reloader = m.spawn_reloader().unwrap();

        std::fs::write(&path, "2 'v' STORE").unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        let v = |m: &BootstrapManager| m.bootstrap_context().unwrap().bindings.get("v").cloned();
        while v(&m) != Some(Value::Int(2)) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(v(&m), Some(Value::Int(2)));

        reloader.stop();
        std::fs::write(&path, "3 'v' STORE").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(v(&m), Some(Value::Int(2)));
    }

    #[test]
    fn test_not_due_before_period() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.tsl");
        std::fs::write(&path, "1 'v' STORE").unwrap();
        let m = manager(Some(path), Duration::from_secs(3600));
        assert!(!m.refresh_if_due());
    }
}
