//! External collaborators injected into every stack
//!
//! The interpreter treats storage and directory clients as opaque capability
//! handles: operators that need data go through them, nothing else does.
//! The time source backs `NOW`, schedule times and nonce material, and can be
//! replaced for deterministic tests. Loop budgets do not read it: they measure
//! elapsed time on the monotonic clock.

use crate::error::ScriptError;
use crate::gts::{Labels, Selector, Series};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall-clock time source
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Settable time source for tests
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Catalog lookup: which series match a selector
pub trait DirectoryClient: Send + Sync {
    fn find(&self, selector: &Selector) -> Result<Vec<(String, Labels)>, ScriptError>;
}

/// Data access: samples of the series a directory lookup returned
pub trait StoreClient: Send + Sync {
    fn fetch(&self, series: &[(String, Labels)]) -> Result<Vec<Series>, ScriptError>;
}

/// In-process store and directory over a fixed set of series
#[derive(Debug, Default)]
pub struct MemoryStore {
    series: RwLock<Vec<Series>>,
}

impl MemoryStore {
    pub fn new(series: Vec<Series>) -> Self {
        Self {
            series: RwLock::new(series),
        }
    }

    pub fn insert(&self, series: Series) {
        if let Ok(mut all) = self.series.write() {
            all.push(series);
        }
    }
}

impl DirectoryClient for MemoryStore {
    fn find(&self, selector: &Selector) -> Result<Vec<(String, Labels)>, ScriptError> {
        let all = self
            .series
            .read()
            .map_err(|_| ScriptError::failed("directory lock poisoned"))?;
        Ok(all
            .iter()
            .filter(|s| selector.matches(&s.name, &s.labels))
            .map(|s| (s.name.clone(), s.labels.clone()))
            .collect())
    }
}

impl StoreClient for MemoryStore {
    fn fetch(&self, wanted: &[(String, Labels)]) -> Result<Vec<Series>, ScriptError> {
        let all = self
            .series
            .read()
            .map_err(|_| ScriptError::failed("store lock poisoned"))?;
        Ok(wanted
            .iter()
            .filter_map(|(name, labels)| {
                all.iter()
                    .find(|s| &s.name == name && &s.labels == labels)
                    .cloned()
            })
            .collect())
    }
}

/// Capability handles a stack is bound to
#[derive(Clone)]
pub struct Capabilities {
    pub store: Arc<dyn StoreClient>,
    pub directory: Arc<dyn DirectoryClient>,
    pub time: Arc<dyn TimeSource>,
}

impl Capabilities {
    /// Store and directory backed by one in-memory store
    pub fn in_memory(store: Arc<MemoryStore>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            store: store.clone(),
            directory: store,
            time,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::in_memory(Arc::new(MemoryStore::default()), Arc::new(SystemTimeSource))
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
