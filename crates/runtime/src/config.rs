//! Runner configuration
//!
//! Loaded from a TOML file, then overridden by environment variables.
//!
//! ```toml
//! root = "/var/lib/tessel/scripts"
//! extension = "tsl"
//! workers = 4              # 0 = one per CPU
//! queue_capacity = 64
//! scan_period_ms = 60000
//! tick_interval_ms = 100
//!
//! [loop]
//! max_duration_ms = 5000   # per-loop budget, <= 0 defers to the stack attribute
//!
//! [limits]
//! max_ops = 0              # 0 = unbounded
//! max_depth = 0
//!
//! [bootstrap]
//! path = "/etc/tessel/bootstrap.tsl"
//! period_ms = 300000
//!
//! [runner]
//! psk = "<64 hex digits>"
//! ```
//!
//! ## Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `TESSEL_WORKERS` | `workers` |
//! | `TESSEL_LOOP_MAX_MS` | `loop.max_duration_ms` |
//! | `TESSEL_RUNNER_PSK` | `runner.psk` |

use crate::nonce::{NonceError, Psk};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tessel_core::Limits;

pub const ENV_WORKERS: &str = "TESSEL_WORKERS";
pub const ENV_LOOP_MAX_MS: &str = "TESSEL_LOOP_MAX_MS";
pub const ENV_RUNNER_PSK: &str = "TESSEL_RUNNER_PSK";

/// Error while loading or validating configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Configuration file is not valid TOML for this schema
    Parse(toml::de::Error),
    /// `runner.psk` is unusable
    Psk(NonceError),
    /// A field holds an unusable value
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config '{}': {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "failed to parse config: {}", e),
            ConfigError::Psk(e) => write!(f, "invalid runner.psk: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Psk(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    pub max_duration_ms: i64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_ops: u64,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    pub path: Option<PathBuf>,
    pub period_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            path: None,
            period_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerSection {
    /// Hex-encoded 32-byte key
    pub psk: Option<String>,
}

/// Everything the scheduler needs to run
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    pub root: PathBuf,
    pub extension: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub scan_period_ms: u64,
    pub tick_interval_ms: u64,
    #[serde(rename = "loop")]
    pub loops: LoopConfig,
    pub limits: LimitsConfig,
    pub bootstrap: BootstrapConfig,
    pub runner: RunnerSection,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("scripts"),
            extension: "tsl".to_string(),
            workers: 0,
            queue_capacity: 64,
            scan_period_ms: 60_000,
            tick_interval_ms: 100,
            loops: LoopConfig::default(),
            limits: LimitsConfig::default(),
            bootstrap: BootstrapConfig::default(),
            runner: RunnerSection::default(),
        }
    }
}

impl RunnerConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(ConfigError::Parse)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// File (or defaults), then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TESSEL_*` overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var(ENV_WORKERS) {
            self.workers = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{}='{}' is not a count", ENV_WORKERS, v)))?;
        }
        if let Ok(v) = std::env::var(ENV_LOOP_MAX_MS) {
            self.loops.max_duration_ms = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{}='{}' is not a duration", ENV_LOOP_MAX_MS, v))
            })?;
        }
        if let Ok(v) = std::env::var(ENV_RUNNER_PSK) {
            self.runner.psk = Some(v).filter(|s| !s.trim().is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.extension.is_empty() || self.extension.contains('.') {
            return Err(ConfigError::Invalid(format!(
                "extension '{}' must be a bare suffix like 'tsl'",
                self.extension
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        self.psk()?;
        Ok(())
    }

    /// Worker count, resolving 0 to the number of CPUs
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    pub fn psk(&self) -> Result<Option<Psk>, ConfigError> {
        self.runner
            .psk
            .as_deref()
            .map(Psk::from_hex)
            .transpose()
            .map_err(ConfigError::Psk)
    }

    /// Execution limits for scheduled stacks
    ///
    /// `loop.max_duration_ms` is applied as the per-operator budget of the
    /// loop operators, not through the stack attribute.
    pub fn limits(&self) -> Limits {
        Limits {
            loop_max_duration_ms: 0,
            max_ops: self.limits.max_ops,
            max_depth: self.limits.max_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        // SAFETY: tests touching the environment are serialized
        unsafe {
            std::env::remove_var(ENV_WORKERS);
            std::env::remove_var(ENV_LOOP_MAX_MS);
            std::env::remove_var(ENV_RUNNER_PSK);
        }
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::from_toml("").unwrap();
        assert_eq!(config, RunnerConfig::default());
        assert_eq!(config.extension, "tsl");
        assert!(config.worker_count() >= 1);
        assert!(config.psk().unwrap().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_file() {
        let psk = "ab".repeat(32);
        let text = format!(
            r#"
            root = "/srv/scripts"
            workers = 3
            queue_capacity = 8

            [loop]
            max_duration_ms = 250

            [limits]
            max_ops = 1000
            max_depth = 64

            [bootstrap]
            path = "boot.tsl"
            period_ms = 1000

            [runner]
            psk = "{}"
            "#,
            psk
        );
        let config = RunnerConfig::from_toml(&text).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/scripts"));
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.loops.max_duration_ms, 250);
        assert_eq!(config.limits().max_ops, 1000);
        assert_eq!(config.limits().max_depth, 64);
        assert_eq!(config.bootstrap.path, Some(PathBuf::from("boot.tsl")));
        assert!(config.psk().unwrap().is_some());
    }

    #[test]
    fn test_rejects_unknown_and_invalid() {
        assert!(matches!(
            RunnerConfig::from_toml("wokers = 3"),
            Err(ConfigError::Parse(_))
        ));
        let config = RunnerConfig::from_toml("queue_capacity = 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        let config = RunnerConfig::from_toml("[runner]\npsk = \"00ff\"").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Psk(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers = 2\n[loop]\nmax_duration_ms = 10").unwrap();

        // SAFETY: serialized with the other env tests
        unsafe {
            std::env::set_var(ENV_WORKERS, "5");
            std::env::set_var(ENV_LOOP_MAX_MS, "75");
            std::env::set_var(ENV_RUNNER_PSK, "11".repeat(32));
        }
        let config = RunnerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.workers, 5);
        assert_eq!(config.loops.max_duration_ms, 75);
        assert!(config.psk().unwrap().is_some());

        unsafe {
            std::env::set_var(ENV_WORKERS, "many");
        }
        assert!(matches!(
            RunnerConfig::load(None),
            Err(ConfigError::Invalid(_))
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_file() {
        clear_env();
        let err = RunnerConfig::load(Some(Path::new("/nonexistent/tessel.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
