//! # Config - shared settings for the ring library and `ringctl`
//!
//! Two layers of configuration live here:
//!
//! - [`StoreConfig`] tunes the on-disk store behind the persistent ring
//!   backend. It is passed explicitly by library callers.
//! - [`Settings`] is the process-level configuration of the `ringctl`
//!   binary, read from environment variables. Command-line flags override it.
//!
//! ```text
//! RINGCTL_BACKEND     memory | persistent          (default: "memory")
//! RINGCTL_LOCATION    topology file or store dir   (default: unset)
//! RINGCTL_ALGORITHM   sha256 | sha1 | md5          (default: "sha256")
//! RINGCTL_LOG         tracing filter directive     (default: "warn")
//! RINGCTL_STORE_SYNC  fsync every store batch      (default: "true")
//! RINGCTL_COMPACT_MB  store compaction threshold   (default: 64, 0 = disabled)
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Default log size (bytes) past which a mostly-dead store log is rewritten.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 64 * 1024 * 1024;

/// Default upper bound on one store log frame. Batches larger than this are
/// split across several frames and committed together.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Errors produced while interpreting configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown backend '{0}' (expected 'memory' or 'persistent')")]
    UnknownBackend(String),

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Tuning knobs for the persistent store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// If `true`, every batch appended to the store log is followed by `fsync`.
    pub sync: bool,
    /// Log size in bytes that allows an automatic rewrite of the live set.
    /// `0` disables automatic compaction.
    pub compaction_threshold: usize,
    /// Largest frame the store writes. Values above the log format's hard
    /// limit are clamped to it.
    pub max_frame_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync: true,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Which ring backend a command operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    /// Topology held in process memory, read from a serialized document.
    Memory,
    /// Topology kept in an on-disk store directory.
    Persistent,
}

impl FromStr for BackendChoice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Ok(BackendChoice::Memory),
            "persistent" | "disk" | "leveldb" => Ok(BackendChoice::Persistent),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendChoice::Memory => f.write_str("memory"),
            BackendChoice::Persistent => f.write_str("persistent"),
        }
    }
}

/// Process-level settings for the `ringctl` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend: BackendChoice,
    pub location: Option<PathBuf>,
    pub algorithm: String,
    pub log_filter: String,
    pub store: StoreConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Memory,
            location: None,
            algorithm: "sha256".to_string(),
            log_filter: "warn".to_string(),
            store: StoreConfig::default(),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary lookup function. Unset keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(v) = lookup("RINGCTL_BACKEND") {
            settings.backend = v.parse()?;
        }
        if let Some(v) = lookup("RINGCTL_LOCATION") {
            if !v.is_empty() {
                settings.location = Some(PathBuf::from(v));
            }
        }
        if let Some(v) = lookup("RINGCTL_ALGORITHM") {
            settings.algorithm = v;
        }
        if let Some(v) = lookup("RINGCTL_LOG") {
            settings.log_filter = v;
        }
        if let Some(v) = lookup("RINGCTL_STORE_SYNC") {
            settings.store.sync = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "RINGCTL_STORE_SYNC",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("RINGCTL_COMPACT_MB") {
            let mb: usize = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "RINGCTL_COMPACT_MB",
                value: v.clone(),
            })?;
            settings.store.compaction_threshold = mb.saturating_mul(1024 * 1024);
        }

        Ok(settings)
    }
}
