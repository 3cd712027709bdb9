//! Core runtime configuration.
//!
//! # Responsibility
//! - Describe every tunable of the core in one serde-deserializable tree.
//! - Validate settings before any connection or logger is created.
//!
//! # Invariants
//! - Every field has a default, so an empty document is a valid config.
//! - A config returned by [`CoreConfig::from_json_str`] has passed
//!   [`CoreConfig::validate`].

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_RESULTS: u32 = 1_000;
const DEFAULT_SNAPSHOT_FORMAT_VERSION: &str = "1.0";

/// Configuration parse/validation failure.
#[derive(Debug)]
pub enum ConfigError {
    /// Document is not valid JSON for the config shape.
    Parse(serde_json::Error),
    /// A field holds a value outside its accepted domain.
    Invalid { field: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid config document: {err}"),
            Self::Invalid { field, message } => write!(f, "invalid config `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

/// Top-level configuration for the snapshot/lineage core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub query: QueryConfig,
    pub snapshot: SnapshotConfig,
    pub lineage: LineageConfig,
}

/// SQLite connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file. `None` opens an in-memory database.
    pub path: Option<PathBuf>,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// File logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute log directory. `None` leaves logging uninitialised.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

/// Dashboard query limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Row cap applied to each sub-query.
    pub max_results: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// Snapshot capture settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Value written into every snapshot's `snapshot_version`.
    pub format_version: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            format_version: DEFAULT_SNAPSHOT_FORMAT_VERSION.to_string(),
        }
    }
}

/// Lineage resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    pub cache_enabled: bool,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
        }
    }
}

impl CoreConfig {
    /// Parses a JSON document and validates the result.
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value domains that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(
            self.logging.level.trim().to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "warning" | "error"
        ) {
            return Err(ConfigError::Invalid {
                field: "logging.level",
                message: format!(
                    "unsupported level `{}`; expected trace|debug|info|warn|error",
                    self.logging.level
                ),
            });
        }
        if let Some(dir) = &self.logging.dir {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid {
                    field: "logging.dir",
                    message: format!("must be an absolute path, got `{}`", dir.display()),
                });
            }
        }
        if self.query.max_results == 0 {
            return Err(ConfigError::Invalid {
                field: "query.max_results",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.snapshot.format_version.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "snapshot.format_version",
                message: "must not be blank".to_string(),
            });
        }
        Ok(())
    }
}
