//! # Purchasing Configuration
//!
//! Settings for the purchasing service: retry policy for optimistic
//! transactions and the database location.
//!
//! Retries back off exponentially with jitter, starting near
//! `retry_backoff_ms` and doubling up to `max_backoff_ms`; `max_retries`
//! caps how many times a lost race is retried.
//!
//! ## Configuration Sources (Priority Order)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Loading                                │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ALMACEN_MAX_RETRIES=8                                              │
//! │     ALMACEN_RETRY_BACKOFF_MS=25                                        │
//! │     ALMACEN_MAX_BACKOFF_MS=2000                                        │
//! │     ALMACEN_DATABASE_PATH=/var/lib/almacen/almacen.db                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  2. Config File (almacen.toml)                                         │
//! │     max_retries = 5                                                    │
//! │     retry_backoff_ms = 10                                              │
//! │     max_backoff_ms = 1000                                              │
//! │     database_path = "./almacen.db"                                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  3. Defaults (lowest priority)                                         │
//! │     max_retries = 5, retry_backoff_ms = 10, database_path = almacen.db │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "almacen.toml";

/// Each retry sleeps a random duration within ±this fraction of the
/// current interval, so racing writers do not retry in lockstep.
pub const RETRY_JITTER: f64 = 0.5;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Purchasing service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasingConfig {
    /// Retries after a lost optimistic race before giving up with
    /// `PurchasingError::Conflict`.
    /// Default: 5
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry interval; doubles on every further retry.
    /// Default: 10
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Ceiling for the retry interval before jitter.
    /// Default: 1000
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// SQLite file used by binaries.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    1_000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("almacen.db")
}

impl Default for PurchasingConfig {
    fn default() -> Self {
        PurchasingConfig {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            database_path: default_database_path(),
        }
    }
}

impl PurchasingConfig {
    /// Loads configuration from file (if present) and process environment.
    ///
    /// With `config_path == None`, `almacen.toml` in the working directory
    /// is used when it exists.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(config_path, |key| std::env::var(key).ok())
    }

    /// [`load`](Self::load) with an injectable environment lookup.
    pub fn load_with<F>(config_path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            info!(?path, "Loading purchasing config from file");
            let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&contents)?
        } else {
            debug!(?path, "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides(env)?;
        config.validate()?;

        Ok(config)
    }

    /// Applies `ALMACEN_*` overrides.
    fn apply_env_overrides<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = env("ALMACEN_MAX_RETRIES") {
            self.max_retries = parse_env("ALMACEN_MAX_RETRIES", &raw)?;
            debug!(max_retries = self.max_retries, "Overriding max_retries from environment");
        }

        if let Some(raw) = env("ALMACEN_RETRY_BACKOFF_MS") {
            self.retry_backoff_ms = parse_env("ALMACEN_RETRY_BACKOFF_MS", &raw)?;
            debug!(
                retry_backoff_ms = self.retry_backoff_ms,
                "Overriding retry_backoff_ms from environment"
            );
        }

        if let Some(raw) = env("ALMACEN_MAX_BACKOFF_MS") {
            self.max_backoff_ms = parse_env("ALMACEN_MAX_BACKOFF_MS", &raw)?;
            debug!(
                max_backoff_ms = self.max_backoff_ms,
                "Overriding max_backoff_ms from environment"
            );
        }

        if let Some(raw) = env("ALMACEN_DATABASE_PATH") {
            debug!(path = %raw, "Overriding database path from environment");
            self.database_path = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > 100 {
            return Err(ConfigError::InvalidValue {
                key: "max_retries".to_string(),
                value: self.max_retries.to_string(),
                reason: "must be at most 100".to_string(),
            });
        }

        if self.retry_backoff_ms > 10_000 {
            return Err(ConfigError::InvalidValue {
                key: "retry_backoff_ms".to_string(),
                value: self.retry_backoff_ms.to_string(),
                reason: "must be at most 10000".to_string(),
            });
        }

        if self.max_backoff_ms < self.retry_backoff_ms || self.max_backoff_ms > 60_000 {
            return Err(ConfigError::InvalidValue {
                key: "max_backoff_ms".to_string(),
                value: self.max_backoff_ms.to_string(),
                reason: "must be between retry_backoff_ms and 60000".to_string(),
            });
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "database_path".to_string(),
                value: String::new(),
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Fresh retry schedule for one mutation.
    ///
    /// Never runs out on its own; the caller stops after `max_retries`.
    pub fn backoff(&self) -> ExponentialBackoff {
        let initial = Duration::from_millis(self.retry_backoff_ms);
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: RETRY_JITTER,
            multiplier: 2.0,
            max_interval: Duration::from_millis(self.max_backoff_ms),
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
