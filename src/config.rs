//! Configuration management
//!
//! Built once at the process boundary and threaded into every component.

use crate::error::{EtlError, Result};
use crate::logging::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_DB_DIR: &str = "./warehouse";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_READINESS_POLL_MS: u64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub database: DatabaseConfig,
    pub readiness: ReadinessConfig,
    /// Create curated and logs tables when absent
    pub provision_schema: bool,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding `scss.db`, `ds.db` and `logs.db`
    pub dir: PathBuf,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            database: DatabaseConfig {
                dir: PathBuf::from(DEFAULT_DB_DIR),
                busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            },
            readiness: ReadinessConfig {
                timeout_secs: DEFAULT_READINESS_TIMEOUT_SECS,
                poll_interval_ms: DEFAULT_READINESS_POLL_MS,
            },
            provision_schema: true,
            logging: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup so tests never touch the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let config = Config {
            data_dir: lookup("ETL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            database: DatabaseConfig {
                dir: lookup("ETL_DB_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.database.dir),
                busy_timeout_ms: parse_or(
                    &lookup,
                    "ETL_DB_BUSY_TIMEOUT_MS",
                    defaults.database.busy_timeout_ms,
                )?,
            },
            readiness: ReadinessConfig {
                timeout_secs: parse_or(
                    &lookup,
                    "ETL_READINESS_TIMEOUT_SECS",
                    defaults.readiness.timeout_secs,
                )?,
                poll_interval_ms: parse_or(
                    &lookup,
                    "ETL_READINESS_POLL_MS",
                    defaults.readiness.poll_interval_ms,
                )?,
            },
            provision_schema: parse_or(&lookup, "ETL_PROVISION_SCHEMA", defaults.provision_schema)?,
            logging: LogConfig {
                level: parse_or(&lookup, "ETL_LOG_LEVEL", defaults.logging.level)?,
                format: parse_or::<_, LogFormat>(&lookup, "ETL_LOG_FORMAT", defaults.logging.format)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.readiness.poll_interval_ms == 0 {
            return Err(EtlError::Config(
                "ETL_READINESS_POLL_MS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| EtlError::Config(format!("invalid {}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}
