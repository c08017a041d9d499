//! Typed configuration from environment variables.
//!
//! Loads once at startup. In local dev, call `dotenvy::dotenv().ok()` first
//! so a `.env` file can supply the same variables.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default ledger location, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = ".quality/ledger.db";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file holding the queue table.
    pub db_path: PathBuf,
    /// How long a writer waits on a locked database before giving up.
    pub busy_timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            otel_endpoint: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; `LEDGER_BUSY_TIMEOUT_MS` must be an
    /// integer number of milliseconds when present.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let busy_timeout = match var("LEDGER_BUSY_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(raw.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "LEDGER_BUSY_TIMEOUT_MS must be milliseconds, got {raw:?}"
                ))
            })?),
            None => defaults.busy_timeout,
        };

        Ok(Self {
            db_path: var("LEDGER_DB")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            busy_timeout,
            otel_endpoint: var("OTEL_ENDPOINT").filter(|e| !e.trim().is_empty()),
            log_level: var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    /// Replace the database path (CLI `--db` wins over the environment).
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }
}
