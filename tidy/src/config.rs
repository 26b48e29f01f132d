//! Configuration management for the cleanup job.

use crate::runner::RunOptions;
use std::env;
use std::fmt;
use std::time::Duration;

const DEFAULT_TABLE: &str = "notebooks";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Which remote store the job talks to.
#[derive(Clone, PartialEq, Eq)]
pub enum Backend {
    /// Hosted REST API (tables and object storage)
    Rest { url: String, api_key: String },
    /// Direct Postgres connection (tables only)
    Postgres { database_url: String },
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Rest { url, .. } => f
                .debug_struct("Rest")
                .field("url", url)
                .field("api_key", &"<redacted>")
                .finish(),
            Backend::Postgres { .. } => f
                .debug_struct("Postgres")
                .field("database_url", &"<redacted>")
                .finish(),
        }
    }
}

/// Job configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    /// Notebook table name
    pub table: String,
    /// Storage bucket holding notebook assets
    pub bucket: String,
    /// Remove every object in `bucket` after the records pass
    pub purge_assets: bool,
    /// Plan and log only
    pub dry_run: bool,
    /// Skip upserts whose rewrite equals the stored row
    pub skip_unchanged: bool,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let backend = match (var("STORE_REST_URL"), var("DATABASE_URL")) {
            (Some(url), _) => Backend::Rest {
                url,
                api_key: var("STORE_API_KEY").ok_or(ConfigError::MissingApiKey)?,
            },
            (None, Some(database_url)) => Backend::Postgres { database_url },
            (None, None) => return Err(ConfigError::MissingBackend),
        };

        let table = var("NOTEBOOK_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string());
        let bucket = var("ASSET_BUCKET").unwrap_or_else(|| DEFAULT_TABLE.to_string());

        let flag = |key: &'static str| -> Result<bool, ConfigError> {
            var(key).map_or(Ok(false), |value| parse_bool(key, &value))
        };

        let request_timeout = match var("REQUEST_TIMEOUT_SECS") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::InvalidTimeout)?,
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self {
            backend,
            table,
            bucket,
            purge_assets: flag("PURGE_ASSETS")?,
            dry_run: flag("DRY_RUN")?,
            skip_unchanged: flag("SKIP_UNCHANGED")?,
            request_timeout,
        })
    }

    /// Options for the runner.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            collection: self.table.clone(),
            dry_run: self.dry_run,
            skip_unchanged: self.skip_unchanged,
            purge_assets: self.purge_assets,
            bucket: self.bucket.clone(),
        }
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { var }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("either STORE_REST_URL or DATABASE_URL environment variable is required")]
    MissingBackend,

    #[error("STORE_API_KEY environment variable is required with STORE_REST_URL")]
    MissingApiKey,

    #[error("Invalid boolean value for {var}")]
    InvalidBool { var: &'static str },

    #[error("Invalid REQUEST_TIMEOUT_SECS value")]
    InvalidTimeout,
}
