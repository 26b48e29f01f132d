//! Unified error handling for the cleanup job.

use crate::config::ConfigError;

/// Failure reported by a remote store.
///
/// Backends map their native error codes onto these variants so the runner
/// can decide on retries without looking at message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("unknown column {}: {message}", column.as_deref().unwrap_or("<unnamed>"))]
    UnknownColumn {
        column: Option<String>,
        message: String,
    },

    #[error("backend error ({}): {message}", code.as_deref().unwrap_or("no code"))]
    Backend {
        code: Option<String>,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl StoreError {
    /// The write referenced a column the remote schema lacks.
    pub fn is_unknown_column(&self, name: &str) -> bool {
        matches!(self, StoreError::UnknownColumn { column: Some(column), .. } if column == name)
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, StoreError::PermissionDenied { .. })
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum TidyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to fetch collection '{collection}': {source}")]
    Fetch {
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("Store setup failed: {0}")]
    Setup(#[from] StoreError),
}

/// Result type alias for the job.
pub type Result<T> = std::result::Result<T, TidyError>;
