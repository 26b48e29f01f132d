//! Error types for the Quire engine.

use thiserror::Error;

/// All possible errors from the Quire engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("record has no usable id")]
    MissingId,

    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Error::InvalidRecord {
            reason: reason.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(Error::MissingId.to_string(), "record has no usable id");

        let err = Error::invalid("row is not an object");
        assert_eq!(err.to_string(), "invalid record: row is not an object");
    }
}
