//! Relay error types.

use thiserror::Error;

/// Errors raised while validating consumer messages and producer items.
///
/// Every variant is a validation failure: the relay logs it and treats the
/// operation as a no-op rather than failing the caller.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The correlation id field is absent, null, or not a string.
    #[error("correlationId is missing or not a string")]
    MissingCorrelationId,
    /// The correlation id field is present but empty.
    #[error("correlationId must not be empty")]
    EmptyCorrelationId,
    /// A producer item was not a JSON object.
    #[error("item must be a JSON object")]
    NotAnObject,
    /// A consumer message could not be parsed.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether this error is an expected validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingCorrelationId | Self::EmptyCorrelationId | Self::NotAnObject | Self::Malformed(_)
        )
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
