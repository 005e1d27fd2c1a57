//! Branded ID newtypes.
//!
//! [`ConnectionId`] is minted by the relay for every accepted consumer
//! channel (UUID v7, time-ordered). [`CorrelationId`] is supplied by
//! producers and consumers and is opaque to the relay apart from the
//! non-empty check.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::RelayError;

/// Unique identifier for a live consumer connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new random ID (`conn_` + UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque tag matching producer items to interested consumers.
///
/// Never empty. Construct with [`CorrelationId::parse`]; deserialization
/// applies the same check.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Validate and wrap a correlation id.
    pub fn parse(value: impl Into<String>) -> Result<Self, RelayError> {
        let value = value.into();
        if value.is_empty() {
            return Err(RelayError::EmptyCorrelationId);
        }
        Ok(Self(value))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"));
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn connection_id_display_matches_inner() {
        let id = ConnectionId::from("conn_fixed");
        assert_eq!(id.to_string(), "conn_fixed");
    }

    #[test]
    fn correlation_id_accepts_non_empty() {
        let id = CorrelationId::parse("job-42").unwrap();
        assert_eq!(id.as_str(), "job-42");
        assert_eq!(id.to_string(), "job-42");
    }

    #[test]
    fn correlation_id_rejects_empty() {
        assert_matches!(CorrelationId::parse(""), Err(RelayError::EmptyCorrelationId));
    }

    #[test]
    fn correlation_id_keeps_whitespace() {
        // Opaque: no trimming or normalization.
        let id = CorrelationId::parse(" a ").unwrap();
        assert_eq!(id.as_str(), " a ");
    }

    #[test]
    fn correlation_id_deserialize_validates() {
        let ok: CorrelationId = serde_json::from_str(r#""rest-7""#).unwrap();
        assert_eq!(ok.as_str(), "rest-7");
        let err = serde_json::from_str::<CorrelationId>(r#""""#);
        assert!(err.is_err());
    }

    #[test]
    fn correlation_id_serializes_as_string() {
        let id = CorrelationId::parse("x").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""x""#);
    }
}
