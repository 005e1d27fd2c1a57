//! Wire schemas for consumer binding messages and producer items.
//!
//! Both sides name the tag `correlationId`. The legacy `restID` field sent
//! by older print clients is accepted as an alias.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{RelayError, Result};
use crate::ids::CorrelationId;

/// Primary wire name of the correlation field.
pub const CORRELATION_FIELD: &str = "correlationId";
/// Legacy wire name accepted from older clients.
pub const LEGACY_CORRELATION_FIELD: &str = "restID";

/// A consumer's binding request: `{"correlationId": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ConsumerMessage {
    /// Correlation id to bind the connection to.
    #[serde(rename = "correlationId", alias = "restID")]
    pub correlation_id: CorrelationId,
}

impl ConsumerMessage {
    /// Parse a raw text frame.
    ///
    /// Invalid JSON maps to [`RelayError::Malformed`]; a missing, null,
    /// non-string, or empty id maps to the matching correlation error.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(map) = value else {
            return Err(RelayError::MissingCorrelationId);
        };
        let correlation_id = extract_correlation_id(&map)?;
        Ok(Self { correlation_id })
    }
}

/// A producer-submitted item.
///
/// `payload` is the whole submitted object, correlation field included,
/// and is relayed to consumers without modification.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    /// Tag used to select recipients.
    pub correlation_id: CorrelationId,
    /// Opaque body relayed verbatim.
    pub payload: Map<String, Value>,
}

impl Item {
    /// Validate a decoded JSON body as an item.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(payload) = value else {
            return Err(RelayError::NotAnObject);
        };
        let correlation_id = extract_correlation_id(&payload)?;
        Ok(Self {
            correlation_id,
            payload,
        })
    }

    /// Serialize the payload to the text frame sent to consumers.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.payload)?)
    }
}

fn extract_correlation_id(map: &Map<String, Value>) -> Result<CorrelationId> {
    let field = map
        .get(CORRELATION_FIELD)
        .filter(|v| !v.is_null())
        .or_else(|| map.get(LEGACY_CORRELATION_FIELD).filter(|v| !v.is_null()));
    match field {
        Some(Value::String(s)) => CorrelationId::parse(s.as_str()),
        _ => Err(RelayError::MissingCorrelationId),
    }
}
