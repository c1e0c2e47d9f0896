use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Message, MessageType, Payload, Priority};

// ============================================================================
// Ingress Validation
// ============================================================================
//
// Every message entering the system passes through here before it reaches a
// handler or the durable queue. The queue never holds a message that failed
// these checks.
//
// ============================================================================

pub const MAX_ID_LEN: usize = 255;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1_048_576;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Field `{0}` is required")]
    Missing(&'static str),

    #[error("Field `{field}` must be 1 to {max} characters")]
    Length { field: &'static str, max: usize },

    #[error("Payload must be a JSON object")]
    PayloadNotObject,

    #[error("Message exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Timestamp must be a positive integer")]
    Timestamp,

    #[error("Message addressed to `{to}` was sent to `{recipient}`")]
    WrongRecipient { to: String, recipient: String },

    #[error("Rejected by agent: {0}")]
    Rejected(String),
}

/// Wire shape accepted at ingress. `id`, `priority` and `timestamp` are
/// optional and defaulted.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MessageValidator {
    max_bytes: usize,
}

impl Default for MessageValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_BYTES)
    }
}

impl MessageValidator {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Parse and validate a raw JSON body.
    pub fn parse(&self, body: &[u8]) -> Result<Message, ValidationError> {
        self.parse_inner(body, None)
    }

    /// Parse a body delivered directly to `recipient`. A missing `to`
    /// defaults to the recipient; a different one is rejected.
    pub fn parse_for(&self, body: &[u8], recipient: &str) -> Result<Message, ValidationError> {
        self.parse_inner(body, Some(recipient))
    }

    fn parse_inner(&self, body: &[u8], recipient: Option<&str>) -> Result<Message, ValidationError> {
        if body.len() > self.max_bytes {
            return Err(ValidationError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let mut inbound: InboundMessage =
            serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))?;

        if let Some(recipient) = recipient {
            match inbound.to.as_deref() {
                None => inbound.to = Some(recipient.to_string()),
                Some(to) if to != recipient => {
                    return Err(ValidationError::WrongRecipient {
                        to: to.to_string(),
                        recipient: recipient.to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        self.validate(inbound)
    }

    pub fn validate(&self, inbound: InboundMessage) -> Result<Message, ValidationError> {
        let id = match inbound.id {
            Some(id) => checked_identifier("id", id)?,
            None => Uuid::new_v4().to_string(),
        };
        let from = checked_identifier("from", inbound.from.ok_or(ValidationError::Missing("from"))?)?;
        let to = checked_identifier("to", inbound.to.ok_or(ValidationError::Missing("to"))?)?;

        let payload = match inbound.payload {
            None => Payload::new(),
            Some(Value::Object(map)) => Payload::from(map),
            Some(_) => return Err(ValidationError::PayloadNotObject),
        };

        let timestamp = match inbound.timestamp {
            Some(ts) if ts <= 0 => return Err(ValidationError::Timestamp),
            Some(ts) => ts,
            None => Utc::now().timestamp_millis(),
        };

        let message = Message {
            id,
            from,
            to,
            message_type: inbound.message_type,
            payload,
            priority: inbound.priority.unwrap_or_default(),
            timestamp,
            processed: false,
            processed_at: None,
        };

        // The limit applies to the stored form, defaults included.
        let encoded_len = serde_json::to_vec(&message)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?
            .len();
        if encoded_len > self.max_bytes {
            return Err(ValidationError::TooLarge {
                limit: self.max_bytes,
            });
        }

        Ok(message)
    }
}

fn checked_identifier(field: &'static str, value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_ID_LEN {
        return Err(ValidationError::Length {
            field,
            max: MAX_ID_LEN,
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_defaults_are_filled_in() {
        let validator = MessageValidator::default();
        let message = validator
            .parse(&body(json!({"from": "a", "to": "b", "type": "event"})))
            .unwrap();

        assert!(!message.id.is_empty());
        assert_eq!(message.priority, Priority::Medium);
        assert!(message.timestamp > 0);
        assert!(message.payload.as_map().is_empty());
        assert!(!message.processed);
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let validator = MessageValidator::default();
        let result = validator.parse(&body(json!({"from": "a", "to": "b", "type": "query"})));
        assert!(matches!(result, Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn test_payload_must_be_object() {
        let validator = MessageValidator::default();
        let result = validator.parse(&body(json!({
            "from": "a", "to": "b", "type": "command", "payload": "do it"
        })));
        assert_eq!(result.unwrap_err(), ValidationError::PayloadNotObject);
    }

    #[test]
    fn test_missing_sender() {
        let validator = MessageValidator::default();
        let result = validator.parse(&body(json!({"to": "b", "type": "command"})));
        assert_eq!(result.unwrap_err(), ValidationError::Missing("from"));
    }

    #[test]
    fn test_oversized_body_rejected() {
        let validator = MessageValidator::new(64);
        let result = validator.parse(&body(json!({
            "from": "a", "to": "b", "type": "event",
            "payload": {"blob": "x".repeat(128)}
        })));
        assert_eq!(result.unwrap_err(), ValidationError::TooLarge { limit: 64 });
    }

    #[test]
    fn test_non_positive_timestamp_rejected() {
        let validator = MessageValidator::default();
        let result = validator.parse(&body(json!({
            "from": "a", "to": "b", "type": "event", "timestamp": 0
        })));
        assert_eq!(result.unwrap_err(), ValidationError::Timestamp);
    }

    #[test]
    fn test_parse_for_defaults_and_checks_recipient() {
        let validator = MessageValidator::default();

        let message = validator
            .parse_for(&body(json!({"from": "a", "type": "request"})), "b")
            .unwrap();
        assert_eq!(message.to, "b");

        let result = validator.parse_for(&body(json!({"from": "a", "to": "c", "type": "request"})), "b");
        assert!(matches!(result, Err(ValidationError::WrongRecipient { .. })));
    }

    #[test]
    fn test_overlong_identifier_rejected() {
        let validator = MessageValidator::default();
        let result = validator.parse(&body(json!({
            "id": "x".repeat(MAX_ID_LEN + 1), "from": "a", "to": "b", "type": "event"
        })));
        assert!(matches!(result, Err(ValidationError::Length { field: "id", .. })));
    }
}
