use crate::messaging::ValidationError;
use crate::store::StoreError;

// ============================================================================
// Core Error Taxonomy
// ============================================================================
//
// - TransientIo:  network/storage blip on an outbound call
// - Validation:   malformed inbound message, rejected before enqueue
// - Persistence:  a state or queue write failed
// - Processing:   a domain handler failed on one message
//
// None of these are fatal. The HTTP boundary maps every variant to a generic
// response and never forwards the inner text.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    #[error("Invalid message: {0}")]
    Validation(#[from] ValidationError),

    #[error("Persistence failure: {0}")]
    Persistence(#[source] StoreError),

    #[error("Processing failed for message {message_id}: {reason}")]
    Processing { message_id: String, reason: String },

    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Agent unavailable: {0}")]
    Unavailable(String),
}

impl AgentError {
    pub fn processing(message_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        AgentError::Processing {
            message_id: message_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Short label used for telemetry and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::TransientIo(_) => "transient_io",
            AgentError::Validation(_) => "validation",
            AgentError::Persistence(_) => "persistence",
            AgentError::Processing { .. } => "processing",
            AgentError::UnknownRoute(_) => "unknown_route",
            AgentError::Unavailable(_) => "unavailable",
        }
    }
}

impl From<StoreError> for AgentError {
    fn from(err: StoreError) -> Self {
        AgentError::Persistence(err)
    }
}
