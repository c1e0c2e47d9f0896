// ============================================================================
// Messaging
// ============================================================================
//
// Cross-actor communication. Actors never call each other directly; they
// enqueue messages here and the recipient picks them up on its next
// resumption pass.
//
// ============================================================================

mod queue;
mod validation;

pub use queue::{MessageHandler, MessageQueue, SendReceipt, DEFAULT_PENDING_LIMIT};
pub use validation::{
    InboundMessage, MessageValidator, ValidationError, DEFAULT_MAX_MESSAGE_BYTES, MAX_ID_LEN,
};
