// ============================================================================
// HTTP Surface
// ============================================================================
//
// Routes:
// - GET  /health                   service liveness and registered agents
// - GET  /agents/{id}/health       agent health report
// - GET  /agents/{id}/state        agent state snapshot
// - POST /agents/{id}/message      deliver one message to an agent
// - POST /queue                    enqueue a message for later delivery
//
// Every route sits behind the request logging and rate limit middleware.
// Responses echo X-Correlation-ID. Error bodies are
// `{ "error": true, "message": ... }`; only validation failures carry detail.
//
// ============================================================================

mod error;
mod handlers;
mod middleware;

pub use error::ApiError;
pub use handlers::{configure, ApiState};
pub use middleware::{client_key, rate_limit, request_logging};
