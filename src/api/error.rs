use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::error::AgentError;

/// Boundary error. Only validation text is returned to the caller; every
/// other failure becomes a generic body.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub AgentError);

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            AgentError::Validation(_) => StatusCode::BAD_REQUEST,
            AgentError::UnknownRoute(_) => StatusCode::NOT_FOUND,
            AgentError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::TransientIo(_)
            | AgentError::Persistence(_)
            | AgentError::Processing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match &self.0 {
            AgentError::Validation(e) => e.to_string(),
            AgentError::UnknownRoute(_) => "not found".to_string(),
            _ => "internal error".to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "error": true,
            "message": message,
        }))
    }
}
