use actix_web::{web, HttpResponse};
use chrono::Utc;
use kameo::actor::ActorRef;
use serde_json::json;
use std::sync::Arc;

use super::error::ApiError;
use crate::actors::{dispatch, list_agents, AgentDirectory, AgentFactory, AgentReply, AgentRequest};
use crate::error::AgentError;
use crate::messaging::{MessageQueue, MessageValidator};
use crate::metrics::{emit, Telemetry};

/// Shared by every handler.
#[derive(Clone)]
pub struct ApiState {
    pub directory: ActorRef<AgentDirectory>,
    /// Behaviors of the hosted agents, for checks before enqueue.
    pub agents: AgentFactory,
    pub queue: Arc<MessageQueue>,
    pub validator: MessageValidator,
    pub telemetry: Arc<dyn Telemetry>,
}

impl ApiState {
    /// Log and record a failed request, keeping the detail server-side.
    fn reject(&self, scope: &str, err: impl Into<AgentError>) -> ApiError {
        let err = err.into();
        match &err {
            AgentError::Validation(_) | AgentError::UnknownRoute(_) => {
                tracing::debug!(scope = %scope, error = %err, "Request rejected");
            }
            _ => {
                tracing::error!(scope = %scope, kind = err.kind(), error = %err, "Request failed");
            }
        }
        emit(
            self.telemetry.as_ref(),
            "request_error",
            &[("kind", err.kind().to_string()), ("scope", scope.to_string())],
        );
        ApiError(err)
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(service_health))
        .route("/queue", web::post().to(enqueue))
        .service(
            web::resource("/agents/{agent_id}/{route}")
                .route(web::get().to(agent_get))
                .route(web::post().to(agent_post)),
        );
}

async fn service_health(state: web::Data<ApiState>) -> Result<HttpResponse, ApiError> {
    let agents = list_agents(&state.directory)
        .await
        .map_err(|e| state.reject("health", e))?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "agents": agents,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

async fn agent_get(
    state: web::Data<ApiState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (agent_id, route) = path.into_inner();
    let request = match route.as_str() {
        "health" => AgentRequest::Health,
        "state" => AgentRequest::State,
        _ => AgentRequest::Other(route),
    };
    serve(&state, &agent_id, request).await
}

async fn agent_post(
    state: web::Data<ApiState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let (agent_id, route) = path.into_inner();
    let request = match route.as_str() {
        "message" => {
            let message = state
                .validator
                .parse_for(&body, &agent_id)
                .map_err(|e| state.reject(&agent_id, e))?;
            AgentRequest::Message(message)
        }
        _ => AgentRequest::Other(route),
    };
    serve(&state, &agent_id, request).await
}

async fn serve(state: &ApiState, agent_id: &str, request: AgentRequest) -> Result<HttpResponse, ApiError> {
    let reply = dispatch(&state.directory, agent_id, request)
        .await
        .map_err(|e| state.reject(agent_id, e))?;

    let response = match &reply {
        AgentReply::Message(response) if !response.success => HttpResponse::InternalServerError().json(&reply),
        _ => HttpResponse::Ok().json(&reply),
    };
    Ok(response)
}

/// Validate a message, including the recipient's own checks, and enqueue it.
async fn enqueue(state: web::Data<ApiState>, body: web::Bytes) -> Result<HttpResponse, ApiError> {
    let message = state
        .validator
        .parse(&body)
        .map_err(|e| state.reject("queue", e))?;
    state
        .agents
        .validate_for_recipient(&message)
        .map_err(|e| state.reject("queue", e))?;

    let receipt = state.queue.send(&message).await;
    if !receipt.success {
        let reason = receipt.error.unwrap_or_default();
        return Err(state.reject("queue", AgentError::TransientIo(reason)));
    }

    tracing::info!(
        message_id = %receipt.message_id,
        to = %message.to,
        priority = %message.priority,
        "📬 Message accepted"
    );
    Ok(HttpResponse::Accepted().json(receipt))
}
