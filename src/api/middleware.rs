use actix_web::body::{BoxBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use serde_json::json;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::utils::{RateDecision, RateLimiter};

// ============================================================================
// Rate Limit Middleware
// ============================================================================
//
// Consults the RateLimiter before any handler runs. Allowed responses carry
// X-RateLimit-Limit / -Remaining / -Reset; rejections are 429 with
// Retry-After in whole seconds. Without a limiter in app data, requests pass
// straight through.
//
// ============================================================================

const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");
const MAX_CORRELATION_ID_LEN: usize = 128;

/// Client identity: CF-Connecting-IP, then the first X-Forwarded-For hop,
/// then the peer address.
pub fn client_key(req: &HttpRequest) -> String {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    header("cf-connecting-ip")
        .or_else(|| {
            header("x-forwarded-for")
                .and_then(|list| list.split(',').next().map(|hop| hop.trim().to_string()))
        })
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

// ============================================================================
// Request Logging Middleware
// ============================================================================
//
// Every request runs inside a `request` span carrying its correlation id,
// taken from X-Correlation-ID or generated, and echoed on the response.
// Completion is logged with status and duration: 5xx at error, 4xx at warn,
// everything else at info.
//
// ============================================================================

/// Correlation id supplied by the caller, if it is usable.
fn inbound_correlation_id(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(&CORRELATION_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_CORRELATION_ID_LEN)
        .map(str::to_string)
}

pub async fn request_logging(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let correlation_id =
        inbound_correlation_id(req.request()).unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let path = req.path().to_string();
    let client = client_key(req.request());

    let span = tracing::info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
    );
    span.in_scope(|| tracing::debug!(client = %client, "Request started"));

    let started = Instant::now();
    let result = next.call(req).instrument(span.clone()).await;
    let duration_ms = started.elapsed().as_millis() as u64;
    let _entered = span.enter();

    let mut response = match result {
        Ok(response) => response.map_into_boxed_body(),
        Err(e) => {
            tracing::error!(duration_ms, error = %e, "Request failed before a response");
            return Err(e);
        }
    };

    let status = response.status().as_u16();
    if status >= 500 {
        tracing::error!(status, duration_ms, "Request completed");
    } else if status >= 400 {
        tracing::warn!(status, duration_ms, "Request completed");
    } else {
        tracing::info!(status, duration_ms, "Request completed");
    }

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID, value);
    }
    Ok(response)
}

pub async fn rate_limit(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let Some(limiter) = req.app_data::<web::Data<RateLimiter>>().cloned() else {
        return Ok(next.call(req).await?.map_into_boxed_body());
    };

    let client = client_key(req.request());
    match limiter.check(&client).await {
        RateDecision::Limited {
            limit,
            retry_after_secs,
            reset_at,
        } => {
            tracing::warn!(client = %client, path = %req.path(), retry_after_secs, "Request rate limited");
            let response = HttpResponse::TooManyRequests()
                .insert_header(("Retry-After", retry_after_secs.to_string()))
                .insert_header((LIMIT, limit.to_string()))
                .insert_header((REMAINING, "0"))
                .insert_header((RESET, reset_at.to_string()))
                .json(json!({
                    "error": true,
                    "message": "rate limit exceeded",
                    "retryAfter": retry_after_secs,
                }));
            Ok(req.into_response(response))
        }
        RateDecision::Allowed {
            limit,
            remaining,
            reset_at,
        } => {
            let mut response = next.call(req).await?.map_into_boxed_body();
            let headers = response.headers_mut();
            headers.insert(LIMIT, HeaderValue::from(limit));
            headers.insert(REMAINING, HeaderValue::from(remaining));
            headers.insert(RESET, HeaderValue::from(reset_at));
            Ok(response)
        }
    }
}
