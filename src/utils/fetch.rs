use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::retry::{retry_with_backoff, RetryConfig};
use crate::metrics::{emit, Telemetry};

// ============================================================================
// Retry Client
// ============================================================================
//
// Outbound calls with a per-attempt timeout and exponential backoff. A
// non-success status counts as a failed attempt just like a transport error.
// The timeout bounds each attempt on its own, never the whole sequence.
//
// ============================================================================

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream returned status {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundResponse {
    pub status: u16,
    pub body: String,
}

impl OutboundResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as JSON, or as a plain string when it is not JSON.
    pub fn json_or_text(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
    }
}

/// A single network round trip. Implementations must not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &OutboundRequest) -> Result<OutboundResponse, FetchError>;
}

/// `Transport` over a shared reqwest client.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &OutboundRequest) -> Result<OutboundResponse, FetchError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(OutboundResponse { status, body })
    }
}

/// Failure folded into a value, for callers that must still answer their
/// own caller coherently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct RetryClient {
    transport: Arc<dyn Transport>,
    telemetry: Arc<dyn Telemetry>,
    backoff: RetryConfig,
    attempt_timeout: Duration,
}

impl RetryClient {
    pub fn new(transport: Arc<dyn Transport>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            transport,
            telemetry,
            backoff: RetryConfig::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn default_attempts(&self) -> u32 {
        self.backoff.max_attempts
    }

    /// Send `request`, making at most `max_attempts` attempts. Returns the
    /// first successful response or the last error.
    pub async fn fetch_with_retry(
        &self,
        request: &OutboundRequest,
        max_attempts: u32,
    ) -> Result<OutboundResponse, FetchError> {
        let config = self.backoff.clone().with_max_attempts(max_attempts);
        let operation = operation_label(request);

        let result = retry_with_backoff(&config, |attempt| {
            emit(
                self.telemetry.as_ref(),
                "retry_attempt",
                &[
                    ("operation", operation.clone()),
                    ("attempt", attempt.to_string()),
                ],
            );
            self.attempt(request)
        })
        .await;

        emit(
            self.telemetry.as_ref(),
            "retry_outcome",
            &[
                ("operation", operation.clone()),
                ("success", result.is_ok().to_string()),
            ],
        );

        if let Err(e) = &result {
            tracing::warn!(operation = %operation, url = %request.url, error = %e, "Outbound call failed");
        }

        result
    }

    /// `fetch_with_retry` with the default attempt count, folded into a
    /// `TaggedResult`.
    pub async fn fetch_tagged(&self, request: &OutboundRequest) -> TaggedResult {
        match self.fetch_with_retry(request, self.backoff.max_attempts).await {
            Ok(response) => TaggedResult {
                success: true,
                data: Some(response.json_or_text()),
                error: None,
            },
            Err(e) => TaggedResult {
                success: false,
                data: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn attempt(&self, request: &OutboundRequest) -> Result<OutboundResponse, FetchError> {
        let response = tokio::time::timeout(self.attempt_timeout, self.transport.execute(request))
            .await
            .map_err(|_| FetchError::Timeout(self.attempt_timeout))??;

        if !response.is_success() {
            return Err(FetchError::Status(response.status));
        }
        Ok(response)
    }
}

/// Metric label for a request: method and host, never the full URL.
fn operation_label(request: &OutboundRequest) -> String {
    let host = reqwest::Url::parse(&request.url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    format!("{} {}", request.method, host)
}
