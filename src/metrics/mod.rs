// Private module declaration
mod server;
mod telemetry;

use prometheus::{GaugeVec, IntCounter, IntCounterVec, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;
pub use telemetry::{emit, field, FanoutTelemetry, Fields, Telemetry, TelemetryError, TracingTelemetry};

#[cfg(test)]
pub(crate) use telemetry::testing;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Queue sends and send failures
// - Message processing outcomes per agent
// - Retry attempts and outcomes for outbound calls
// - Rate limiter rejections
// - Health checks and the latest health score per agent
//
// `Metrics` is also a `Telemetry` sink: core components record named events
// and this type maps them onto the counters above.
//
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Telemetry
    pub telemetry_events: IntCounterVec,

    // Queue Metrics
    pub messages_sent: IntCounterVec,
    pub message_send_failures: IntCounter,

    // Processing Metrics
    pub messages_processed: IntCounterVec,
    pub messages_failed: IntCounterVec,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,
    pub retry_success: IntCounterVec,
    pub retry_failure: IntCounterVec,

    // Ingress Metrics
    pub rate_limit_rejections: IntCounter,
    pub request_errors: IntCounterVec,

    // Health Metrics
    pub health_checks: IntCounterVec,
    pub health_score: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let telemetry_events = IntCounterVec::new(
            Opts::new("telemetry_events_total", "Telemetry events recorded"),
            &["event"],
        )?;
        registry.register(Box::new(telemetry_events.clone()))?;

        // Queue Metrics
        let messages_sent = IntCounterVec::new(
            Opts::new("agent_messages_sent_total", "Messages enqueued for delivery"),
            &["message_type"],
        )?;
        registry.register(Box::new(messages_sent.clone()))?;

        let message_send_failures = IntCounter::new(
            "agent_message_send_failures_total",
            "Messages that could not be enqueued",
        )?;
        registry.register(Box::new(message_send_failures.clone()))?;

        // Processing Metrics
        let messages_processed = IntCounterVec::new(
            Opts::new("agent_messages_processed_total", "Messages handled successfully"),
            &["agent"],
        )?;
        registry.register(Box::new(messages_processed.clone()))?;

        let messages_failed = IntCounterVec::new(
            Opts::new("agent_messages_failed_total", "Messages whose handler failed"),
            &["agent"],
        )?;
        registry.register(Box::new(messages_failed.clone()))?;

        // Retry Metrics
        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let retry_success = IntCounterVec::new(
            Opts::new("retry_success_total", "Total successful retried operations"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_success.clone()))?;

        let retry_failure = IntCounterVec::new(
            Opts::new("retry_failure_total", "Total failed operations after all attempts"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_failure.clone()))?;

        // Ingress Metrics
        let rate_limit_rejections = IntCounter::new(
            "rate_limit_rejections_total",
            "Requests rejected by the rate limiter",
        )?;
        registry.register(Box::new(rate_limit_rejections.clone()))?;

        let request_errors = IntCounterVec::new(
            Opts::new("request_errors_total", "Requests that ended in an internal error"),
            &["kind"],
        )?;
        registry.register(Box::new(request_errors.clone()))?;

        // Health Metrics
        let health_checks = IntCounterVec::new(
            Opts::new("agent_health_checks_total", "Health checks by resulting status"),
            &["agent", "status"],
        )?;
        registry.register(Box::new(health_checks.clone()))?;

        let health_score = GaugeVec::new(
            Opts::new("agent_health_score", "Latest health score (0.0 - 1.0)"),
            &["agent"],
        )?;
        registry.register(Box::new(health_score.clone()))?;

        Ok(Self {
            registry,
            telemetry_events,
            messages_sent,
            message_send_failures,
            messages_processed,
            messages_failed,
            retry_attempts_total,
            retry_success,
            retry_failure,
            rate_limit_rejections,
            request_errors,
            health_checks,
            health_score,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record retry attempt
    pub fn record_retry_attempt(&self, operation: &str, attempt: &str) -> Result<(), TelemetryError> {
        self.retry_attempts_total
            .get_metric_with_label_values(&[operation, attempt])?
            .inc();
        Ok(())
    }

    /// Helper to record retry outcome
    pub fn record_retry_outcome(&self, operation: &str, success: bool) -> Result<(), TelemetryError> {
        let counter = if success {
            &self.retry_success
        } else {
            &self.retry_failure
        };
        counter.get_metric_with_label_values(&[operation])?.inc();
        Ok(())
    }

    /// Helper to record a health check result
    pub fn record_health_check(&self, agent: &str, status: &str, score: f64) -> Result<(), TelemetryError> {
        self.health_checks
            .get_metric_with_label_values(&[agent, status])?
            .inc();
        self.health_score
            .get_metric_with_label_values(&[agent])?
            .set(score);
        Ok(())
    }
}

fn required<'a>(event: &str, fields: &'a Fields<'_>, name: &'static str) -> Result<&'a str, TelemetryError> {
    field(fields, name).ok_or_else(|| TelemetryError::MissingField {
        event: event.to_string(),
        field: name,
    })
}

impl Telemetry for Metrics {
    fn record(&self, event: &str, fields: &Fields<'_>) -> Result<(), TelemetryError> {
        self.telemetry_events
            .get_metric_with_label_values(&[event])?
            .inc();

        match event {
            "message_sent" => {
                let message_type = required(event, fields, "message_type")?;
                self.messages_sent
                    .get_metric_with_label_values(&[message_type])?
                    .inc();
            }
            "message_send_failed" => self.message_send_failures.inc(),
            "message_processed" => {
                let agent = required(event, fields, "agent")?;
                self.messages_processed
                    .get_metric_with_label_values(&[agent])?
                    .inc();
            }
            "message_failed" => {
                let agent = required(event, fields, "agent")?;
                self.messages_failed
                    .get_metric_with_label_values(&[agent])?
                    .inc();
            }
            "retry_attempt" => {
                let operation = required(event, fields, "operation")?;
                let attempt = required(event, fields, "attempt")?;
                self.record_retry_attempt(operation, attempt)?;
            }
            "retry_outcome" => {
                let operation = required(event, fields, "operation")?;
                let success = required(event, fields, "success")? == "true";
                self.record_retry_outcome(operation, success)?;
            }
            "rate_limited" => self.rate_limit_rejections.inc(),
            "request_error" => {
                let kind = required(event, fields, "kind")?;
                self.request_errors.get_metric_with_label_values(&[kind])?.inc();
            }
            "health_check" => {
                let agent = required(event, fields, "agent")?;
                let status = required(event, fields, "status")?;
                let score = required(event, fields, "score")?
                    .parse::<f64>()
                    .map_err(|e| TelemetryError::Metric(e.to_string()))?;
                self.record_health_check(agent, status, score)?;
            }
            _ => {}
        }

        Ok(())
    }
}
