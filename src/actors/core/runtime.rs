use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use super::behavior::{AgentBehavior, ProcessContext};
use super::health::{HealthReport, HealthStatus};
use crate::error::AgentError;
use crate::messaging::{MessageHandler, MessageQueue};
use crate::metrics::{emit, Telemetry};
use crate::models::{AgentResponse, AgentState, AgentStatus, Message, StatePatch};
use crate::store::{load_json, save_json, DurableStore, StoreError};

// ============================================================================
// Agent Runtime - durable state machine for one agent identity
// ============================================================================
//
// Lifecycle:
//   Uninitialized -> Initializing -> Ready <-> Processing
//                                      ^           |
//                                      +-- Error <-+
//
// - The first request loads (or creates) the state snapshot. Every request,
//   the first included, drains the agent's pending queue messages before it
//   is served; the actor also drains when the queue announces a new message.
// - Every state change persists the full snapshot. A failed persist restores
//   the previous in-memory snapshot, so memory never runs ahead of the store.
// - Error is left on the next request; it is never terminal.
//
// The runtime assumes it is driven by one caller at a time (see AgentActor).
//
// ============================================================================

const GENERIC_FAILURE: &str = "message processing failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Uninitialized,
    Initializing,
    Ready,
    Processing,
    Error,
}

/// Requests an agent serves itself. Anything else belongs to the domain.
#[derive(Debug, Clone)]
pub enum AgentRequest {
    Health,
    State,
    Message(Message),
    Other(String),
}

impl AgentRequest {
    pub fn route(&self) -> &str {
        match self {
            AgentRequest::Health => "health",
            AgentRequest::State => "state",
            AgentRequest::Message(_) => "message",
            AgentRequest::Other(route) => route,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AgentReply {
    Health(HealthReport),
    State(StateSnapshot),
    Message(AgentResponse),
}

/// Persisted state plus fields computed at read time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(flatten)]
    pub state: AgentState,
    pub uptime_seconds: u64,
}

pub struct AgentRuntime {
    behavior: Arc<dyn AgentBehavior>,
    store: Arc<dyn DurableStore>,
    queue: Arc<MessageQueue>,
    telemetry: Arc<dyn Telemetry>,
    state: AgentState,
    loaded: bool,
    started_at: Instant,
}

impl AgentRuntime {
    pub fn new(
        agent_id: impl Into<String>,
        behavior: Arc<dyn AgentBehavior>,
        store: Arc<dyn DurableStore>,
        queue: Arc<MessageQueue>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let state = AgentState::new(agent_id, behavior.agent_type())
            .with_domain(behavior.default_domain());
        Self {
            behavior,
            store,
            queue,
            telemetry,
            state,
            loaded: false,
            started_at: Instant::now(),
        }
    }

    pub fn state_key(agent_id: &str) -> String {
        format!("agent:{agent_id}:state")
    }

    pub fn agent_id(&self) -> &str {
        &self.state.agent_id
    }

    pub fn phase(&self) -> LifecyclePhase {
        if !self.loaded {
            return LifecyclePhase::Uninitialized;
        }
        match self.state.status {
            AgentStatus::Initializing => LifecyclePhase::Initializing,
            AgentStatus::Ready => LifecyclePhase::Ready,
            AgentStatus::Processing => LifecyclePhase::Processing,
            AgentStatus::Error => LifecyclePhase::Error,
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state.clone(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Load or create the state snapshot, then replay pending messages.
    /// Returns how many messages the replay processed. A second call is a
    /// no-op.
    pub async fn initialize(&mut self) -> Result<usize, AgentError> {
        if self.loaded {
            return Ok(0);
        }

        let key = Self::state_key(self.agent_id());
        tracing::info!(agent = %self.agent_id(), "🚀 Initializing agent");

        // A corrupt entry is replaced by defaults right away; an unreachable
        // store is left alone so a transient read error cannot clobber it.
        let (stored, persist_defaults) = match load_json::<AgentState>(self.store.as_ref(), &key).await {
            Ok(stored) => (stored, true),
            Err(e @ StoreError::Serialization(_)) => {
                tracing::warn!(
                    agent = %self.agent_id(),
                    error = %e,
                    "Stored agent state is corrupt, replacing with defaults"
                );
                (None, true)
            }
            Err(e) => {
                tracing::warn!(
                    agent = %self.agent_id(),
                    error = %e,
                    "Failed to load agent state, starting from defaults"
                );
                (None, false)
            }
        };

        match stored {
            Some(mut state) => {
                state.initialized = true;
                state.status = AgentStatus::Ready;
                self.state = state;
                tracing::debug!(
                    agent = %self.agent_id(),
                    message_count = self.state.message_count,
                    "Loaded stored state"
                );
            }
            None => {
                self.state.initialized = true;
                self.state.status = AgentStatus::Ready;
                if persist_defaults {
                    if let Err(e) = self.persist().await {
                        tracing::error!(
                            agent = %self.agent_id(),
                            error = %e,
                            "Failed to persist initial state"
                        );
                    }
                }
            }
        }
        self.loaded = true;

        Ok(self.resume().await)
    }

    /// Make the agent ready to serve a request: initialize on first contact,
    /// otherwise drain whatever arrived since the last request, and leave
    /// Error.
    pub async fn ensure_ready(&mut self) -> Result<(), AgentError> {
        if !self.loaded {
            self.initialize().await?;
        } else {
            self.resume().await;
        }

        if self.state.status == AgentStatus::Error {
            tracing::info!(agent = %self.agent_id(), "Recovering from error state");
            self.state.status = AgentStatus::Ready;
        }
        Ok(())
    }

    async fn resume(&mut self) -> usize {
        let queue = self.queue.clone();
        let agent_id = self.agent_id().to_string();

        match queue.resume(&agent_id, self).await {
            Ok(processed) => processed,
            Err(e) => {
                tracing::warn!(
                    agent = %agent_id,
                    error = %e,
                    "Could not read pending messages, will retry on next request"
                );
                0
            }
        }
    }

    /// Merge `patch` into the snapshot and persist it. On a failed persist
    /// the snapshot is restored and the error returned.
    pub async fn set_state(&mut self, patch: StatePatch) -> Result<(), AgentError> {
        let previous = self.state.clone();
        self.state.apply(patch);

        if let Err(e) = self.persist().await {
            tracing::error!(
                agent = %self.agent_id(),
                error = %e,
                "Failed to persist state, rolling back"
            );
            self.state = previous;
            return Err(e.into());
        }
        Ok(())
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let key = Self::state_key(self.agent_id());
        save_json(self.store.as_ref(), &key, &self.state, None).await
    }

    /// Run one message through the behavior and persist the outcome.
    ///
    /// A behavior failure is not an `Err`: it is counted, logged and returned
    /// as a failed `AgentResponse` carrying a generic message. `Err` means the
    /// message was rejected or the outcome could not be persisted.
    pub async fn handle_message(&mut self, message: &Message) -> Result<AgentResponse, AgentError> {
        self.behavior.validate(message)?;

        let previous = self.state.clone();
        self.state.message_count += 1;
        self.state.last_activity = Utc::now();
        self.state.status = AgentStatus::Processing;

        tracing::debug!(
            agent = %self.agent_id(),
            message_id = %message.id,
            message_type = %message.message_type,
            from = %message.from,
            "Processing message"
        );

        let behavior = self.behavior.clone();
        let mut ctx = ProcessContext::new(&self.state, &self.queue);
        let outcome = behavior.process_message(&mut ctx, message).await;
        let domain_updates = ctx.into_domain_updates();

        let response = match outcome {
            Ok(data) => {
                self.state.apply(StatePatch {
                    domain: domain_updates,
                    ..StatePatch::default()
                });
                self.state.status = AgentStatus::Ready;
                AgentResponse::ok(self.agent_id(), data)
            }
            Err(e) => {
                self.state.error_count += 1;
                self.state.status = AgentStatus::Error;
                tracing::warn!(
                    agent = %self.agent_id(),
                    message_id = %message.id,
                    error = %e,
                    "Message handler failed"
                );
                AgentResponse::failed(self.agent_id(), GENERIC_FAILURE)
            }
        };

        if let Err(e) = self.persist().await {
            tracing::error!(
                agent = %self.agent_id(),
                message_id = %message.id,
                error = %e,
                "Failed to persist message outcome, rolling back"
            );
            self.state = previous;
            return Err(e.into());
        }

        let event = if response.success {
            "message_processed"
        } else {
            "message_failed"
        };
        emit(
            self.telemetry.as_ref(),
            event,
            &[
                ("agent", self.agent_id().to_string()),
                ("message_id", message.id.clone()),
            ],
        );

        Ok(response)
    }

    /// Derive a health report, persist `lastHealthCheck` and record it.
    /// Never fails: any error becomes an unhealthy report with score 0.
    pub async fn check_health(&mut self) -> HealthReport {
        match self.try_check_health().await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(agent = %self.agent_id(), error = %e, "Health check failed");
                let report = HealthReport::failed("health check failed");
                self.record_health(&report);
                report
            }
        }
    }

    async fn try_check_health(&mut self) -> Result<HealthReport, AgentError> {
        let profile = self.behavior.scoring();
        let backlog = self
            .queue
            .pending(self.agent_id(), Some(profile.capacity.max(1)))
            .await?
            .len();

        let now = Utc::now();
        let components = self.behavior.score_components(&self.state, backlog, now);
        let score = components.score();
        let status = HealthStatus::from_score(score);

        self.set_state(StatePatch::new().last_health_check(now)).await?;

        let report = HealthReport {
            status,
            score,
            message: format!("Agent {} is {}", self.agent_id(), status),
            timestamp: now,
            details: json!({
                "agentType": self.state.agent_type,
                "components": components,
                "backlog": backlog,
                "messageCount": self.state.message_count,
                "errorCount": self.state.error_count,
                "uptimeSeconds": self.started_at.elapsed().as_secs(),
            }),
        };

        self.record_health(&report);
        Ok(report)
    }

    fn record_health(&self, report: &HealthReport) {
        emit(
            self.telemetry.as_ref(),
            "health_check",
            &[
                ("agent", self.agent_id().to_string()),
                ("status", report.status.to_string()),
                ("score", format!("{:.4}", report.score)),
            ],
        );
    }

    /// Serve one request: health, state snapshot or message.
    pub async fn dispatch(&mut self, request: AgentRequest) -> Result<AgentReply, AgentError> {
        self.ensure_ready().await?;

        match request {
            AgentRequest::Health => Ok(AgentReply::Health(self.check_health().await)),
            AgentRequest::State => Ok(AgentReply::State(self.snapshot())),
            AgentRequest::Message(message) => {
                Ok(AgentReply::Message(self.handle_message(&message).await?))
            }
            AgentRequest::Other(route) => Err(AgentError::UnknownRoute(route)),
        }
    }
}

#[async_trait]
impl MessageHandler for AgentRuntime {
    async fn handle(&mut self, message: &Message) -> Result<(), AgentError> {
        let response = match self.handle_message(message).await {
            Ok(response) => response,
            Err(e @ AgentError::Validation(_)) => {
                let error_count = self.state.error_count + 1;
                if let Err(persist) = self.set_state(StatePatch::new().error_count(error_count)).await {
                    tracing::warn!(agent = %self.agent_id(), error = %persist, "Failed to count rejected message");
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        if response.success {
            Ok(())
        } else {
            Err(AgentError::processing(&message.id, GENERIC_FAILURE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::core::health::ScoringProfile;
    use crate::messaging::ValidationError;
    use crate::metrics::testing::RecordingTelemetry;
    use crate::models::{MessageType, Payload, Priority};
    use crate::store::MemoryStore;
    use anyhow::anyhow;
    use chrono::Duration as ChronoDuration;
    use serde_json::Value;

    /// Counts handled messages in its domain state; fails on payload
    /// `{"fail": true}` and rejects `{"reject": true}` as invalid.
    struct Counter;

    #[async_trait]
    impl AgentBehavior for Counter {
        fn agent_type(&self) -> &str {
            "counter"
        }

        fn default_domain(&self) -> serde_json::Map<String, Value> {
            let mut domain = serde_json::Map::new();
            domain.insert("handled".to_string(), json!(0));
            domain
        }

        fn validate(&self, message: &Message) -> Result<(), ValidationError> {
            if message.payload.get("reject") == Some(&json!(true)) {
                return Err(ValidationError::Rejected("counter refuses this".to_string()));
            }
            Ok(())
        }

        fn scoring(&self) -> ScoringProfile {
            ScoringProfile {
                capacity: 4,
                ..ScoringProfile::default()
            }
        }

        async fn process_message(
            &self,
            ctx: &mut ProcessContext<'_>,
            message: &Message,
        ) -> anyhow::Result<Value> {
            if message.payload.get("fail") == Some(&json!(true)) {
                return Err(anyhow!("payload asked to fail"));
            }
            let handled = ctx.domain("handled").and_then(Value::as_u64).unwrap_or(0) + 1;
            ctx.set_domain("handled", json!(handled));
            Ok(json!({ "handled": handled, "id": message.id }))
        }
    }

    struct Harness {
        store: MemoryStore,
        queue: Arc<MessageQueue>,
        telemetry: Arc<RecordingTelemetry>,
    }

    impl Harness {
        fn new() -> Self {
            let store = MemoryStore::new();
            let telemetry = Arc::new(RecordingTelemetry::default());
            let queue = Arc::new(MessageQueue::new(Arc::new(store.clone()), telemetry.clone()));
            Self {
                store,
                queue,
                telemetry,
            }
        }

        fn runtime(&self, id: &str) -> AgentRuntime {
            AgentRuntime::new(
                id,
                Arc::new(Counter),
                Arc::new(self.store.clone()),
                self.queue.clone(),
                self.telemetry.clone(),
            )
        }

        async fn stored_state(&self, id: &str) -> Option<AgentState> {
            load_json(&self.store, &AgentRuntime::state_key(id)).await.unwrap()
        }
    }

    fn message(id: &str, to: &str) -> Message {
        Message::new("a", to, MessageType::Command, Payload::new()).with_id(id)
    }

    #[tokio::test]
    async fn test_first_contact_creates_and_persists_default_state() {
        let harness = Harness::new();
        let mut runtime = harness.runtime("b");
        assert_eq!(runtime.phase(), LifecyclePhase::Uninitialized);

        let reply = runtime.dispatch(AgentRequest::State).await.unwrap();

        assert_eq!(runtime.phase(), LifecyclePhase::Ready);
        let AgentReply::State(snapshot) = reply else {
            panic!("expected state reply");
        };
        assert!(snapshot.state.initialized);
        assert_eq!(snapshot.state.agent_type, "counter");
        assert_eq!(snapshot.state.domain.get("handled"), Some(&json!(0)));

        let stored = harness.stored_state("b").await.unwrap();
        assert!(stored.initialized);
        assert_eq!(stored.message_count, 0);
    }

    #[tokio::test]
    async fn test_restart_replays_pending_message() {
        let harness = Harness::new();
        let receipt = harness
            .queue
            .send(&message("m1", "b").with_priority(Priority::High))
            .await;
        assert!(receipt.success);

        // A fresh instance over the same store stands in for a restart.
        let mut runtime = harness.runtime("b");
        let replayed = runtime.initialize().await.unwrap();

        assert_eq!(replayed, 1);
        let stored = harness.stored_state("b").await.unwrap();
        assert_eq!(stored.message_count, 1);
        assert_eq!(stored.domain.get("handled"), Some(&json!(1)));

        let row = harness.queue.get("m1").await.unwrap().unwrap();
        assert!(row.processed);
        assert!(harness.queue.pending("b", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let harness = Harness::new();

        let mut first = harness.runtime("b");
        first.dispatch(AgentRequest::Message(message("m1", "b"))).await.unwrap();
        first.dispatch(AgentRequest::Message(message("m2", "b"))).await.unwrap();

        let mut second = harness.runtime("b");
        let AgentReply::State(snapshot) = second.dispatch(AgentRequest::State).await.unwrap() else {
            panic!("expected state reply");
        };
        assert_eq!(snapshot.state.message_count, 2);
        assert_eq!(snapshot.state.domain.get("handled"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_handler_failure_counts_error_and_recovers() {
        let harness = Harness::new();
        let mut runtime = harness.runtime("b");
        runtime.initialize().await.unwrap();

        let failing = Message::new(
            "a",
            "b",
            MessageType::Command,
            Payload::new().with("fail", json!(true)),
        );
        let response = runtime.handle_message(&failing).await.unwrap();

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some(GENERIC_FAILURE));
        assert_eq!(runtime.phase(), LifecyclePhase::Error);
        assert_eq!(runtime.snapshot().state.error_count, 1);
        assert_eq!(runtime.snapshot().state.message_count, 1);
        assert!(harness.telemetry.events().contains(&"message_failed".to_string()));

        runtime.dispatch(AgentRequest::State).await.unwrap();
        assert_eq!(runtime.phase(), LifecyclePhase::Ready);
    }

    #[tokio::test]
    async fn test_failed_replay_leaves_message_pending() {
        let harness = Harness::new();
        let failing = Message::new(
            "a",
            "b",
            MessageType::Command,
            Payload::new().with("fail", json!(true)),
        )
        .with_id("bad");
        harness.queue.send(&failing).await;
        harness.queue.send(&message("good", "b")).await;

        let mut runtime = harness.runtime("b");
        assert_eq!(runtime.initialize().await.unwrap(), 1);

        let pending: Vec<String> = harness
            .queue
            .pending("b", None)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(pending, vec!["bad"]);
    }

    #[tokio::test]
    async fn test_set_state_rolls_back_on_persist_failure() {
        let harness = Harness::new();
        let mut runtime = harness.runtime("b");
        runtime.initialize().await.unwrap();
        let before = runtime.snapshot().state;

        harness.store.set_fail_writes(true);
        let result = runtime
            .set_state(StatePatch::new().domain_field("mood", json!("sunny")))
            .await;

        assert!(matches!(result, Err(AgentError::Persistence(_))));
        assert_eq!(runtime.snapshot().state, before);

        harness.store.set_fail_writes(false);
        runtime
            .set_state(StatePatch::new().domain_field("mood", json!("sunny")))
            .await
            .unwrap();
        let stored = harness.stored_state("b").await.unwrap();
        assert_eq!(stored.domain.get("mood"), Some(&json!("sunny")));
    }

    #[tokio::test]
    async fn test_message_persist_failure_is_surfaced() {
        let harness = Harness::new();
        let mut runtime = harness.runtime("b");
        runtime.initialize().await.unwrap();

        harness.store.set_fail_writes(true);
        let result = runtime.handle_message(&message("m1", "b")).await;

        assert!(matches!(result, Err(AgentError::Persistence(_))));
        assert_eq!(runtime.snapshot().state.message_count, 0);
    }

    #[tokio::test]
    async fn test_load_failure_falls_back_to_defaults() {
        let harness = Harness::new();
        harness.store.set_fail_reads(true);

        let mut runtime = harness.runtime("b");
        runtime.initialize().await.unwrap();

        assert_eq!(runtime.phase(), LifecyclePhase::Ready);
        assert_eq!(runtime.snapshot().state.message_count, 0);
    }

    #[tokio::test]
    async fn test_replay_retried_after_queue_read_failure() {
        let harness = Harness::new();
        harness.queue.send(&message("m1", "b")).await;
        harness.store.set_fail_reads(true);

        let mut runtime = harness.runtime("b");
        assert_eq!(runtime.initialize().await.unwrap(), 0);

        harness.store.set_fail_reads(false);
        runtime.dispatch(AgentRequest::State).await.unwrap();

        assert_eq!(runtime.snapshot().state.message_count, 1);
        assert!(harness.queue.get("m1").await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn test_healthy_when_fresh_and_error_free() {
        let harness = Harness::new();
        let mut runtime = harness.runtime("b");
        runtime.dispatch(AgentRequest::Message(message("m1", "b"))).await.unwrap();

        let AgentReply::Health(report) = runtime.dispatch(AgentRequest::Health).await.unwrap() else {
            panic!("expected health reply");
        };

        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.score >= 0.7);
        assert!(harness.stored_state("b").await.unwrap().last_health_check.is_some());

        let fields = harness.telemetry.fields_of("health_check").unwrap();
        assert!(fields.contains(&("status".to_string(), "healthy".to_string())));
    }

    #[tokio::test]
    async fn test_unhealthy_when_stale_and_failing() {
        let harness = Harness::new();
        let mut runtime = harness.runtime("b");
        runtime.initialize().await.unwrap();
        runtime
            .set_state(
                StatePatch::new()
                    .error_count(40)
                    .last_activity(Utc::now() - ChronoDuration::days(7)),
            )
            .await
            .unwrap();

        let report = runtime.check_health().await;

        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.score < 0.3);
    }

    #[tokio::test]
    async fn test_health_check_failure_degrades_to_unhealthy() {
        let harness = Harness::new();
        let mut runtime = harness.runtime("b");
        runtime.initialize().await.unwrap();

        harness.store.set_fail_reads(true);
        let report = runtime.check_health().await;

        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.score, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let harness = Harness::new();
        let mut runtime = harness.runtime("b");

        let result = runtime.dispatch(AgentRequest::Other("orchestrate".to_string())).await;
        assert!(matches!(result, Err(AgentError::UnknownRoute(route)) if route == "orchestrate"));
    }

    #[tokio::test]
    async fn test_message_sent_to_running_agent_is_processed_on_next_request() {
        let harness = Harness::new();
        let mut runtime = harness.runtime("b");
        runtime.dispatch(AgentRequest::State).await.unwrap();

        harness.queue.send(&message("m1", "b")).await;
        let AgentReply::State(snapshot) = runtime.dispatch(AgentRequest::State).await.unwrap() else {
            panic!("expected state reply");
        };

        assert_eq!(snapshot.state.message_count, 1);
        assert!(harness.queue.get("m1").await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn test_backlog_larger_than_one_batch_is_fully_replayed() {
        let harness = Harness::new();
        for i in 0..55 {
            harness
                .queue
                .send(&message(&format!("m{i}"), "b").with_timestamp(1_000 + i))
                .await;
        }

        let mut runtime = harness.runtime("b");
        assert_eq!(runtime.initialize().await.unwrap(), 55);

        assert_eq!(runtime.snapshot().state.message_count, 55);
        assert!(harness.queue.pending("b", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_load_failure_keeps_stored_state() {
        let harness = Harness::new();
        let mut first = harness.runtime("b");
        first.dispatch(AgentRequest::Message(message("m1", "b"))).await.unwrap();

        harness.store.set_fail_reads(true);
        let mut second = harness.runtime("b");
        second.initialize().await.unwrap();
        harness.store.set_fail_reads(false);

        let stored = harness.stored_state("b").await.unwrap();
        assert_eq!(stored.message_count, 1);
    }

    #[tokio::test]
    async fn test_corrupt_stored_state_is_replaced() {
        let harness = Harness::new();
        harness
            .store
            .put(&AgentRuntime::state_key("b"), "{not json", None)
            .await
            .unwrap();

        let mut runtime = harness.runtime("b");
        runtime.initialize().await.unwrap();

        let stored = harness.stored_state("b").await.unwrap();
        assert!(stored.initialized);
        assert_eq!(stored.message_count, 0);
    }

    #[tokio::test]
    async fn test_replayed_invalid_message_is_counted_and_dead_lettered() {
        let harness = Harness::new();
        let rejected = Message::new(
            "a",
            "b",
            MessageType::Command,
            Payload::new().with("reject", json!(true)),
        )
        .with_id("bad");
        harness.queue.send(&rejected).await;

        let mut runtime = harness.runtime("b");
        assert_eq!(runtime.initialize().await.unwrap(), 0);

        assert_eq!(runtime.snapshot().state.error_count, 1);
        assert_eq!(harness.stored_state("b").await.unwrap().error_count, 1);
        assert!(harness.queue.pending("b", None).await.unwrap().is_empty());
        let letters = harness.queue.dead_letters(10).await.unwrap();
        assert_eq!(letters[0].message.id, "bad");
    }
}
