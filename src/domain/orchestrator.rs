use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::actors::{AgentBehavior, ProcessContext};
use crate::messaging::ValidationError;
use crate::models::{Message, MessageType, Payload, Priority};
use crate::utils::{OutboundRequest, RetryClient};

// ============================================================================
// Orchestrator - reference agent
// ============================================================================
//
// Coordinates the other agents. Actions (payload field `action`):
// - status_report  known agents and how many messages this agent handled
// - health_check   liveness answer
// - forward        enqueue a message for another agent
// - fetch_url      call an external URL through the retry client
// - anything else  acknowledged with `received: true`
//
// ============================================================================

pub const ORCHESTRATOR_TYPE: &str = "orchestrator";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action {
    StatusReport,
    HealthCheck,
    Forward {
        to: String,
        #[serde(rename = "type", default = "default_forward_type")]
        message_type: MessageType,
        #[serde(default)]
        priority: Priority,
        #[serde(default)]
        payload: Payload,
    },
    FetchUrl {
        url: String,
    },
    #[serde(other)]
    Other,
}

fn default_forward_type() -> MessageType {
    MessageType::Notification
}

fn parse_action(payload: &Payload) -> Result<Action, ValidationError> {
    if payload.get("action").is_none() {
        return Ok(Action::Other);
    }
    serde_json::from_value(Value::Object(payload.as_map().clone()))
        .map_err(|e| ValidationError::Rejected(e.to_string()))
}

pub struct Orchestrator {
    known_agents: Vec<String>,
    client: Option<Arc<RetryClient>>,
}

impl Orchestrator {
    pub fn new(known_agents: Vec<String>) -> Self {
        Self {
            known_agents,
            client: None,
        }
    }

    pub fn with_client(mut self, client: Arc<RetryClient>) -> Self {
        self.client = Some(client);
        self
    }

    fn bump_handled(ctx: &mut ProcessContext<'_>) -> u64 {
        let handled = ctx.domain("handled").and_then(Value::as_u64).unwrap_or(0) + 1;
        ctx.set_domain("handled", json!(handled));
        handled
    }
}

#[async_trait]
impl AgentBehavior for Orchestrator {
    fn agent_type(&self) -> &str {
        ORCHESTRATOR_TYPE
    }

    fn default_domain(&self) -> Map<String, Value> {
        let mut domain = Map::new();
        domain.insert("handled".to_string(), json!(0));
        domain
    }

    fn validate(&self, message: &Message) -> Result<(), ValidationError> {
        match parse_action(&message.payload)? {
            Action::Forward { to, .. } if to.trim().is_empty() => Err(ValidationError::Missing("to")),
            Action::FetchUrl { url } if reqwest::Url::parse(&url).is_err() => {
                Err(ValidationError::Rejected(format!("invalid url `{url}`")))
            }
            _ => Ok(()),
        }
    }

    async fn process_message(
        &self,
        ctx: &mut ProcessContext<'_>,
        message: &Message,
    ) -> anyhow::Result<Value> {
        let handled = Self::bump_handled(ctx);
        let action = parse_action(&message.payload)?;

        match action {
            Action::StatusReport => Ok(json!({
                "agents": self.known_agents,
                "status": "operational",
                "handled": handled,
            })),

            Action::HealthCheck => Ok(json!({
                "system": "healthy",
                "timestamp": Utc::now().to_rfc3339(),
            })),

            Action::Forward {
                to,
                message_type,
                priority,
                payload,
            } => {
                let outbound = Message::new(ctx.agent_id(), to.trim(), message_type, payload)
                    .with_priority(priority);
                let receipt = ctx.send(&outbound).await;
                tracing::debug!(
                    agent = %ctx.agent_id(),
                    to = %outbound.to,
                    message_id = %receipt.message_id,
                    success = receipt.success,
                    "Forwarded message"
                );
                Ok(json!({
                    "forwarded": receipt.success,
                    "messageId": receipt.message_id,
                    "to": outbound.to,
                }))
            }

            Action::FetchUrl { url } => {
                let client = self
                    .client
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("no outbound client configured"))?;
                let result = client.fetch_tagged(&OutboundRequest::get(url.as_str())).await;
                Ok(json!({ "url": url, "result": result }))
            }

            Action::Other => Ok(json!({
                "received": true,
                "action": message.payload.get_str("action").unwrap_or("unknown"),
                "timestamp": Utc::now().to_rfc3339(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::{AgentReply, AgentRequest, AgentRuntime};
    use crate::messaging::MessageQueue;
    use crate::metrics::testing::RecordingTelemetry;
    use crate::store::MemoryStore;
    use crate::utils::{FetchError, OutboundResponse, RetryConfig, Transport};
    use std::time::Duration;

    struct Harness {
        queue: Arc<MessageQueue>,
        runtime: AgentRuntime,
    }

    fn harness(orchestrator: Orchestrator) -> Harness {
        let store = MemoryStore::new();
        let telemetry = Arc::new(RecordingTelemetry::default());
        let queue = Arc::new(MessageQueue::new(Arc::new(store.clone()), telemetry.clone()));
        let runtime = AgentRuntime::new(
            "ci",
            Arc::new(orchestrator),
            Arc::new(store),
            queue.clone(),
            telemetry,
        );
        Harness { queue, runtime }
    }

    fn command(payload: Value) -> Message {
        let Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        Message::new("user", "ci", MessageType::Command, Payload::from(map))
    }

    async fn run(harness: &mut Harness, payload: Value) -> Value {
        let reply = harness
            .runtime
            .dispatch(AgentRequest::Message(command(payload)))
            .await
            .unwrap();
        let AgentReply::Message(response) = reply else {
            panic!("expected message reply");
        };
        assert!(response.success, "handler failed: {response:?}");
        response.data.unwrap()
    }

    #[tokio::test]
    async fn test_status_report_lists_agents_and_counts() {
        let mut harness = harness(Orchestrator::new(vec!["ci".into(), "mood".into()]));

        run(&mut harness, json!({"action": "health_check"})).await;
        let data = run(&mut harness, json!({"action": "status_report"})).await;

        assert_eq!(data["agents"], json!(["ci", "mood"]));
        assert_eq!(data["status"], "operational");
        assert_eq!(data["handled"], 2);
    }

    #[tokio::test]
    async fn test_unknown_action_is_acknowledged() {
        let mut harness = harness(Orchestrator::new(Vec::new()));

        let data = run(&mut harness, json!({"action": "dance"})).await;
        assert_eq!(data["received"], true);
        assert_eq!(data["action"], "dance");

        let data = run(&mut harness, json!({})).await;
        assert_eq!(data["action"], "unknown");
    }

    #[tokio::test]
    async fn test_forward_enqueues_for_recipient() {
        let mut harness = harness(Orchestrator::new(Vec::new()));

        let data = run(
            &mut harness,
            json!({
                "action": "forward",
                "to": "mood",
                "priority": "urgent",
                "payload": {"note": "hello"}
            }),
        )
        .await;
        assert_eq!(data["forwarded"], true);

        let pending = harness.queue.pending("mood", None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].from, "ci");
        assert_eq!(pending[0].priority, Priority::Urgent);
        assert_eq!(pending[0].message_type, MessageType::Notification);
        assert_eq!(pending[0].payload.get_str("note"), Some("hello"));
    }

    #[tokio::test]
    async fn test_forward_without_recipient_is_rejected() {
        let mut harness = harness(Orchestrator::new(Vec::new()));

        let result = harness
            .runtime
            .dispatch(AgentRequest::Message(command(json!({"action": "forward", "to": " "}))))
            .await;
        assert!(matches!(
            result,
            Err(crate::error::AgentError::Validation(ValidationError::Missing("to")))
        ));
    }

    struct Down;

    #[async_trait]
    impl Transport for Down {
        async fn execute(&self, _request: &OutboundRequest) -> Result<OutboundResponse, FetchError> {
            Err(FetchError::Transport("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fetch_url_returns_tagged_failure() {
        let client = RetryClient::new(Arc::new(Down), Arc::new(RecordingTelemetry::default()))
            .with_backoff(
                RetryConfig::default()
                    .with_max_attempts(2)
                    .with_initial_delay(Duration::from_millis(1)),
            );
        let mut harness = harness(Orchestrator::new(Vec::new()).with_client(Arc::new(client)));

        let data = run(&mut harness, json!({"action": "fetch_url", "url": "http://svc.local/ping"})).await;

        assert_eq!(data["result"]["success"], false);
        assert!(data["result"]["error"].as_str().unwrap().contains("unreachable"));
    }
}
