use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::health::{ScoreComponents, ScoringProfile};
use crate::messaging::{MessageQueue, SendReceipt, ValidationError};
use crate::models::{AgentState, Message};

// ============================================================================
// Agent Behavior
// ============================================================================
//
// The single capability a concrete agent supplies: map a message to a result.
// The runtime owns state, persistence, resumption and health; a behavior only
// sees a `ProcessContext` for the duration of one message.
//
// ============================================================================

#[async_trait]
pub trait AgentBehavior: Send + Sync {
    /// Type label stored in the agent's state.
    fn agent_type(&self) -> &str;

    /// Domain fields for a freshly created agent.
    fn default_domain(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Domain-level checks run before a message is handled.
    fn validate(&self, _message: &Message) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn process_message(
        &self,
        ctx: &mut ProcessContext<'_>,
        message: &Message,
    ) -> anyhow::Result<Value>;

    fn scoring(&self) -> ScoringProfile {
        ScoringProfile::default()
    }

    fn score_components(&self, state: &AgentState, backlog: usize, now: DateTime<Utc>) -> ScoreComponents {
        self.scoring().components(state, backlog, now)
    }
}

/// What a behavior can touch while handling one message. Domain writes are
/// buffered and merged into the agent's state only if the handler succeeds.
pub struct ProcessContext<'a> {
    state: &'a AgentState,
    queue: &'a MessageQueue,
    domain_updates: Map<String, Value>,
}

impl<'a> ProcessContext<'a> {
    pub(crate) fn new(state: &'a AgentState, queue: &'a MessageQueue) -> Self {
        Self {
            state,
            queue,
            domain_updates: Map::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.state.agent_id
    }

    pub fn state(&self) -> &AgentState {
        self.state
    }

    /// Current value of a domain field, including writes made earlier in
    /// this handler.
    pub fn domain(&self, key: &str) -> Option<&Value> {
        self.domain_updates
            .get(key)
            .or_else(|| self.state.domain.get(key))
    }

    pub fn set_domain(&mut self, key: impl Into<String>, value: Value) {
        self.domain_updates.insert(key.into(), value);
    }

    /// Enqueue a message for another agent.
    pub async fn send(&self, message: &Message) -> SendReceipt {
        self.queue.send(message).await
    }

    pub(crate) fn into_domain_updates(self) -> Map<String, Value> {
        self.domain_updates
    }
}
