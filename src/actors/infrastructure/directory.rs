use kameo::error::{Infallible, SendError};
use kameo::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::agent_actor::{AgentActor, Dispatch, Drain, UpdateState};
use crate::actors::core::{AgentBehavior, AgentReply, AgentRequest, AgentRuntime};
use crate::error::AgentError;
use crate::messaging::{MessageQueue, ValidationError};
use crate::metrics::Telemetry;
use crate::models::{Message as AgentMessage, StatePatch};
use crate::store::DurableStore;

// ============================================================================
// Agent Directory - identity -> actor
// ============================================================================
//
// Responsibilities:
// - Know which identities exist and which behavior each one runs
// - Spawn an identity's actor on first contact
// - Hand out the same actor for every later request, so each identity is
//   served by exactly one mailbox
// - Forward queue announcements to the recipient's actor as a Drain, so
//   messages reach a running agent without waiting for its next request
//
// ============================================================================

/// Collaborators shared by every agent the directory spawns.
#[derive(Clone)]
pub struct AgentFactory {
    store: Arc<dyn DurableStore>,
    queue: Arc<MessageQueue>,
    telemetry: Arc<dyn Telemetry>,
    behaviors: HashMap<String, Arc<dyn AgentBehavior>>,
}

impl AgentFactory {
    pub fn new(
        store: Arc<dyn DurableStore>,
        queue: Arc<MessageQueue>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            store,
            queue,
            telemetry,
            behaviors: HashMap::new(),
        }
    }

    /// Register the behavior for `agent_id`.
    pub fn register(mut self, agent_id: impl Into<String>, behavior: Arc<dyn AgentBehavior>) -> Self {
        self.behaviors.insert(agent_id.into(), behavior);
        self
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.behaviors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run the recipient's own checks on `message`. Recipients this factory
    /// does not host are accepted unchecked.
    pub fn validate_for_recipient(&self, message: &AgentMessage) -> Result<(), ValidationError> {
        match self.behaviors.get(&message.to) {
            Some(behavior) => behavior.validate(message),
            None => Ok(()),
        }
    }

    pub fn runtime_for(&self, agent_id: &str) -> Option<AgentRuntime> {
        let behavior = self.behaviors.get(agent_id)?;
        Some(AgentRuntime::new(
            agent_id,
            behavior.clone(),
            self.store.clone(),
            self.queue.clone(),
            self.telemetry.clone(),
        ))
    }
}

// ============================================================================
// Messages
// ============================================================================

pub struct GetAgent(pub String);

pub struct ListAgents;

/// A message was enqueued for this identity.
pub struct Wake(pub String);

/// Announcements were dropped; drain every running agent.
pub struct WakeAll;

// ============================================================================
// Directory Actor
// ============================================================================

pub struct AgentDirectory {
    factory: AgentFactory,
    agents: HashMap<String, ActorRef<AgentActor>>,
}

impl Actor for AgentDirectory {
    type Args = AgentFactory;
    type Error = Infallible;

    async fn on_start(factory: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(agents = ?factory.agent_ids(), "📇 AgentDirectory started");

        // Relay queue announcements into this mailbox
        let mut wakeups = factory.queue.subscribe();
        tokio::spawn(async move {
            loop {
                let sent = match wakeups.recv().await {
                    Ok(agent_id) => actor_ref.tell(Wake(agent_id)).send().await.map_err(|_| ()),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Queue announcements dropped, draining all agents");
                        actor_ref.tell(WakeAll).send().await.map_err(|_| ())
                    }
                    Err(RecvError::Closed) => break,
                };
                if sent.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            factory,
            agents: HashMap::new(),
        })
    }
}

impl AgentDirectory {
    fn agent(&mut self, agent_id: String) -> Result<ActorRef<AgentActor>, AgentError> {
        if let Some(agent) = self.agents.get(&agent_id) {
            if agent.is_alive() {
                return Ok(agent.clone());
            }
            tracing::warn!(agent = %agent_id, "Agent actor stopped, respawning");
        }

        let runtime = self
            .factory
            .runtime_for(&agent_id)
            .ok_or_else(|| AgentError::UnknownRoute(format!("agent {agent_id}")))?;

        let agent = AgentActor::spawn(runtime);
        tracing::info!(agent = %agent_id, "Spawned agent actor");
        self.agents.insert(agent_id, agent.clone());
        Ok(agent)
    }
}

impl Message<GetAgent> for AgentDirectory {
    type Reply = Result<ActorRef<AgentActor>, AgentError>;

    async fn handle(&mut self, msg: GetAgent, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.agent(msg.0)
    }
}

impl Message<Wake> for AgentDirectory {
    type Reply = ();

    async fn handle(&mut self, msg: Wake, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        // Messages for identities hosted elsewhere stay queued.
        let Ok(agent) = self.agent(msg.0) else {
            return;
        };
        if agent.tell(Drain).send().await.is_err() {
            tracing::warn!(agent = %agent.id(), "Failed to wake agent");
        }
    }
}

impl Message<WakeAll> for AgentDirectory {
    type Reply = ();

    async fn handle(&mut self, _msg: WakeAll, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        for agent_id in self.factory.agent_ids() {
            if let Ok(agent) = self.agent(agent_id) {
                let _ = agent.tell(Drain).send().await;
            }
        }
    }
}

impl Message<ListAgents> for AgentDirectory {
    type Reply = Result<Vec<String>, AgentError>;

    async fn handle(&mut self, _msg: ListAgents, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        Ok(self.factory.agent_ids())
    }
}

// ============================================================================
// Client helpers
// ============================================================================

/// Spawn the directory over `factory`.
pub fn start_directory(factory: AgentFactory) -> ActorRef<AgentDirectory> {
    AgentDirectory::spawn(factory)
}

fn unwrap_send_error<M>(err: SendError<M, AgentError>) -> AgentError {
    match err {
        SendError::HandlerError(e) => e,
        other => AgentError::Unavailable(other.to_string()),
    }
}

/// Route `request` to the actor for `agent_id`.
pub async fn dispatch(
    directory: &ActorRef<AgentDirectory>,
    agent_id: &str,
    request: AgentRequest,
) -> Result<AgentReply, AgentError> {
    let agent = directory
        .ask(GetAgent(agent_id.to_string()))
        .await
        .map_err(unwrap_send_error)?;
    agent.ask(Dispatch(request)).await.map_err(unwrap_send_error)
}

/// Apply a partial state update through the actor for `agent_id`.
pub async fn update_state(
    directory: &ActorRef<AgentDirectory>,
    agent_id: &str,
    patch: StatePatch,
) -> Result<(), AgentError> {
    let agent = directory
        .ask(GetAgent(agent_id.to_string()))
        .await
        .map_err(unwrap_send_error)?;
    agent.ask(UpdateState(patch)).await.map_err(unwrap_send_error)
}

pub async fn list_agents(directory: &ActorRef<AgentDirectory>) -> Result<Vec<String>, AgentError> {
    directory.ask(ListAgents).await.map_err(unwrap_send_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::core::ProcessContext;
    use crate::metrics::testing::RecordingTelemetry;
    use crate::models::{Message as AgentMessage, MessageType, Payload};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl AgentBehavior for Echo {
        fn agent_type(&self) -> &str {
            "echo"
        }

        async fn process_message(
            &self,
            _ctx: &mut ProcessContext<'_>,
            message: &AgentMessage,
        ) -> anyhow::Result<Value> {
            Ok(json!({ "echo": message.payload }))
        }
    }

    fn directory(store: &MemoryStore) -> (ActorRef<AgentDirectory>, Arc<MessageQueue>) {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let queue = Arc::new(MessageQueue::new(Arc::new(store.clone()), telemetry.clone()));
        let factory = AgentFactory::new(Arc::new(store.clone()), queue.clone(), telemetry)
            .register("b", Arc::new(Echo));
        (AgentDirectory::spawn(factory), queue)
    }

    #[tokio::test]
    async fn test_dispatch_reaches_registered_agent() {
        let store = MemoryStore::new();
        let (directory, _) = directory(&store);

        let message = AgentMessage::new(
            "a",
            "b",
            MessageType::Request,
            Payload::new().with("q", json!(1)),
        );
        let reply = dispatch(&directory, "b", AgentRequest::Message(message))
            .await
            .unwrap();

        let AgentReply::Message(response) = reply else {
            panic!("expected message reply");
        };
        assert!(response.success);
        assert_eq!(response.agent, "b");
        assert_eq!(response.data, Some(json!({ "echo": { "q": 1 } })));
    }

    #[tokio::test]
    async fn test_same_actor_serves_every_request() {
        let store = MemoryStore::new();
        let (directory, _) = directory(&store);

        let first = directory.ask(GetAgent("b".to_string())).await.unwrap();
        let second = directory.ask(GetAgent("b".to_string())).await.unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_unknown_agent_is_rejected() {
        let store = MemoryStore::new();
        let (directory, _) = directory(&store);

        let result = dispatch(&directory, "nobody", AgentRequest::State).await;
        assert!(matches!(result, Err(AgentError::UnknownRoute(_))));
    }

    #[tokio::test]
    async fn test_first_request_replays_backlog() {
        let store = MemoryStore::new();
        let (directory, queue) = directory(&store);
        queue
            .send(&AgentMessage::new("a", "b", MessageType::Event, Payload::new()).with_id("m1"))
            .await;

        let AgentReply::State(snapshot) = dispatch(&directory, "b", AgentRequest::State).await.unwrap() else {
            panic!("expected state reply");
        };

        assert_eq!(snapshot.state.message_count, 1);
        assert!(queue.get("m1").await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn test_update_state_goes_through_actor() {
        let store = MemoryStore::new();
        let (directory, _) = directory(&store);

        update_state(&directory, "b", StatePatch::new().domain_field("mood", json!("calm")))
            .await
            .unwrap();

        let AgentReply::State(snapshot) = dispatch(&directory, "b", AgentRequest::State).await.unwrap() else {
            panic!("expected state reply");
        };
        assert_eq!(snapshot.state.domain.get("mood"), Some(&json!("calm")));
        assert_eq!(list_agents(&directory).await.unwrap(), vec!["b".to_string()]);
    }

    async fn eventually_processed(queue: &MessageQueue, id: &str) -> bool {
        for _ in 0..100 {
            if let Some(row) = queue.get(id).await.unwrap() {
                if row.processed {
                    return true;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_running_agent_drains_new_messages_without_a_request() {
        let store = MemoryStore::new();
        let (directory, queue) = directory(&store);
        dispatch(&directory, "b", AgentRequest::State).await.unwrap();

        queue
            .send(&AgentMessage::new("a", "b", MessageType::Event, Payload::new()).with_id("late"))
            .await;

        assert!(eventually_processed(&queue, "late").await);
        let AgentReply::State(snapshot) = dispatch(&directory, "b", AgentRequest::State).await.unwrap() else {
            panic!("expected state reply");
        };
        assert_eq!(snapshot.state.message_count, 1);
    }

    #[tokio::test]
    async fn test_backlog_beyond_one_batch_is_delivered() {
        let store = MemoryStore::new();
        let (directory, queue) = directory(&store);
        for i in 0..60 {
            queue
                .send(
                    &AgentMessage::new("a", "b", MessageType::Event, Payload::new())
                        .with_id(format!("m{i}"))
                        .with_timestamp(1_000 + i),
                )
                .await;
        }

        dispatch(&directory, "b", AgentRequest::State).await.unwrap();

        assert!(eventually_processed(&queue, "m59").await);
        assert!(queue.pending("b", None).await.unwrap().is_empty());
        let AgentReply::State(snapshot) = dispatch(&directory, "b", AgentRequest::State).await.unwrap() else {
            panic!("expected state reply");
        };
        assert_eq!(snapshot.state.message_count, 60);
    }

    #[tokio::test]
    async fn test_messages_for_unhosted_recipients_stay_queued() {
        let store = MemoryStore::new();
        let (directory, queue) = directory(&store);
        queue
            .send(&AgentMessage::new("a", "elsewhere", MessageType::Event, Payload::new()).with_id("x"))
            .await;

        dispatch(&directory, "b", AgentRequest::State).await.unwrap();
        assert_eq!(queue.pending("elsewhere", None).await.unwrap().len(), 1);
    }
}
