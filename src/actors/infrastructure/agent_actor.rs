use kameo::error::Infallible;
use kameo::prelude::*;

use crate::actors::core::{AgentReply, AgentRequest, AgentRuntime};
use crate::error::AgentError;
use crate::models::StatePatch;

// ============================================================================
// Agent Actor - one mailbox per agent identity
// ============================================================================
//
// Wraps an AgentRuntime so every request for the identity is handled one at
// a time, in arrival order. Initialization runs inside the first request,
// and every request replays the pending backlog before it is served. Drain
// replays the backlog on its own when the queue announces new messages.
//
// ============================================================================

// ============================================================================
// Messages
// ============================================================================

/// Serve a health, state or message request.
pub struct Dispatch(pub AgentRequest);

/// Merge a partial state update and persist it.
pub struct UpdateState(pub StatePatch);

/// Replay whatever is pending for this agent. Sent when the queue announces a
/// new message for it.
pub struct Drain;

// ============================================================================
// Agent Actor
// ============================================================================

pub struct AgentActor {
    runtime: AgentRuntime,
}

impl Actor for AgentActor {
    type Args = AgentRuntime;
    type Error = Infallible;

    async fn on_start(runtime: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::debug!(agent = %runtime.agent_id(), "AgentActor started");
        Ok(Self { runtime })
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<Dispatch> for AgentActor {
    type Reply = Result<AgentReply, AgentError>;

    async fn handle(&mut self, msg: Dispatch, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let route = msg.0.route().to_string();
        let result = self.runtime.dispatch(msg.0).await;

        if let Err(e) = &result {
            tracing::debug!(
                agent = %self.runtime.agent_id(),
                route = %route,
                error = %e,
                "Dispatch failed"
            );
        }
        result
    }
}

impl Message<UpdateState> for AgentActor {
    type Reply = Result<(), AgentError>;

    async fn handle(&mut self, msg: UpdateState, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.runtime.ensure_ready().await?;
        self.runtime.set_state(msg.0).await
    }
}

impl Message<Drain> for AgentActor {
    type Reply = ();

    async fn handle(&mut self, _msg: Drain, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if let Err(e) = self.runtime.ensure_ready().await {
            tracing::warn!(agent = %self.runtime.agent_id(), error = %e, "Drain failed");
        }
    }
}
