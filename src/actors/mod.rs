// ============================================================================
// Actors Module
// ============================================================================
//
// Durable agents and the actors that host them.
//
// Structure:
// - core/           - Generic runtime, behavior trait, health scoring
// - infrastructure/ - kameo actors: per-identity AgentActor and the directory
//
// Note: Domain logic lives in `AgentBehavior` implementations (see domain/),
//       composed into the runtime rather than subclassing it.
//
// ============================================================================

// Private module declarations
mod core;
mod infrastructure;

// Re-export only what's needed in the public API
pub use core::{
    AgentBehavior, AgentReply, AgentRequest, AgentRuntime, HealthReport, HealthStatus,
    LifecyclePhase, ProcessContext, ScoreComponents, ScoringProfile, StateSnapshot,
};
pub use infrastructure::{
    dispatch, list_agents, start_directory, update_state, AgentActor, AgentDirectory, AgentFactory, Dispatch,
    Drain, GetAgent, ListAgents, UpdateState, Wake, WakeAll,
};
