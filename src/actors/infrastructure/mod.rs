// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// Actor hosting for agents:
// - One AgentActor per identity (single-flight execution)
// - AgentDirectory mapping identities to actors, spawning them lazily
//
// ============================================================================

// Private module declarations
mod agent_actor;
mod directory;

// Re-export for public API
pub use agent_actor::{AgentActor, Dispatch, Drain, UpdateState};
pub use directory::{
    dispatch, list_agents, start_directory, update_state, AgentDirectory, AgentFactory, GetAgent,
    ListAgents, Wake, WakeAll,
};
