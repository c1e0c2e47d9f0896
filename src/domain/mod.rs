// ============================================================================
// Domain Layer - Agent Behaviors
// ============================================================================
//
// Concrete agents. Each one is an `AgentBehavior` composed into the generic
// runtime; none of them touch persistence, resumption or health directly.
//
// ============================================================================

pub mod orchestrator;

pub use orchestrator::{Orchestrator, ORCHESTRATOR_TYPE};
