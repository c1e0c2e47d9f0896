// ============================================================================
// Core Agent Abstractions
// ============================================================================
//
// The generic runtime every agent shares, the behavior trait concrete agents
// implement, and health scoring.
//
// ============================================================================

pub mod behavior;
pub mod health;
pub mod runtime;

// Re-export core types
pub use behavior::{AgentBehavior, ProcessContext};
pub use health::{HealthReport, HealthStatus, ScoreComponents, ScoringProfile};
pub use runtime::{AgentReply, AgentRequest, AgentRuntime, LifecyclePhase, StateSnapshot};
