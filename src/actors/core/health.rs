use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::models::AgentState;

// ============================================================================
// Health Scoring
// ============================================================================
//
// An agent's health score is the unweighted mean of three sub-scores, each
// clamped to [0, 1]:
//
// - recency:     1.0 while the agent was active inside the fresh window,
//                falling linearly to 0.0 at the stale horizon
// - utilization: queue headroom (backlog vs capacity) times the share of
//                handled messages that succeeded
// - errors:      max(0, 1 - errorCount / errorCeiling)
//
// The score maps to a status: < 0.3 unhealthy, < 0.7 degraded, else healthy.
//
// ============================================================================

pub const UNHEALTHY_BELOW: f64 = 0.3;
pub const DEGRADED_BELOW: f64 = 0.7;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score < UNHEALTHY_BELOW {
            HealthStatus::Unhealthy
        } else if score < DEGRADED_BELOW {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a health check. Derived on demand, never stored.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub score: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

impl HealthReport {
    /// Report used when the check itself could not be completed.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            score: 0.0,
            message: message.into(),
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct ScoreComponents {
    pub recency: f64,
    pub utilization: f64,
    pub errors: f64,
}

impl ScoreComponents {
    pub fn new(recency: f64, utilization: f64, errors: f64) -> Self {
        Self {
            recency: unit(recency),
            utilization: unit(utilization),
            errors: unit(errors),
        }
    }

    pub fn score(&self) -> f64 {
        unit((self.recency + self.utilization + self.errors) / 3.0)
    }
}

/// Per-agent scoring parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringProfile {
    pub fresh_window: Duration,
    pub stale_after: Duration,
    /// Pending messages at which queue headroom reaches zero
    pub capacity: usize,
    pub error_ceiling: u64,
}

impl Default for ScoringProfile {
    fn default() -> Self {
        Self {
            fresh_window: Duration::from_secs(5 * 60),
            stale_after: Duration::from_secs(24 * 60 * 60),
            capacity: 50,
            error_ceiling: 10,
        }
    }
}

impl ScoringProfile {
    pub fn components(&self, state: &AgentState, backlog: usize, now: DateTime<Utc>) -> ScoreComponents {
        ScoreComponents::new(
            self.recency(state.last_activity, now),
            self.utilization(state, backlog),
            self.error_penalty(state.error_count),
        )
    }

    pub fn recency(&self, last_activity: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let idle = (now - last_activity).num_milliseconds().max(0) as f64;
        let fresh = self.fresh_window.as_millis() as f64;
        let stale = self.stale_after.as_millis() as f64;

        if idle <= fresh {
            1.0
        } else if idle >= stale || stale <= fresh {
            0.0
        } else {
            1.0 - (idle - fresh) / (stale - fresh)
        }
    }

    pub fn utilization(&self, state: &AgentState, backlog: usize) -> f64 {
        let headroom = if self.capacity == 0 {
            1.0
        } else {
            1.0 - (backlog as f64 / self.capacity as f64).min(1.0)
        };

        let success_share = if state.message_count == 0 && state.error_count == 0 {
            1.0
        } else {
            let handled = state.message_count.max(state.error_count) as f64;
            state.message_count.saturating_sub(state.error_count) as f64 / handled
        };

        unit(headroom * success_share)
    }

    pub fn error_penalty(&self, error_count: u64) -> f64 {
        if self.error_ceiling == 0 {
            return if error_count == 0 { 1.0 } else { 0.0 };
        }
        (1.0 - error_count as f64 / self.error_ceiling as f64).max(0.0)
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
