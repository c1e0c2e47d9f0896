use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Agent State
// ============================================================================
//
// One snapshot per actor identity. Always written whole, never field-by-field.
// The `domain` map belongs to the concrete agent and is opaque to the core.
//
// ============================================================================

pub const STATE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Initializing,
    Ready,
    Processing,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub agent_id: String,
    pub agent_type: String,
    pub initialized: bool,
    pub status: AgentStatus,
    pub version: String,
    pub message_count: u64,
    pub error_count: u64,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub domain: Map<String, Value>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            initialized: false,
            status: AgentStatus::Initializing,
            version: STATE_VERSION.to_string(),
            message_count: 0,
            error_count: 0,
            last_activity: now,
            last_health_check: None,
            created_at: now,
            domain: Map::new(),
        }
    }

    pub fn with_domain(mut self, domain: Map<String, Value>) -> Self {
        self.domain = domain;
        self
    }

    /// Merge a partial update into this snapshot. Domain keys are merged
    /// shallowly; a `null` value removes the key.
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(initialized) = patch.initialized {
            self.initialized = initialized;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(count) = patch.message_count {
            self.message_count = count;
        }
        if let Some(count) = patch.error_count {
            self.error_count = count;
        }
        if let Some(at) = patch.last_activity {
            self.last_activity = at;
        }
        if let Some(at) = patch.last_health_check {
            self.last_health_check = Some(at);
        }
        for (key, value) in patch.domain {
            if value.is_null() {
                self.domain.remove(&key);
            } else {
                self.domain.insert(key, value);
            }
        }
    }
}

/// Partial update for [`AgentState`]. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub initialized: Option<bool>,
    pub status: Option<AgentStatus>,
    pub message_count: Option<u64>,
    pub error_count: Option<u64>,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub domain: Map<String, Value>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: AgentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn last_activity(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity = Some(at);
        self
    }

    pub fn last_health_check(mut self, at: DateTime<Utc>) -> Self {
        self.last_health_check = Some(at);
        self
    }

    pub fn error_count(mut self, count: u64) -> Self {
        self.error_count = Some(count);
        self
    }

    pub fn message_count(mut self, count: u64) -> Self {
        self.message_count = Some(count);
        self
    }

    pub fn domain_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.domain.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Event,
    Command,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Notification => "notification",
            MessageType::Event => "event",
            MessageType::Command => "command",
        }
    }
}

impl FromStr for MessageType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(MessageType::Request),
            "response" => Ok(MessageType::Response),
            "notification" => Ok(MessageType::Notification),
            "event" => Ok(MessageType::Event),
            "command" => Ok(MessageType::Command),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery priority. Variant order is the read order's sort key:
/// `Urgent > High > Medium > Low`.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

/// Structured message body. Always a JSON object; the shape of its fields is
/// owned by the receiving agent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: Payload,
    pub priority: Priority,
    /// Creation time, unix milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: MessageType,
        payload: Payload,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            message_type,
            payload,
            priority: Priority::default(),
            timestamp: Utc::now().timestamp_millis(),
            processed: false,
            processed_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Outcome of handling one message, shaped for the wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub agent: String,
    pub timestamp: DateTime<Utc>,
}

impl AgentResponse {
    pub fn ok(agent: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            agent: agent.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(agent: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            agent: agent.into(),
            timestamp: Utc::now(),
        }
    }
}
