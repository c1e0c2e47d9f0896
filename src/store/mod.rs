// ============================================================================
// Storage Collaborators
// ============================================================================
//
// The core never talks to a database directly. It consumes two contracts:
//
// - DurableStore:    key/value with optional TTL (agent state, rate limits)
// - MessageRowStore: insert / select-filter-order-limit / update (queue rows),
//                    plus a dead-letter area for rows replay rejects
//
// Backends:
// - memory        - in-process fake with failure injection, used by tests
// - scylla_store  - ScyllaDB tables `agent_kv` and `agent_messages`
// - redis_store   - Redis strings with SET EX, used for rate-limit counters
//
// ============================================================================

mod memory;
mod redis_store;
mod scylla_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use scylla_store::{ensure_schema, ScyllaMessageRows, ScyllaStateStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::Message;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Corrupt row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Key/value persistence with optional per-key expiry.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Filter for [`MessageRowStore::select_rows`].
#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    pub recipient: String,
    pub processed: bool,
    pub limit: usize,
}

impl RowQuery {
    pub fn pending_for(recipient: impl Into<String>, limit: usize) -> Self {
        Self {
            recipient: recipient.into(),
            processed: false,
            limit,
        }
    }
}

/// Row-oriented persistence for queued messages.
#[async_trait]
pub trait MessageRowStore: Send + Sync {
    /// Insert a new row. An existing row with the same id is left untouched.
    async fn insert_row(&self, message: &Message) -> Result<(), StoreError>;

    /// Rows matching `query`, in delivery order (see [`sort_for_delivery`]),
    /// truncated to `query.limit`.
    async fn select_rows(&self, query: &RowQuery) -> Result<Vec<Message>, StoreError>;

    /// Flag a row processed. Rows already processed keep their original
    /// `processed_at`.
    async fn update_processed(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn get_row(&self, id: &str) -> Result<Option<Message>, StoreError>;

    /// Park a message that can never be handled, keyed by its id.
    async fn insert_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError>;

    /// Up to `limit` parked messages, oldest failure first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError>;
}

/// A queued message that was rejected during replay, kept for manual
/// inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub message: Message,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Priority descending, then creation time ascending. The sort is stable so
/// rows with equal keys keep their input order.
pub fn sort_for_delivery(rows: &mut [Message]) {
    rows.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
}

pub async fn load_json<T: DeserializeOwned>(
    store: &dyn DurableStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn save_json<T: Serialize>(
    store: &dyn DurableStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.put(key, &raw, ttl).await
}
