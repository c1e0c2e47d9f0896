use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::value::{CqlValue, Row};
use std::sync::Arc;
use std::time::Duration;

use super::{sort_for_delivery, DeadLetter, DurableStore, MessageRowStore, RowQuery, StoreError};
use crate::models::{Message, MessageType, Payload, Priority};

// ============================================================================
// ScyllaDB Backends
// ============================================================================
//
// agent_kv        - snapshot blobs keyed by string, expiry via USING TTL
// agent_messages  - one row per queued message, secondary index on recipient
// agent_dead_letters - messages replay rejected, stored as JSON
//
// Both writes to agent_messages are lightweight transactions (IF NOT EXISTS,
// IF processed = false) so a partition never mixes LWT and plain writes.
//
// Pending reads filter on recipient + processed with ALLOW FILTERING and
// sort client-side; backlogs per recipient are expected to stay small.
//
// ============================================================================

const MESSAGE_COLUMNS: &str =
    "id, sender, recipient, message_type, payload, priority, created_at, processed, processed_at";

type MessageRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    bool,
    Option<DateTime<Utc>>,
);

/// Create the keyspace and tables if they do not exist, then switch the
/// session to the keyspace.
pub async fn ensure_schema(session: &Session, keyspace: &str) -> Result<(), StoreError> {
    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH REPLICATION = \
                 {{'class': 'SimpleStrategy', 'replication_factor': 1}}"
            ),
            &[],
        )
        .await
        .map_err(StoreError::unavailable)?;

    session
        .use_keyspace(keyspace, false)
        .await
        .map_err(StoreError::unavailable)?;

    let statements = [
        "CREATE TABLE IF NOT EXISTS agent_kv (
            key text PRIMARY KEY,
            value text
        )",
        "CREATE TABLE IF NOT EXISTS agent_messages (
            id text PRIMARY KEY,
            sender text,
            recipient text,
            message_type text,
            payload text,
            priority text,
            created_at bigint,
            processed boolean,
            processed_at timestamp
        )",
        "CREATE INDEX IF NOT EXISTS agent_messages_recipient ON agent_messages (recipient)",
        "CREATE TABLE IF NOT EXISTS agent_dead_letters (
            id text PRIMARY KEY,
            recipient text,
            message text,
            reason text,
            failed_at timestamp
        )",
    ];

    for statement in statements {
        session
            .query_unpaged(statement, &[])
            .await
            .map_err(StoreError::unavailable)?;
    }

    tracing::info!(keyspace = %keyspace, "✅ Agent schema ready");
    Ok(())
}

// ============================================================================
// Key/Value
// ============================================================================

pub struct ScyllaStateStore {
    session: Arc<Session>,
}

impl ScyllaStateStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl DurableStore for ScyllaStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let result = self
            .session
            .query_unpaged("SELECT value FROM agent_kv WHERE key = ?", (key,))
            .await
            .map_err(StoreError::unavailable)?;

        let rows_result = result.into_rows_result().map_err(StoreError::unavailable)?;
        let row = rows_result
            .maybe_first_row::<(Option<String>,)>()
            .map_err(StoreError::unavailable)?;

        Ok(row.and_then(|(value,)| value))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        match ttl {
            Some(ttl) => {
                let ttl_secs = i32::try_from(ttl.as_secs().max(1)).unwrap_or(i32::MAX);
                self.session
                    .query_unpaged(
                        "INSERT INTO agent_kv (key, value) VALUES (?, ?) USING TTL ?",
                        (key, value, ttl_secs),
                    )
                    .await
                    .map_err(StoreError::unavailable)?;
            }
            None => {
                self.session
                    .query_unpaged(
                        "INSERT INTO agent_kv (key, value) VALUES (?, ?)",
                        (key, value),
                    )
                    .await
                    .map_err(StoreError::unavailable)?;
            }
        }

        tracing::debug!(key = %key, ttl = ?ttl, "Stored value in agent_kv");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.session
            .query_unpaged("DELETE FROM agent_kv WHERE key = ?", (key,))
            .await
            .map_err(StoreError::unavailable)?;
        Ok(())
    }
}

// ============================================================================
// Message Rows
// ============================================================================

pub struct ScyllaMessageRows {
    session: Arc<Session>,
}

impl ScyllaMessageRows {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    fn decode(row: MessageRow) -> Result<Message, StoreError> {
        let (id, from, to, message_type, payload, priority, timestamp, processed, processed_at) =
            row;

        let corrupt = |reason: String| StoreError::Corrupt {
            id: id.clone(),
            reason,
        };

        let message_type = message_type
            .parse::<MessageType>()
            .map_err(|e| corrupt(e.to_string()))?;
        let priority = priority
            .parse::<Priority>()
            .map_err(|e| corrupt(e.to_string()))?;
        let payload: Payload =
            serde_json::from_str(&payload).map_err(|e| corrupt(e.to_string()))?;

        Ok(Message {
            id,
            from,
            to,
            message_type,
            payload,
            priority,
            timestamp,
            processed,
            processed_at,
        })
    }
}

#[async_trait]
impl MessageRowStore for ScyllaMessageRows {
    async fn insert_row(&self, message: &Message) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&message.payload)?;

        self.session
            .query_unpaged(
                format!(
                    "INSERT INTO agent_messages ({MESSAGE_COLUMNS}) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS"
                ),
                (
                    &message.id,
                    &message.from,
                    &message.to,
                    message.message_type.as_str(),
                    payload,
                    message.priority.as_str(),
                    message.timestamp,
                    message.processed,
                    message.processed_at,
                ),
            )
            .await
            .map_err(StoreError::unavailable)?;

        tracing::debug!(
            message_id = %message.id,
            recipient = %message.to,
            priority = %message.priority,
            "Inserted message row"
        );

        Ok(())
    }

    async fn select_rows(&self, query: &RowQuery) -> Result<Vec<Message>, StoreError> {
        let result = self
            .session
            .query_unpaged(
                format!(
                    "SELECT {MESSAGE_COLUMNS} FROM agent_messages \
                     WHERE recipient = ? AND processed = ? ALLOW FILTERING"
                ),
                (&query.recipient, query.processed),
            )
            .await
            .map_err(StoreError::unavailable)?;

        let rows_result = result.into_rows_result().map_err(StoreError::unavailable)?;
        let rows = rows_result
            .rows::<MessageRow>()
            .map_err(StoreError::unavailable)?;

        let mut messages = Vec::new();
        for row in rows {
            let row = row.map_err(StoreError::unavailable)?;
            match Self::decode(row) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    // A bad row must not hide the rest of the backlog.
                    tracing::warn!(error = %e, "Skipping undecodable message row");
                }
            }
        }

        sort_for_delivery(&mut messages);
        messages.truncate(query.limit);
        Ok(messages)
    }

    async fn update_processed(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = self
            .session
            .query_unpaged(
                "UPDATE agent_messages SET processed = true, processed_at = ? \
                 WHERE id = ? IF processed = false",
                (at, id),
            )
            .await
            .map_err(StoreError::unavailable)?;

        let rows_result = result.into_rows_result().map_err(StoreError::unavailable)?;
        let row = rows_result
            .maybe_first_row::<Row>()
            .map_err(StoreError::unavailable)?
            .ok_or_else(|| StoreError::unavailable("conditional update returned no row"))?;

        match conditional_outcome(&row) {
            LwtOutcome::Applied | LwtOutcome::AlreadyProcessed => Ok(()),
            LwtOutcome::Missing => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn get_row(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let result = self
            .session
            .query_unpaged(
                format!("SELECT {MESSAGE_COLUMNS} FROM agent_messages WHERE id = ?"),
                (id,),
            )
            .await
            .map_err(StoreError::unavailable)?;

        let rows_result = result.into_rows_result().map_err(StoreError::unavailable)?;
        match rows_result
            .maybe_first_row::<MessageRow>()
            .map_err(StoreError::unavailable)?
        {
            Some(row) => Ok(Some(Self::decode(row)?)),
            None => Ok(None),
        }
    }

    async fn insert_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        let message = serde_json::to_string(&letter.message)?;

        self.session
            .query_unpaged(
                "INSERT INTO agent_dead_letters (id, recipient, message, reason, failed_at) \
                 VALUES (?, ?, ?, ?, ?)",
                (
                    &letter.message.id,
                    &letter.message.to,
                    message,
                    &letter.reason,
                    letter.failed_at,
                ),
            )
            .await
            .map_err(StoreError::unavailable)?;

        tracing::info!(message_id = %letter.message.id, "Message stored in dead letter table");
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        let result = self
            .session
            .query_unpaged("SELECT id, message, reason, failed_at FROM agent_dead_letters", &[])
            .await
            .map_err(StoreError::unavailable)?;

        let rows_result = result.into_rows_result().map_err(StoreError::unavailable)?;
        let rows = rows_result
            .rows::<(String, String, String, DateTime<Utc>)>()
            .map_err(StoreError::unavailable)?;

        let mut letters = Vec::new();
        for row in rows {
            let (id, message, reason, failed_at) = row.map_err(StoreError::unavailable)?;
            match serde_json::from_str::<Message>(&message) {
                Ok(message) => letters.push(DeadLetter {
                    message,
                    reason,
                    failed_at,
                }),
                Err(e) => tracing::warn!(message_id = %id, error = %e, "Skipping undecodable dead letter"),
            }
        }

        letters.sort_by_key(|letter| letter.failed_at);
        letters.truncate(limit);
        Ok(letters)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LwtOutcome {
    Applied,
    AlreadyProcessed,
    Missing,
}

/// Read a `... IF processed = false` result row: `[applied]`, then the
/// current `processed` value when the condition failed (null if no row).
fn conditional_outcome(row: &Row) -> LwtOutcome {
    let column = |index: usize| row.columns.get(index).and_then(Option::as_ref);

    match column(0) {
        Some(CqlValue::Boolean(true)) => LwtOutcome::Applied,
        _ => match column(1) {
            Some(CqlValue::Boolean(_)) => LwtOutcome::AlreadyProcessed,
            _ => LwtOutcome::Missing,
        },
    }
}
