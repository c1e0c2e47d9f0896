use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::AgentError;
use crate::metrics::{emit, Telemetry};
use crate::models::Message;
use crate::store::{DeadLetter, MessageRowStore, RowQuery};

// ============================================================================
// Durable Message Queue
// ============================================================================
//
// Rows are appended on send, read (never removed) by consumers, and flagged
// processed once handled. There is no claim/lease step: two readers can see
// the same pending row, so delivery is at-least-once and handlers must
// tolerate duplicates (the message id is stable for de-duplication).
//
// Resumption is how an actor picks up its inbox: pending rows are replayed in
// priority+FIFO order, batch after batch, until a batch comes back short or
// makes no progress. Every successful send also announces the recipient on a
// broadcast channel so a running actor can drain without waiting for its next
// request.
//
// A row the recipient rejects as invalid can never succeed; replay moves it to
// the dead-letter area and marks it processed.
//
// ============================================================================

pub const DEFAULT_PENDING_LIMIT: usize = 50;
const WAKEUP_CAPACITY: usize = 256;

/// Result of a send. Sending never fails the caller; storage errors are
/// reported here instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendReceipt {
    pub success: bool,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Consumer invoked for each pending message during resumption.
#[async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, message: &Message) -> Result<(), AgentError>;
}

pub struct MessageQueue {
    rows: Arc<dyn MessageRowStore>,
    telemetry: Arc<dyn Telemetry>,
    pending_limit: usize,
    wakeups: broadcast::Sender<String>,
}

impl MessageQueue {
    pub fn new(rows: Arc<dyn MessageRowStore>, telemetry: Arc<dyn Telemetry>) -> Self {
        let (wakeups, _) = broadcast::channel(WAKEUP_CAPACITY);
        Self {
            rows,
            telemetry,
            pending_limit: DEFAULT_PENDING_LIMIT,
            wakeups,
        }
    }

    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit;
        self
    }

    pub fn pending_limit(&self) -> usize {
        self.pending_limit
    }

    /// Recipient ids of successful sends, in send order.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.wakeups.subscribe()
    }

    /// Append `message` as an unprocessed row.
    pub async fn send(&self, message: &Message) -> SendReceipt {
        let mut row = message.clone();
        row.processed = false;
        row.processed_at = None;

        match self.rows.insert_row(&row).await {
            Ok(()) => {
                tracing::debug!(
                    message_id = %row.id,
                    from = %row.from,
                    to = %row.to,
                    priority = %row.priority,
                    "📨 Message enqueued"
                );
                emit(
                    self.telemetry.as_ref(),
                    "message_sent",
                    &[
                        ("message_type", row.message_type.to_string()),
                        ("to", row.to.clone()),
                    ],
                );
                // No subscribers is fine: the recipient drains on its next request.
                let _ = self.wakeups.send(row.to.clone());
                SendReceipt {
                    success: true,
                    message_id: row.id,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(
                    message_id = %row.id,
                    to = %row.to,
                    error = %e,
                    "Failed to enqueue message"
                );
                emit(
                    self.telemetry.as_ref(),
                    "message_send_failed",
                    &[("to", row.to.clone())],
                );
                SendReceipt {
                    success: false,
                    message_id: row.id,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Up to `limit` unprocessed messages for `recipient`, highest priority
    /// first, oldest first within a priority.
    pub async fn pending(
        &self,
        recipient: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, AgentError> {
        let query = RowQuery::pending_for(recipient, limit.unwrap_or(self.pending_limit));
        Ok(self.rows.select_rows(&query).await?)
    }

    /// Flag `id` processed. Repeating the call changes nothing.
    pub async fn mark_processed(&self, id: &str) -> Result<(), AgentError> {
        self.rows.update_processed(id, Utc::now()).await?;
        tracing::debug!(message_id = %id, "Message marked processed");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Message>, AgentError> {
        Ok(self.rows.get_row(id).await?)
    }

    /// Park `message` in the dead-letter area and mark it processed so
    /// replay stops offering it.
    pub async fn dead_letter(&self, message: &Message, reason: &str) -> Result<(), AgentError> {
        let letter = DeadLetter {
            message: message.clone(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        self.rows.insert_dead_letter(&letter).await?;
        self.mark_processed(&message.id).await?;

        tracing::error!(
            message_id = %message.id,
            to = %message.to,
            reason = %reason,
            "💀 Message moved to dead letters"
        );
        emit(
            self.telemetry.as_ref(),
            "message_dead_lettered",
            &[("to", message.to.clone()), ("message_id", message.id.clone())],
        );
        Ok(())
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, AgentError> {
        Ok(self.rows.dead_letters(limit).await?)
    }

    /// Replay every pending message for `recipient` through `handler`, in
    /// delivery order, one batch of `pending_limit` at a time. A failing
    /// message is logged and left pending; an invalid one is dead-lettered.
    /// Returns how many messages were processed and marked.
    ///
    /// Only a failure to read the first batch is returned as an error.
    pub async fn resume(
        &self,
        recipient: &str,
        handler: &mut dyn MessageHandler,
    ) -> Result<usize, AgentError> {
        let mut processed = 0;
        let mut first_batch = true;

        loop {
            let batch = match self.pending(recipient, None).await {
                Ok(batch) => batch,
                Err(e) if first_batch => return Err(e),
                Err(e) => {
                    tracing::warn!(agent = %recipient, error = %e, "Stopped draining, pending read failed");
                    break;
                }
            };
            if batch.is_empty() {
                if first_batch {
                    tracing::debug!(agent = %recipient, "No pending messages to resume");
                }
                break;
            }
            first_batch = false;

            tracing::info!(agent = %recipient, pending = batch.len(), "🔁 Resuming pending messages");
            let outcome = self.replay_batch(recipient, &batch, handler).await;
            processed += outcome.processed;

            tracing::info!(
                agent = %recipient,
                processed = outcome.processed,
                dead_lettered = outcome.dead_lettered,
                skipped = batch.len() - outcome.processed - outcome.dead_lettered,
                "✅ Resumption batch complete"
            );

            let progressed = outcome.processed + outcome.dead_lettered > 0;
            if batch.len() < self.pending_limit || !progressed {
                break;
            }
        }

        Ok(processed)
    }

    async fn replay_batch(
        &self,
        recipient: &str,
        batch: &[Message],
        handler: &mut dyn MessageHandler,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for message in batch {
            match handler.handle(message).await {
                Ok(()) => {}
                Err(AgentError::Validation(e)) => {
                    match self.dead_letter(message, &e.to_string()).await {
                        Ok(()) => outcome.dead_lettered += 1,
                        Err(err) => {
                            tracing::error!(
                                agent = %recipient,
                                message_id = %message.id,
                                error = %err,
                                "Failed to dead-letter invalid message"
                            );
                        }
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        agent = %recipient,
                        message_id = %message.id,
                        error = %e,
                        "Pending message failed, leaving it for a later pass"
                    );
                    continue;
                }
            }

            match self.mark_processed(&message.id).await {
                Ok(()) => outcome.processed += 1,
                Err(e) => {
                    // Handled but not marked: it will be delivered again.
                    tracing::error!(
                        agent = %recipient,
                        message_id = %message.id,
                        error = %e,
                        "Failed to mark message processed"
                    );
                }
            }
        }

        outcome
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    processed: usize,
    dead_lettered: usize,
}
