//! Represents a durable queue message and its delivery lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Delivery state of a queue message.
///
/// Messages are created `Pending`, become `Processing` when a receiver
/// claims them, and end in `Completed` (successful ack) or `DeadLetter`
/// (retry budget exhausted). The last two are terminal: no transition
/// leaves them.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    DeadLetter,
}

impl MessageStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::DeadLetter)
    }
}

/// A message in a named, per-tenant queue.
///
/// Queues are implicit: one exists for every distinct `(owner, queue_name)`
/// pair that has ever held a message. Higher `priority` is served first;
/// within a priority band delivery is FIFO by `created_at`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct QueueMessage {
    /// Unique identifier (UUID for internal DB use).
    pub id: Uuid,

    /// Tenant that sent this message and may receive/ack it.
    pub owner_id: Uuid,

    /// Name of the queue this message belongs to.
    pub queue_name: String,

    /// Payload, stored verbatim.
    pub body: String,

    /// Current delivery state.
    pub status: MessageStatus,

    /// Signed priority; higher values are delivered first.
    pub priority: i64,

    /// Failed-delivery count so far. Never exceeds `max_retries`.
    pub retry_count: i64,

    /// Retry budget before the message is dead-lettered.
    pub max_retries: i64,

    /// When the message was sent.
    pub created_at: DateTime<Utc>,

    /// When the current (or last) claim started, if any.
    pub processing_started_at: Option<DateTime<Utc>>,

    /// When the message was successfully acknowledged, if ever.
    pub completed_at: Option<DateTime<Utc>>,
}
