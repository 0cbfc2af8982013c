//! src/services/queue_service.rs
//!
//! QueueService — durable priority queues with at-least-once delivery,
//! backed by SQLite. A queue is not a first-class entity: it exists
//! implicitly as the set of messages sharing `(owner_id, queue_name)`.
//! Delivery is priority-descending, FIFO within a priority band, and a
//! message is handed to at most one claimant at a time.

use crate::models::message::{MessageStatus, QueueMessage};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, owner_id, queue_name, body, status, priority, \
     retry_count, max_retries, created_at, processing_started_at, completed_at";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message `{0}` not found")]
    MessageNotFound(Uuid),
    #[error("message `{id}` is already {status:?} and cannot be acknowledged")]
    AlreadyFinal { id: Uuid, status: MessageStatus },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// QueueService provides the four queue operations:
/// - Send a message (insert a PENDING row)
/// - Receive (atomically claim the highest-priority oldest PENDING message)
/// - Acknowledge (complete, or retry/dead-letter on failure)
/// - List messages in a queue regardless of status
///
/// There is no automatic reclaim of PROCESSING messages whose claimant
/// crashed; a visibility timeout would be a separate sweep over
/// `processing_started_at` and is not implemented here.
#[derive(Clone)]
pub struct QueueService {
    /// Shared SQLite connection pool used for message records.
    pub db: Arc<SqlitePool>,
}

/// Default retry budget for newly sent messages.
const DEFAULT_MAX_RETRIES: i64 = 3;

impl QueueService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Enqueue a message. The body is stored verbatim; there is no bound
    /// on queue depth. Returns the created PENDING record.
    pub async fn send(
        &self,
        owner: Uuid,
        queue_name: &str,
        body: String,
        priority: Option<i64>,
    ) -> QueueResult<QueueMessage> {
        let message = sqlx::query_as::<_, QueueMessage>(&format!(
            "INSERT INTO queue_messages (
                id, owner_id, queue_name, body, status, priority,
                retry_count, max_retries, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(queue_name)
        .bind(body)
        .bind(MessageStatus::Pending)
        .bind(priority.unwrap_or(0))
        .bind(DEFAULT_MAX_RETRIES)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        debug!(
            queue = queue_name,
            id = %message.id,
            priority = message.priority,
            "enqueued message"
        );
        Ok(message)
    }

    /// Claim the next eligible message for this tenant and queue.
    ///
    /// Eligible means PENDING; among those the highest priority wins and
    /// ties go to the oldest `created_at`. The select-and-mark step is a
    /// single UPDATE with a subquery, so SQLite executes it atomically and
    /// two concurrent receivers can never both claim the same row.
    ///
    /// Returns `None` when the queue has no PENDING message; the caller
    /// polls again later.
    pub async fn receive(&self, owner: Uuid, queue_name: &str) -> QueueResult<Option<QueueMessage>> {
        let claimed = sqlx::query_as::<_, QueueMessage>(&format!(
            "UPDATE queue_messages
             SET status = ?, processing_started_at = ?
             WHERE id = (
                 SELECT id FROM queue_messages
                 WHERE owner_id = ? AND queue_name = ? AND status = ?
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT 1
             )
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(MessageStatus::Processing)
        .bind(Utc::now())
        .bind(owner)
        .bind(queue_name)
        .bind(MessageStatus::Pending)
        .fetch_optional(&*self.db)
        .await?;

        if let Some(message) = &claimed {
            debug!(queue = queue_name, id = %message.id, "claimed message");
        }
        Ok(claimed)
    }

    /// Acknowledge a claimed message.
    ///
    /// On success the message becomes COMPLETED with `completed_at`
    /// stamped. On failure the retry count is incremented; the message
    /// returns to PENDING until the budget is spent, after which it is
    /// dead-lettered and only manual intervention can revive it.
    ///
    /// Acknowledging a message that is already COMPLETED or DEAD_LETTER
    /// is rejected with `AlreadyFinal` so a double ack cannot corrupt
    /// terminal state.
    pub async fn acknowledge(&self, owner: Uuid, id: Uuid, success: bool) -> QueueResult<()> {
        let mut tx = self.db.begin().await?;

        let message = sqlx::query_as::<_, QueueMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM queue_messages WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(QueueError::MessageNotFound(id))?;

        if message.status.is_terminal() {
            return Err(QueueError::AlreadyFinal {
                id,
                status: message.status,
            });
        }

        if success {
            sqlx::query(
                "UPDATE queue_messages SET status = ?, completed_at = ? WHERE id = ?",
            )
            .bind(MessageStatus::Completed)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        } else {
            let retry_count = message.retry_count + 1;
            let status = if retry_count >= message.max_retries {
                MessageStatus::DeadLetter
            } else {
                MessageStatus::Pending
            };
            sqlx::query(
                "UPDATE queue_messages
                 SET status = ?, retry_count = ?, processing_started_at = NULL
                 WHERE id = ?",
            )
            .bind(status)
            .bind(retry_count)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            debug!(id = %id, retry_count, ?status, "negative ack");
        }

        tx.commit().await?;
        Ok(())
    }

    /// List every message in a queue for this tenant, any status,
    /// oldest first. Read-only.
    pub async fn list(&self, owner: Uuid, queue_name: &str) -> QueueResult<Vec<QueueMessage>> {
        let messages = sqlx::query_as::<_, QueueMessage>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM queue_messages
             WHERE owner_id = ? AND queue_name = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(owner)
        .bind(queue_name)
        .fetch_all(&*self.db)
        .await?;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testutil;

    #[tokio::test]
    async fn send_then_receive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = testutil::pool_in(dir.path()).await;
        let owner = testutil::tenant(&db, "a@example.com").await;
        let queue = QueueService::new(db);

        let sent = queue.send(owner, "jobs", "hello".into(), None).await.unwrap();
        assert_eq!(sent.status, MessageStatus::Pending);
        assert_eq!(sent.priority, 0);
        assert_eq!(sent.retry_count, 0);

        let got = queue.receive(owner, "jobs").await.unwrap().unwrap();
        assert_eq!(got.id, sent.id);
        assert_eq!(got.body, "hello");
        assert_eq!(got.status, MessageStatus::Processing);
        assert!(got.processing_started_at.is_some());

        // Nothing left to claim.
        assert!(queue.receive(owner, "jobs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receive_orders_by_priority_then_age() {
        let dir = tempfile::tempdir().unwrap();
        let db = testutil::pool_in(dir.path()).await;
        let owner = testutil::tenant(&db, "a@example.com").await;
        let queue = QueueService::new(db);

        let mut sent = Vec::new();
        for priority in [5, 1, 5, 3] {
            sent.push(
                queue
                    .send(owner, "q", format!("p{priority}"), Some(priority))
                    .await
                    .unwrap(),
            );
        }

        // First 5 sent, then the second 5, then 3, then 1.
        let expected = [sent[0].id, sent[2].id, sent[3].id, sent[1].id];
        for id in expected {
            let got = queue.receive(owner, "q").await.unwrap().unwrap();
            assert_eq!(got.id, id);
        }
        assert!(queue.receive(owner, "q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claimed_message_is_never_handed_out_twice() {
        let dir = tempfile::tempdir().unwrap();
        let db = testutil::pool_in(dir.path()).await;
        let owner = testutil::tenant(&db, "a@example.com").await;
        let queue = QueueService::new(db);

        for i in 0..8 {
            queue.send(owner, "q", format!("m{i}"), None).await.unwrap();
        }

        // Race many receivers; every claim must be unique.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.receive(owner, "q").await.unwrap()
            }));
        }
        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            if let Some(message) = handle.await.unwrap() {
                assert!(ids.insert(message.id), "message claimed twice");
            }
        }
        assert_eq!(ids.len(), 8);
    }

    #[tokio::test]
    async fn failed_ack_requeues_until_dead_letter() {
        let dir = tempfile::tempdir().unwrap();
        let db = testutil::pool_in(dir.path()).await;
        let owner = testutil::tenant(&db, "a@example.com").await;
        let queue = QueueService::new(db);

        let first = queue.send(owner, "q", "one".into(), Some(10)).await.unwrap();
        let second = queue.send(owner, "q", "two".into(), Some(10)).await.unwrap();

        // Drive the first message through its whole retry budget.
        for attempt in 1..=first.max_retries {
            let got = queue.receive(owner, "q").await.unwrap().unwrap();
            assert_eq!(got.id, first.id, "attempt {attempt} claimed wrong message");
            assert_eq!(got.retry_count, attempt - 1);
            queue.acknowledge(owner, first.id, false).await.unwrap();
        }

        let all = queue.list(owner, "q").await.unwrap();
        let dead = all.iter().find(|m| m.id == first.id).unwrap();
        assert_eq!(dead.status, MessageStatus::DeadLetter);
        assert_eq!(dead.retry_count, dead.max_retries);

        // The dead-lettered message is skipped; the second one is served.
        let got = queue.receive(owner, "q").await.unwrap().unwrap();
        assert_eq!(got.id, second.id);
    }

    #[tokio::test]
    async fn ack_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let db = testutil::pool_in(dir.path()).await;
        let owner = testutil::tenant(&db, "a@example.com").await;
        let queue = QueueService::new(db);

        let sent = queue.send(owner, "q", "x".into(), None).await.unwrap();
        queue.receive(owner, "q").await.unwrap().unwrap();
        queue.acknowledge(owner, sent.id, true).await.unwrap();

        let all = queue.list(owner, "q").await.unwrap();
        assert_eq!(all[0].status, MessageStatus::Completed);
        assert!(all[0].completed_at.is_some());

        // A second ack, positive or negative, is rejected.
        let err = queue.acknowledge(owner, sent.id, true).await.unwrap_err();
        assert!(matches!(err, QueueError::AlreadyFinal { .. }));
        let err = queue.acknowledge(owner, sent.id, false).await.unwrap_err();
        assert!(matches!(err, QueueError::AlreadyFinal { .. }));
        assert_eq!(
            queue.list(owner, "q").await.unwrap()[0].status,
            MessageStatus::Completed
        );
    }

    #[tokio::test]
    async fn dead_letter_survives_further_acks() {
        let dir = tempfile::tempdir().unwrap();
        let db = testutil::pool_in(dir.path()).await;
        let owner = testutil::tenant(&db, "a@example.com").await;
        let queue = QueueService::new(db);

        let sent = queue.send(owner, "q", "x".into(), None).await.unwrap();
        for _ in 0..sent.max_retries {
            queue.receive(owner, "q").await.unwrap().unwrap();
            queue.acknowledge(owner, sent.id, false).await.unwrap();
        }

        let err = queue.acknowledge(owner, sent.id, false).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::AlreadyFinal {
                status: MessageStatus::DeadLetter,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn messages_are_scoped_to_their_owner() {
        let dir = tempfile::tempdir().unwrap();
        let db = testutil::pool_in(dir.path()).await;
        let alice = testutil::tenant(&db, "alice@example.com").await;
        let bob = testutil::tenant(&db, "bob@example.com").await;
        let queue = QueueService::new(db);

        let sent = queue.send(alice, "q", "secret".into(), None).await.unwrap();

        assert!(queue.receive(bob, "q").await.unwrap().is_none());
        assert!(queue.list(bob, "q").await.unwrap().is_empty());
        let err = queue.acknowledge(bob, sent.id, true).await.unwrap_err();
        assert!(matches!(err, QueueError::MessageNotFound(_)));

        // Alice still sees her message untouched.
        let got = queue.receive(alice, "q").await.unwrap().unwrap();
        assert_eq!(got.id, sent.id);
    }

    #[tokio::test]
    async fn ack_of_unknown_message_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = testutil::pool_in(dir.path()).await;
        let owner = testutil::tenant(&db, "a@example.com").await;
        let queue = QueueService::new(db);

        let err = queue
            .acknowledge(owner, Uuid::new_v4(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::MessageNotFound(_)));
    }
}
