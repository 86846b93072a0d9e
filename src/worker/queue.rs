//! Lease-based work queue.
//!
//! A received message stays hidden until its visibility deadline passes; if it
//! is not deleted by then it becomes receivable again (at-least-once
//! delivery). Each receive issues a fresh receipt handle, so a worker whose
//! lease expired cannot delete a message another worker now holds.
//!
//! A message delivered `max_receive_count` times without being deleted is
//! dead-lettered on its next claim: it stays in the table for inspection but
//! is never handed out again.

use crate::db::Db;
use crate::error::{Result, RowragError};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
    pub receipt_handle: String,
    pub receive_count: i64,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Lease one visible message for `visibility`, waiting up to `wait`
    async fn receive(&self, visibility: Duration, wait: Duration) -> Result<Option<QueueMessage>>;

    /// Acknowledge a message using the receipt from its latest receive
    async fn delete(&self, receipt_handle: &str) -> Result<()>;

    /// Add a message. With a `dedup_key`, returns `None` when a message with
    /// the same key is already queued.
    async fn enqueue(&self, body: &str, dedup_key: Option<&str>) -> Result<Option<String>>;
}

/// SQLite-backed queue shared by every worker using the same database
#[derive(Debug, Clone)]
pub struct SqliteQueue {
    db: Db,
    poll_interval: Duration,
    max_receive_count: i64,
}

impl SqliteQueue {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            poll_interval: Duration::from_millis(500),
            max_receive_count: 5,
        }
    }

    pub fn with_max_receive_count(mut self, max_receive_count: u32) -> Self {
        self.max_receive_count = i64::from(max_receive_count.max(1));
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Live messages, leased or not
    pub async fn len(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM work_queue WHERE dead_lettered_at IS NULL")
            .await
    }

    /// Messages parked after exhausting their deliveries
    pub async fn dead_letter_len(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM work_queue WHERE dead_lettered_at IS NOT NULL")
            .await
    }

    async fn count(&self, sql: &'static str) -> Result<i64> {
        self.db
            .with_connection(move |conn| Ok(conn.query_row(sql, [], |r| r.get(0))?))
            .await
    }

    async fn try_claim(&self, visibility: Duration) -> Result<Option<QueueMessage>> {
        let visibility_ms = visibility.as_millis() as i64;
        let max_receive_count = self.max_receive_count;
        self.db
            .with_connection(move |conn| {
                // IMMEDIATE takes the write lock up front so two workers cannot
                // select the same row before either updates it
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let now = Utc::now().timestamp_millis();

                let (message_id, body, receive_count) = loop {
                    let candidate: Option<(String, String, i64)> = tx
                        .query_row(
                            "SELECT message_id, body, receive_count FROM work_queue \
                             WHERE visible_at <= ?1 AND dead_lettered_at IS NULL \
                             ORDER BY visible_at, enqueued_at LIMIT 1",
                            params![now],
                            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                        )
                        .optional()?;

                    let Some((message_id, body, receive_count)) = candidate else {
                        tx.commit()?;
                        return Ok(None);
                    };
                    if receive_count < max_receive_count {
                        break (message_id, body, receive_count);
                    }

                    // Releasing the dedup key lets a fresh upload of the same
                    // object be queued again
                    tx.execute(
                        "UPDATE work_queue SET dead_lettered_at = ?2, receipt_handle = NULL, \
                         dedup_key = NULL WHERE message_id = ?1",
                        params![message_id, Utc::now().to_rfc3339()],
                    )?;
                    log::warn!(
                        "Dead-lettered message {} after {} deliveries: {}",
                        message_id,
                        receive_count,
                        body
                    );
                };

                let receipt_handle = Uuid::new_v4().to_string();
                tx.execute(
                    "UPDATE work_queue SET visible_at = ?2, receipt_handle = ?3, \
                     receive_count = receive_count + 1 WHERE message_id = ?1",
                    params![message_id, now + visibility_ms, receipt_handle],
                )?;
                tx.commit()?;

                Ok(Some(QueueMessage {
                    message_id,
                    body,
                    receipt_handle,
                    receive_count: receive_count + 1,
                }))
            })
            .await
    }
}

#[async_trait]
impl WorkQueue for SqliteQueue {
    async fn receive(&self, visibility: Duration, wait: Duration) -> Result<Option<QueueMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(message) = self.try_claim(visibility).await? {
                log::debug!(
                    "Leased message {} (receive #{})",
                    message.message_id,
                    message.receive_count
                );
                return Ok(Some(message));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        let receipt = receipt_handle.to_string();
        let deleted = self
            .db
            .with_connection(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM work_queue WHERE receipt_handle = ?1",
                    params![receipt],
                )?)
            })
            .await?;

        if deleted == 0 {
            return Err(RowragError::Queue(format!(
                "receipt {} is stale or unknown",
                receipt_handle
            )));
        }
        Ok(())
    }

    async fn enqueue(&self, body: &str, dedup_key: Option<&str>) -> Result<Option<String>> {
        let message_id = Uuid::new_v4().to_string();
        let id = message_id.clone();
        let body = body.to_string();
        let key = dedup_key.map(str::to_string);

        let inserted = self
            .db
            .with_connection(move |conn| {
                Ok(conn.execute(
                    "INSERT OR IGNORE INTO work_queue (message_id, body, dedup_key, visible_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, body, key, Utc::now().timestamp_millis()],
                )?)
            })
            .await?;

        Ok((inserted > 0).then_some(message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;

    const NO_WAIT: Duration = Duration::ZERO;

    async fn queue() -> (SqliteQueue, tempfile::TempDir) {
        let (db, temp) = setup_test_db().await;
        (SqliteQueue::new(db).with_poll_interval(Duration::from_millis(10)), temp)
    }

    #[tokio::test]
    async fn test_enqueue_receive_delete() {
        let (q, _temp) = queue().await;
        q.enqueue("{\"key\":\"a\"}", None).await.unwrap().unwrap();

        let msg = q.receive(Duration::from_secs(60), NO_WAIT).await.unwrap().unwrap();
        assert_eq!(msg.body, "{\"key\":\"a\"}");
        assert_eq!(msg.receive_count, 1);

        // Leased, so invisible to a second consumer
        assert!(q.receive(Duration::from_secs(60), NO_WAIT).await.unwrap().is_none());

        q.delete(&msg.receipt_handle).await.unwrap();
        assert_eq!(q.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_redelivers_with_new_receipt() {
        let (q, _temp) = queue().await;
        q.enqueue("body", None).await.unwrap();

        let first = q.receive(Duration::ZERO, NO_WAIT).await.unwrap().unwrap();
        let second = q.receive(Duration::from_secs(60), NO_WAIT).await.unwrap().unwrap();

        assert_eq!(first.message_id, second.message_id);
        assert_ne!(first.receipt_handle, second.receipt_handle);
        assert_eq!(second.receive_count, 2);

        // The first holder's lease is gone
        let err = q.delete(&first.receipt_handle).await.unwrap_err();
        assert!(matches!(err, RowragError::Queue(_)));
        q.delete(&second.receipt_handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_message_is_dead_lettered() {
        let (q, _temp) = queue().await;
        let q = q.with_max_receive_count(2);
        q.enqueue("undeliverable", Some("uploads/incoming/gone.csv")).await.unwrap();

        // Two expired leases use up its deliveries
        for _ in 0..2 {
            let msg = q.receive(Duration::ZERO, NO_WAIT).await.unwrap().unwrap();
            assert_eq!(msg.body, "undeliverable");
        }
        q.enqueue("healthy", None).await.unwrap();

        let next = q.receive(Duration::from_secs(60), NO_WAIT).await.unwrap().unwrap();
        assert_eq!(next.body, "healthy");
        q.delete(&next.receipt_handle).await.unwrap();
        assert!(q.receive(Duration::from_secs(60), NO_WAIT).await.unwrap().is_none());

        assert_eq!(q.len().await.unwrap(), 0);
        assert_eq!(q.dead_letter_len().await.unwrap(), 1);

        // The dedup key was released with the dead letter
        assert!(q.enqueue("retry", Some("uploads/incoming/gone.csv")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dedup_key_suppresses_duplicates() {
        let (q, _temp) = queue().await;
        assert!(q.enqueue("a", Some("uploads/incoming/a.csv")).await.unwrap().is_some());
        assert!(q.enqueue("a", Some("uploads/incoming/a.csv")).await.unwrap().is_none());
        assert!(q.enqueue("b", Some("uploads/incoming/b.csv")).await.unwrap().is_some());
        assert!(q.enqueue("c", None).await.unwrap().is_some());
        assert!(q.enqueue("c", None).await.unwrap().is_some());
        assert_eq!(q.len().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_receive_waits_then_gives_up() {
        let (q, _temp) = queue().await;
        let start = Instant::now();
        let msg = q.receive(Duration::from_secs(1), Duration::from_millis(50)).await.unwrap();
        assert!(msg.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_concurrent_receivers_never_share_a_lease() {
        let (q, _temp) = queue().await;
        for i in 0..5 {
            q.enqueue(&format!("m{}", i), None).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..5 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                q.receive(Duration::from_secs(60), NO_WAIT).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            if let Some(m) = h.await.unwrap() {
                ids.push(m.message_id);
            }
        }
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert_eq!(total, 5);
    }
}
