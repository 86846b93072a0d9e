//! Routes new uploads to the work queue.
//!
//! Only CSV objects under `incoming/` with a non-zero size are queued;
//! folder placeholders and other files are skipped.

use super::object_store::{filename_of, ObjectStore};
use super::queue::WorkQueue;
use super::IngestMessage;
use crate::error::Result;
use chrono::Utc;

pub const INCOMING_PREFIX: &str = "incoming/";

pub fn should_enqueue(key: &str, size: u64) -> bool {
    key.starts_with(INCOMING_PREFIX)
        && key != INCOMING_PREFIX
        && key.to_lowercase().ends_with(".csv")
        && size > 0
}

/// Queue body for an upload event
pub fn upload_message(bucket: &str, key: &str, size: u64) -> IngestMessage {
    IngestMessage {
        bucket: bucket.to_string(),
        key: key.to_string(),
        filename: Some(filename_of(key).to_string()),
        size: Some(size),
        event_time: Some(Utc::now().to_rfc3339()),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerSummary {
    pub queued: usize,
    pub skipped: usize,
    /// Eligible uploads already waiting in the queue
    pub already_queued: usize,
}

/// Enqueue one upload event if eligible; returns whether a message was added
pub async fn handle_upload(
    queue: &dyn WorkQueue,
    bucket: &str,
    key: &str,
    size: u64,
) -> Result<bool> {
    if !should_enqueue(key, size) {
        log::debug!("Skipping {}/{} (size {})", bucket, key, size);
        return Ok(false);
    }

    let body = serde_json::to_string(&upload_message(bucket, key, size))?;
    let dedup_key = format!("{}/{}", bucket, key);
    match queue.enqueue(&body, Some(&dedup_key)).await? {
        Some(message_id) => {
            log::info!("Queued job for {}/{} (message {})", bucket, key, message_id);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Walk `incoming/` in a bucket and queue every eligible upload
pub async fn scan_incoming(
    store: &dyn ObjectStore,
    queue: &dyn WorkQueue,
    bucket: &str,
) -> Result<TriggerSummary> {
    let mut summary = TriggerSummary::default();
    for object in store.list(bucket, INCOMING_PREFIX).await? {
        if !should_enqueue(&object.key, object.size) {
            summary.skipped += 1;
            continue;
        }
        if handle_upload(queue, bucket, &object.key, object.size).await? {
            summary.queued += 1;
        } else {
            summary.already_queued += 1;
        }
    }

    log::info!(
        "Scan of {}/{}: {} queued, {} skipped, {} already queued",
        bucket,
        INCOMING_PREFIX,
        summary.queued,
        summary.skipped,
        summary.already_queued
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;
    use crate::worker::object_store::LocalObjectStore;
    use crate::worker::queue::SqliteQueue;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_should_enqueue() {
        assert!(should_enqueue("incoming/products.csv", 10));
        assert!(should_enqueue("incoming/sub/PRODUCTS.CSV", 10));
        assert!(!should_enqueue("incoming/products.csv", 0));
        assert!(!should_enqueue("incoming/notes.txt", 10));
        assert!(!should_enqueue("completed/products.csv", 10));
        assert!(!should_enqueue("incoming/", 10));
    }

    #[tokio::test]
    async fn test_scan_incoming_is_idempotent() {
        let (db, _db_temp) = setup_test_db().await;
        let queue = SqliteQueue::new(db);

        let objects = TempDir::new().unwrap();
        let incoming = objects.path().join("uploads/incoming");
        std::fs::create_dir_all(&incoming).unwrap();
        std::fs::write(incoming.join("a.csv"), "title\nx\n").unwrap();
        std::fs::write(incoming.join("empty.csv"), "").unwrap();
        std::fs::write(incoming.join("readme.md"), "hi").unwrap();
        let store = LocalObjectStore::new(objects.path());

        let first = scan_incoming(&store, &queue, "uploads").await.unwrap();
        assert_eq!(first, TriggerSummary { queued: 1, skipped: 2, already_queued: 0 });

        let second = scan_incoming(&store, &queue, "uploads").await.unwrap();
        assert_eq!(second, TriggerSummary { queued: 0, skipped: 2, already_queued: 1 });
        assert_eq!(queue.len().await.unwrap(), 1);

        let msg = queue
            .receive(Duration::from_secs(60), Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let body: IngestMessage = serde_json::from_str(&msg.body).unwrap();
        assert_eq!(body.key, "incoming/a.csv");
        assert_eq!(body.filename.as_deref(), Some("a.csv"));
        assert_eq!(body.size, Some(8));
    }
}
