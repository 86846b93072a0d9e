//! Queue-driven ingestion worker.
//!
//! One message names one uploaded CSV. The worker downloads it, runs the
//! ingestion pipeline under a job, relocates the object to `completed/` or
//! `failed/`, and only then acknowledges the message.

pub mod object_store;
pub mod queue;
pub mod trigger;

pub use object_store::{filename_of, LocalObjectStore, ObjectInfo, ObjectStore};
pub use queue::{QueueMessage, SqliteQueue, WorkQueue};
pub use trigger::{handle_upload, scan_incoming, should_enqueue, TriggerSummary};

use crate::config::{IngestionConfig, WorkerConfig};
use crate::db::Db;
use crate::embeddings::Embedder;
use crate::error::{Result, RowragError};
use crate::ingest::{self, IngestionJob, JobStatus};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const COMPLETED_PREFIX: &str = "completed";
pub const FAILED_PREFIX: &str = "failed";

/// Queue message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestMessage {
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<String>,
}

/// What happened to an acknowledged message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// A job ran to a terminal status
    Ingested(IngestionJob),
    /// The file could not be parsed; no job was created
    Unparseable,
    /// The body was not a valid message and was dropped
    Discarded,
}

/// Timing and error limits for the poll loop
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub visibility_timeout: Duration,
    pub wait_time: Duration,
    pub max_consecutive_errors: u32,
    pub backoff_step: Duration,
    pub backoff_max: Duration,
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(cfg: &WorkerConfig) -> Self {
        Self {
            visibility_timeout: Duration::from_secs(cfg.visibility_timeout_secs),
            wait_time: Duration::from_secs(cfg.wait_time_secs),
            max_consecutive_errors: cfg.max_consecutive_errors,
            backoff_step: Duration::from_secs(cfg.backoff_step_secs),
            backoff_max: Duration::from_secs(cfg.backoff_max_secs),
        }
    }
}

/// `min(n * step, max)`
pub fn backoff_delay(consecutive_errors: u32, step: Duration, max: Duration) -> Duration {
    step.saturating_mul(consecutive_errors).min(max)
}

pub struct Worker {
    db: Db,
    embedder: Arc<dyn Embedder>,
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn ObjectStore>,
    ingestion: IngestionConfig,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        db: Db,
        embedder: Arc<dyn Embedder>,
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn ObjectStore>,
        ingestion: IngestionConfig,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            db,
            embedder,
            queue,
            store,
            ingestion,
            settings,
        }
    }

    async fn relocate_best_effort(&self, bucket: &str, key: &str, dest_prefix: &str) {
        if let Err(e) = self.store.move_object(bucket, key, dest_prefix).await {
            log::error!("Failed to move {}/{} to {}/: {}", bucket, key, dest_prefix, e);
        }
    }

    /// Handle one leased message.
    ///
    /// `Ok` means the message was acknowledged. `Err` leaves it leased so the
    /// queue redelivers it once the visibility timeout passes.
    pub async fn process_message(&self, message: &QueueMessage) -> Result<MessageOutcome> {
        let body: IngestMessage = match serde_json::from_str(&message.body) {
            Ok(body) => body,
            Err(e) => {
                log::error!("Discarding message {}: invalid body: {}", message.message_id, e);
                self.queue.delete(&message.receipt_handle).await?;
                return Ok(MessageOutcome::Discarded);
            }
        };
        let (bucket, key) = (body.bucket.as_str(), body.key.as_str());
        log::info!("Processing file: {}/{}", bucket, key);

        let bytes = match self.store.download(bucket, key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Failed to download {}/{}: {}", bucket, key, e);
                self.relocate_best_effort(bucket, key, FAILED_PREFIX).await;
                return Err(e);
            }
        };
        log::info!("Downloaded {}/{} ({} bytes)", bucket, key, bytes.len());

        let table = match ingest::parse_csv(&bytes) {
            Ok(table) => table,
            Err(e) => {
                // Parsing is deterministic, a retry would fail the same way
                log::error!("Unparseable file {}/{}: {}", bucket, key, e);
                self.store.move_object(bucket, key, FAILED_PREFIX).await?;
                self.queue.delete(&message.receipt_handle).await?;
                return Ok(MessageOutcome::Unparseable);
            }
        };

        let job = ingest::ingest_table(
            &self.db,
            self.embedder.clone(),
            table,
            key,
            &self.ingestion,
        )
        .await?;

        let dest = if job.status == JobStatus::Failed {
            FAILED_PREFIX
        } else {
            COMPLETED_PREFIX
        };
        self.store.move_object(bucket, key, dest).await?;
        self.queue.delete(&message.receipt_handle).await?;
        log::info!(
            "Completed: {} rows processed, {} failed; message deleted from queue",
            job.processed_rows,
            job.failed_rows
        );

        Ok(MessageOutcome::Ingested(job))
    }

    /// Poll until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Poll until `shutdown` resolves.
    ///
    /// Shutdown is observed while waiting on the queue or backing off; a
    /// message already being processed runs to completion first. Returns
    /// `Fatal` after `max_consecutive_errors` errors in a row.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        log::info!(
            "Worker ready. Polling (visibility {:?}, wait {:?})...",
            self.settings.visibility_timeout,
            self.settings.wait_time
        );

        let mut consecutive_errors: u32 = 0;
        loop {
            let received = tokio::select! {
                _ = &mut shutdown => break,
                r = self.queue.receive(self.settings.visibility_timeout, self.settings.wait_time) => r,
            };

            let result = match received {
                Ok(None) => continue,
                Ok(Some(message)) => self.process_message(&message).await.map(|_| ()),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => consecutive_errors = 0,
                Err(e) => {
                    consecutive_errors += 1;
                    log::error!(
                        "Worker error ({}/{}): {}",
                        consecutive_errors,
                        self.settings.max_consecutive_errors,
                        e
                    );
                    if consecutive_errors >= self.settings.max_consecutive_errors {
                        return Err(RowragError::Fatal(format!(
                            "too many consecutive errors ({}), last: {}",
                            consecutive_errors, e
                        )));
                    }

                    let delay = backoff_delay(
                        consecutive_errors,
                        self.settings.backoff_step,
                        self.settings.backoff_max,
                    );
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        log::info!("Shutting down gracefully...");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;
    use crate::embeddings::HashingEmbedder;
    use crate::ingest::JobTracker;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryQueue {
        pending: Mutex<Vec<QueueMessage>>,
        deleted: Mutex<Vec<String>>,
        receive_errors: AtomicUsize,
    }

    impl MemoryQueue {
        fn with_message(body: &str) -> (Self, QueueMessage) {
            let msg = QueueMessage {
                message_id: "m-1".to_string(),
                body: body.to_string(),
                receipt_handle: "r-1".to_string(),
                receive_count: 1,
            };
            let q = Self::default();
            q.pending.lock().unwrap().push(msg.clone());
            (q, msg)
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkQueue for MemoryQueue {
        async fn receive(&self, _v: Duration, wait: Duration) -> Result<Option<QueueMessage>> {
            if self.receive_errors.load(Ordering::SeqCst) > 0 {
                self.receive_errors.fetch_add(1, Ordering::SeqCst);
                return Err(RowragError::Queue("queue unreachable".to_string()));
            }
            let next = self.pending.lock().unwrap().pop();
            if next.is_none() {
                // Long poll
                tokio::time::sleep(wait).await;
            }
            Ok(next)
        }

        async fn delete(&self, receipt_handle: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(receipt_handle.to_string());
            Ok(())
        }

        async fn enqueue(&self, _body: &str, _dedup: Option<&str>) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        fail_moves: bool,
    }

    impl MemoryStore {
        fn with(key: &str, content: &[u8]) -> Self {
            let store = Self::default();
            store.objects.lock().unwrap().insert(key.to_string(), content.to_vec());
            store
        }

        fn has(&self, key: &str) -> bool {
            self.objects.lock().unwrap().contains_key(key)
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| RowragError::Download(format!("{}/{}", bucket, key)))
        }

        async fn move_object(&self, _bucket: &str, key: &str, dest_prefix: &str) -> Result<String> {
            if self.fail_moves {
                return Err(RowragError::ObjectStore("move refused".to_string()));
            }
            let mut objects = self.objects.lock().unwrap();
            let data = objects
                .remove(key)
                .ok_or_else(|| RowragError::ObjectStore(format!("no such key {}", key)))?;
            let dest = format!("{}/{}", dest_prefix, filename_of(key));
            objects.insert(dest.clone(), data);
            Ok(dest)
        }

        async fn list(&self, _bucket: &str, _prefix: &str) -> Result<Vec<ObjectInfo>> {
            Ok(Vec::new())
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            visibility_timeout: Duration::from_secs(900),
            wait_time: Duration::from_millis(5),
            max_consecutive_errors: 3,
            backoff_step: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
        }
    }

    fn body(key: &str) -> String {
        serde_json::to_string(&IngestMessage {
            bucket: "uploads".to_string(),
            key: key.to_string(),
            filename: None,
            size: None,
            event_time: None,
        })
        .unwrap()
    }

    fn worker(db: Db, queue: Arc<MemoryQueue>, store: Arc<MemoryStore>) -> Worker {
        Worker::new(
            db,
            Arc::new(HashingEmbedder::new(16)),
            queue,
            store,
            IngestionConfig::default(),
            settings(),
        )
    }

    #[test]
    fn test_backoff_delay_caps() {
        let step = Duration::from_secs(5);
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(1, step, max), Duration::from_secs(5));
        assert_eq!(backoff_delay(4, step, max), Duration::from_secs(20));
        assert_eq!(backoff_delay(13, step, max), Duration::from_secs(60));
    }

    #[test]
    fn test_message_body_optional_fields() {
        let msg: IngestMessage =
            serde_json::from_str(r#"{"bucket":"uploads","key":"incoming/a.csv"}"#).unwrap();
        assert!(msg.filename.is_none());
        assert!(serde_json::from_str::<IngestMessage>(r#"{"bucket":"uploads"}"#).is_err());
    }

    #[tokio::test]
    async fn test_successful_file_moves_then_acks() {
        let (db, _temp) = setup_test_db().await;
        let (queue, msg) = MemoryQueue::with_message(&body("incoming/a.csv"));
        let queue = Arc::new(queue);
        let store = Arc::new(MemoryStore::with("incoming/a.csv", b"title,description\nWidget,Steel\n"));

        let outcome = worker(db.clone(), queue.clone(), store.clone())
            .process_message(&msg)
            .await
            .unwrap();

        let MessageOutcome::Ingested(job) = outcome else {
            panic!("expected an ingested job");
        };
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.source_file, "incoming/a.csv");
        assert!(store.has("completed/a.csv"));
        assert_eq!(queue.deleted(), vec!["r-1".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_processed_job_goes_to_failed() {
        let (db, _temp) = setup_test_db().await;
        let (queue, msg) = MemoryQueue::with_message(&body("incoming/empty.csv"));
        let queue = Arc::new(queue);
        let store = Arc::new(MemoryStore::with("incoming/empty.csv", b"title\n"));

        let outcome = worker(db, queue.clone(), store.clone())
            .process_message(&msg)
            .await
            .unwrap();

        assert!(matches!(outcome, MessageOutcome::Ingested(ref job) if job.status == JobStatus::Failed));
        assert!(store.has("failed/empty.csv"));
        assert_eq!(queue.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_download_failure_leaves_message_unacked() {
        let (db, _temp) = setup_test_db().await;
        let (queue, msg) = MemoryQueue::with_message(&body("incoming/gone.csv"));
        let queue = Arc::new(queue);
        let store = Arc::new(MemoryStore::default());

        let err = worker(db.clone(), queue.clone(), store)
            .process_message(&msg)
            .await
            .unwrap_err();

        assert!(matches!(err, RowragError::Download(_)));
        assert!(queue.deleted().is_empty());
        assert!(JobTracker::new(db).list_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_file_is_acked_without_job() {
        let (db, _temp) = setup_test_db().await;
        let (queue, msg) = MemoryQueue::with_message(&body("incoming/blank.csv"));
        let queue = Arc::new(queue);
        let store = Arc::new(MemoryStore::with("incoming/blank.csv", b"\n"));

        let outcome = worker(db.clone(), queue.clone(), store.clone())
            .process_message(&msg)
            .await
            .unwrap();

        assert_eq!(outcome, MessageOutcome::Unparseable);
        assert!(store.has("failed/blank.csv"));
        assert_eq!(queue.deleted().len(), 1);
        assert!(JobTracker::new(db).list_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_move_blocks_ack() {
        let (db, _temp) = setup_test_db().await;
        let (queue, msg) = MemoryQueue::with_message(&body("incoming/a.csv"));
        let queue = Arc::new(queue);
        let store = Arc::new(MemoryStore {
            fail_moves: true,
            ..MemoryStore::with("incoming/a.csv", b"title\nWidget\n")
        });

        assert!(worker(db, queue.clone(), store).process_message(&msg).await.is_err());
        assert!(queue.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_body_is_discarded() {
        let (db, _temp) = setup_test_db().await;
        let (queue, msg) = MemoryQueue::with_message("not json");
        let queue = Arc::new(queue);

        let outcome = worker(db, queue.clone(), Arc::new(MemoryStore::default()))
            .process_message(&msg)
            .await
            .unwrap();
        assert_eq!(outcome, MessageOutcome::Discarded);
        assert_eq!(queue.deleted().len(), 1);
    }

    #[tokio::test]
    async fn test_run_exits_fatal_after_consecutive_errors() {
        let (db, _temp) = setup_test_db().await;
        let queue = Arc::new(MemoryQueue::default());
        queue.receive_errors.store(1, Ordering::SeqCst);

        let err = worker(db, queue.clone(), Arc::new(MemoryStore::default()))
            .run_until(std::future::pending())
            .await
            .unwrap_err();

        assert!(matches!(err, RowragError::Fatal(_)));
        // Initial flag plus three failed receives
        assert_eq!(queue.receive_errors.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_undeliverable_message_is_dead_lettered_not_fatal() {
        let (db, _temp) = setup_test_db().await;
        let queue = Arc::new(
            SqliteQueue::new(db.clone())
                .with_poll_interval(Duration::from_millis(5))
                .with_max_receive_count(2),
        );
        queue.enqueue(&body("incoming/gone.csv"), None).await.unwrap();

        let w = Worker::new(
            db,
            Arc::new(HashingEmbedder::new(16)),
            queue.clone(),
            Arc::new(MemoryStore::default()),
            IngestionConfig::default(),
            WorkerSettings {
                visibility_timeout: Duration::ZERO,
                ..settings()
            },
        );

        w.run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();

        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(queue.dead_letter_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (db, _temp) = setup_test_db().await;
        let (queue, _msg) = MemoryQueue::with_message(&body("incoming/a.csv"));
        let queue = Arc::new(queue);
        let store = Arc::new(MemoryStore::with("incoming/a.csv", b"title\nWidget\n"));
        let w = worker(db, queue.clone(), store.clone());

        let shutdown = tokio::time::sleep(Duration::from_millis(100));
        w.run_until(shutdown).await.unwrap();

        assert!(store.has("completed/a.csv"));
        assert_eq!(queue.deleted().len(), 1);
    }
}
