//! CSV ingestion pipeline: parse, detect fields, batch, embed, persist.

pub mod batcher;
pub mod db_writer;
pub mod fields;
pub mod jobs;
pub mod legal;
pub mod record;
pub mod source;

pub use batcher::{BatchOutcome, RecordBatcher};
pub use db_writer::{active_record_count, insert_records, record_stats, soft_delete_record, RecordStats};
pub use fields::{build_record, detect_fields, parse_tags, FieldAliases, FieldMap};
pub use jobs::{IngestionJob, JobStatus, JobTracker};
pub use legal::{
    get_legal_document, ingest_legal_csv, legal_document_counts, update_legal_status,
    LegalCounts, LegalDocument, LegalIngestSummary, LegalStatus,
};
pub use record::{row_key, IngestedRecord, RecordStatus};
pub use source::{parse_csv, ParsedRow, SourceTable};

use crate::config::IngestionConfig;
use crate::db::Db;
use crate::embeddings::Embedder;
use crate::error::Result;
use std::sync::Arc;

/// Ingest an already-parsed table under a new job.
///
/// Batches run strictly in row order and progress is persisted after each
/// one. Batch failures are counted, not returned; errors from this function
/// mean the job store itself is unreachable.
pub async fn ingest_table(
    db: &Db,
    embedder: Arc<dyn Embedder>,
    table: SourceTable,
    source_file: &str,
    cfg: &IngestionConfig,
) -> Result<IngestionJob> {
    let tracker = JobTracker::new(db.clone());
    let mut job = tracker.create(source_file).await?;

    log::info!("Job {}: CSV columns: {:?}", job.job_id, table.headers);
    let field_map = detect_fields(&table.headers, &FieldAliases::from_config(cfg));
    log::info!("Job {}: Field mapping: {:?}", job.job_id, field_map);

    let total = table.rows.len() as i64;
    tracker.set_total_rows(&mut job, total).await?;
    log::info!("Job {}: Read {} rows from {}", job.job_id, total, source_file);

    let batcher = RecordBatcher::new(db.clone(), embedder);
    let numbered: Vec<(i64, ParsedRow)> = table
        .rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| (i as i64 + 1, row))
        .collect();

    for batch in numbered.chunks(cfg.batch_size.max(1)) {
        let outcome = batcher
            .process_batch(&table.headers, batch, &field_map, source_file)
            .await;
        job.record_batch(outcome.processed, outcome.failed)?;
        tracker.save_progress(&job).await?;
        log::info!(
            "Job {}: Processed batch ending at row {} ({}/{})",
            job.job_id,
            batch.last().map(|(n, _)| *n).unwrap_or(0),
            job.processed_rows + job.failed_rows,
            total
        );
    }

    tracker.finalize(&mut job).await?;
    Ok(job)
}

/// Parse CSV bytes and ingest them. Unparseable input is returned as an
/// error before any job is created.
pub async fn ingest_csv(
    db: &Db,
    embedder: Arc<dyn Embedder>,
    bytes: &[u8],
    source_file: &str,
    cfg: &IngestionConfig,
) -> Result<IngestionJob> {
    let table = parse_csv(bytes)?;
    ingest_table(db, embedder, table, source_file, cfg).await
}
