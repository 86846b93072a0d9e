//! Ingestion job state machine and its persistence.
//!
//! `pending -> processing -> {completed, completed_with_errors, failed}`.
//! Counters only grow, `processed + failed` never exceeds a known total, and
//! `completed_at` is written exactly once.

use crate::db::Db;
use crate::error::{Result, RowragError};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Failed
        )
    }

    /// Terminal status implied by final counters
    pub fn from_counts(processed: i64, failed: i64) -> Self {
        if processed == 0 {
            JobStatus::Failed
        } else if failed == 0 {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithErrors
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = RowragError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "completed_with_errors" => Ok(JobStatus::CompletedWithErrors),
            "failed" => Ok(JobStatus::Failed),
            other => Err(RowragError::Parse(format!("unknown job status '{}'", other))),
        }
    }
}

/// Progress record for one source file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionJob {
    pub job_id: Uuid,
    pub source_file: String,
    pub status: JobStatus,
    pub total_rows: Option<i64>,
    pub processed_rows: i64,
    pub failed_rows: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestionJob {
    pub fn new(source_file: &str) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            source_file: source_file.to_string(),
            status: JobStatus::Pending,
            total_rows: None,
            processed_rows: 0,
            failed_rows: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn require(&self, expected: JobStatus, action: &str) -> Result<()> {
        if self.status != expected {
            return Err(RowragError::InvalidTransition(format!(
                "job {} cannot {} while {}",
                self.job_id, action, self.status
            )));
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.require(JobStatus::Pending, "start")?;
        self.status = JobStatus::Processing;
        Ok(())
    }

    pub fn set_total(&mut self, total: i64) -> Result<()> {
        self.require(JobStatus::Processing, "set total")?;
        if total < 0 || total < self.processed_rows + self.failed_rows {
            return Err(RowragError::InvalidTransition(format!(
                "job {} total {} is below rows already counted",
                self.job_id, total
            )));
        }
        self.total_rows = Some(total);
        Ok(())
    }

    /// Add one batch's counts; rejected if it would overrun the known total
    pub fn record_batch(&mut self, processed: i64, failed: i64) -> Result<()> {
        self.require(JobStatus::Processing, "record a batch")?;
        if processed < 0 || failed < 0 {
            return Err(RowragError::InvalidTransition(format!(
                "job {} batch counts must be non-negative",
                self.job_id
            )));
        }
        let next = self.processed_rows + processed + self.failed_rows + failed;
        if let Some(total) = self.total_rows {
            if next > total {
                return Err(RowragError::InvalidTransition(format!(
                    "job {} would count {} rows of {}",
                    self.job_id, next, total
                )));
            }
        }
        self.processed_rows += processed;
        self.failed_rows += failed;
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<JobStatus> {
        self.require(JobStatus::Processing, "finalize")?;
        self.status = JobStatus::from_counts(self.processed_rows, self.failed_rows);
        self.completed_at = Some(Utc::now());
        Ok(self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RowragError::Parse(format!("invalid timestamp '{}': {}", value, e)))
}

struct JobRow {
    job_id: String,
    source_file: String,
    status: String,
    total_rows: Option<i64>,
    processed_rows: i64,
    failed_rows: i64,
    started_at: String,
    completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            source_file: row.get(1)?,
            status: row.get(2)?,
            total_rows: row.get(3)?,
            processed_rows: row.get(4)?,
            failed_rows: row.get(5)?,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
        })
    }

    fn into_job(self) -> Result<IngestionJob> {
        Ok(IngestionJob {
            job_id: Uuid::parse_str(&self.job_id)
                .map_err(|e| RowragError::Parse(format!("invalid job id: {}", e)))?,
            source_file: self.source_file,
            status: self.status.parse()?,
            total_rows: self.total_rows,
            processed_rows: self.processed_rows,
            failed_rows: self.failed_rows,
            started_at: parse_time(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

const JOB_COLUMNS: &str = "job_id, source_file, status, total_rows, processed_rows, \
     failed_rows, started_at, completed_at";

/// Persists job state in `ingestion_jobs`
#[derive(Debug, Clone)]
pub struct JobTracker {
    db: Db,
}

impl JobTracker {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert a `pending` job and move it straight to `processing`
    pub async fn create(&self, source_file: &str) -> Result<IngestionJob> {
        let mut job = IngestionJob::new(source_file);
        let id = job.job_id.to_string();
        let file = job.source_file.clone();
        let started = job.started_at.to_rfc3339();

        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO ingestion_jobs (job_id, source_file, status, started_at) \
                     VALUES (?1, ?2, 'pending', ?3)",
                    params![id, file, started],
                )?;
                Ok(())
            })
            .await?;

        job.start()?;
        let id = job.job_id.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "UPDATE ingestion_jobs SET status = 'processing' \
                     WHERE job_id = ?1 AND status = 'pending'",
                    params![id],
                )?;
                Ok(())
            })
            .await?;

        log::info!("Job {}: created for {}", job.job_id, job.source_file);
        Ok(job)
    }

    pub async fn set_total_rows(&self, job: &mut IngestionJob, total: i64) -> Result<()> {
        job.set_total(total)?;
        let id = job.job_id.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "UPDATE ingestion_jobs SET total_rows = ?2 WHERE job_id = ?1",
                    params![id, total],
                )?;
                Ok(())
            })
            .await
    }

    /// Persist the current counters
    pub async fn save_progress(&self, job: &IngestionJob) -> Result<()> {
        let id = job.job_id.to_string();
        let processed = job.processed_rows;
        let failed = job.failed_rows;
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "UPDATE ingestion_jobs SET processed_rows = ?2, failed_rows = ?3 \
                     WHERE job_id = ?1 AND status = 'processing'",
                    params![id, processed, failed],
                )?;
                Ok(())
            })
            .await
    }

    /// Move the job to its terminal status. The store update only applies to
    /// a job still in `processing`, so a repeated finalize cannot overwrite
    /// `completed_at`.
    pub async fn finalize(&self, job: &mut IngestionJob) -> Result<JobStatus> {
        let status = job.finalize()?;
        let id = job.job_id.to_string();
        let processed = job.processed_rows;
        let failed = job.failed_rows;
        let completed = job
            .completed_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        let updated = self
            .db
            .with_connection(move |conn| {
                let n = conn.execute(
                    "UPDATE ingestion_jobs \
                     SET status = ?2, processed_rows = ?3, failed_rows = ?4, completed_at = ?5 \
                     WHERE job_id = ?1 AND status = 'processing'",
                    params![id, status.as_str(), processed, failed, completed],
                )?;
                Ok(n)
            })
            .await?;

        if updated == 0 {
            log::warn!("Job {}: already finalized in store", job.job_id);
        }
        log::info!(
            "Job {}: {} ({} processed, {} failed)",
            job.job_id,
            status,
            processed,
            failed
        );
        Ok(status)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<IngestionJob> {
        let id = job_id.to_string();
        let row = self
            .db
            .with_connection(move |conn| {
                let sql = format!("SELECT {} FROM ingestion_jobs WHERE job_id = ?1", JOB_COLUMNS);
                Ok(conn.query_row(&sql, params![id], JobRow::from_row).optional()?)
            })
            .await?;

        row.ok_or_else(|| RowragError::JobNotFound(job_id.to_string()))?
            .into_job()
    }

    /// Most recently created jobs first
    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<IngestionJob>> {
        let rows = self
            .db
            .with_connection(move |conn| {
                let sql = format!(
                    "SELECT {} FROM ingestion_jobs ORDER BY created_at DESC, started_at DESC LIMIT ?1",
                    JOB_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![limit as i64], JobRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }
}
