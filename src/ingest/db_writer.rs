use super::record::IngestedRecord;
use crate::db::Db;
use crate::embeddings::encode_vector;
use crate::error::{Result, RowragError};
use rusqlite::params;
use serde::Serialize;

/// Insert records in a single transaction
///
/// Either every record of the batch is stored or none is. Returns the number
/// of inserted rows.
pub async fn insert_records(db: &Db, records: Vec<IngestedRecord>) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    db.with_connection(move |conn| {
        let tx = conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO ingested_records (
                    source_file, row_number, row_key, raw_data, title, description,
                    category, tags, searchable_content, content_embedding,
                    title_embedding, status, metadata
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )?;

            for record in &records {
                let raw_data = serde_json::to_string(&record.raw_data)?;
                let tags = record.tags.as_ref().map(serde_json::to_string).transpose()?;
                let metadata = serde_json::to_string(&record.metadata)?;
                let content_embedding = record.content_embedding.as_deref().map(encode_vector);
                let title_embedding = record.title_embedding.as_deref().map(encode_vector);

                stmt.execute(params![
                    record.source_file,
                    record.row_number,
                    record.row_key,
                    raw_data,
                    record.title,
                    record.description,
                    record.category,
                    tags,
                    record.searchable_content,
                    content_embedding,
                    title_embedding,
                    record.status.as_str(),
                    metadata,
                ])?;
                count += 1;
            }
        }
        tx.commit()?;
        Ok(count)
    })
    .await
}

/// Mark a record deleted; returns false if it was missing or already deleted
pub async fn soft_delete_record(db: &Db, id: i64) -> Result<bool> {
    let changed = db
        .with_connection(move |conn| {
            Ok(conn.execute(
                "UPDATE ingested_records SET status = 'deleted' WHERE id = ?1 AND status = 'active'",
                params![id],
            )?)
        })
        .await?;
    Ok(changed > 0)
}

pub async fn active_record_count(db: &Db) -> Result<i64> {
    db.with_connection(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM ingested_records WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?)
    })
    .await
}

/// Aggregate view over active records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordStats {
    pub total_records: i64,
    pub unique_files: i64,
    pub unique_categories: i64,
    pub first_ingestion: Option<String>,
    pub last_ingestion: Option<String>,
}

pub async fn record_stats(db: &Db) -> Result<RecordStats> {
    db.with_connection(|conn| {
        conn.query_row(
            r#"
            SELECT COUNT(*), COUNT(DISTINCT source_file), COUNT(DISTINCT category),
                   MIN(ingested_at), MAX(ingested_at)
            FROM ingested_records
            WHERE status = 'active'
            "#,
            [],
            |row| {
                Ok(RecordStats {
                    total_records: row.get(0)?,
                    unique_files: row.get(1)?,
                    unique_categories: row.get(2)?,
                    first_ingestion: row.get(3)?,
                    last_ingestion: row.get(4)?,
                })
            },
        )
        .map_err(RowragError::Database)
    })
    .await
}
