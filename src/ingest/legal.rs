//! Legal corpus ingestion and maintenance.
//!
//! Each document carries three vectors: title, content and headnotes
//! (headnotes fall back to the title when absent). Rows are upserted by
//! `doc_id`, so re-running an ingest refreshes documents in place.

use super::source::decode_text;
use crate::db::Db;
use crate::embeddings::{encode_vector, Embedder};
use crate::error::{Result, RowragError};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegalStatus {
    GoodLaw,
    Overruled,
    Distinguished,
}

impl LegalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegalStatus::GoodLaw => "good_law",
            LegalStatus::Overruled => "overruled",
            LegalStatus::Distinguished => "distinguished",
        }
    }
}

impl fmt::Display for LegalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LegalStatus {
    type Err = RowragError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "good_law" => Ok(LegalStatus::GoodLaw),
            "overruled" => Ok(LegalStatus::Overruled),
            "distinguished" => Ok(LegalStatus::Distinguished),
            other => Err(RowragError::InvalidInput(format!(
                "unknown legal status '{}'",
                other
            ))),
        }
    }
}

/// One row of a legal-documents CSV
#[derive(Debug, Clone, Deserialize)]
pub struct LegalDocumentRow {
    pub doc_id: String,
    pub doc_type: String,
    pub title: String,
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub date_decided: Option<String>,
    #[serde(default)]
    pub court: Option<String>,
    pub content: String,
    #[serde(default)]
    pub headnotes: Option<String>,
    #[serde(default)]
    pub practice_area: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A validated document ready to embed
#[derive(Debug, Clone)]
struct PreparedDocument {
    row: LegalDocumentRow,
    date_decided: Option<String>,
    status: LegalStatus,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn prepare(mut row: LegalDocumentRow) -> Result<PreparedDocument> {
    for (name, value) in [
        ("doc_id", &row.doc_id),
        ("doc_type", &row.doc_type),
        ("title", &row.title),
        ("content", &row.content),
    ] {
        if value.trim().is_empty() {
            return Err(RowragError::InvalidInput(format!("{} is empty", name)));
        }
    }

    let date_decided = match non_empty(row.date_decided.take()) {
        Some(date) => {
            NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
                RowragError::InvalidInput(format!("invalid date_decided '{}': {}", date, e))
            })?;
            Some(date)
        }
        None => None,
    };

    let status = match non_empty(row.status.take()) {
        Some(s) => s.parse()?,
        None => LegalStatus::GoodLaw,
    };

    row.doc_id = row.doc_id.trim().to_string();
    row.citation = non_empty(row.citation);
    row.jurisdiction = non_empty(row.jurisdiction);
    row.court = non_empty(row.court);
    row.headnotes = non_empty(row.headnotes);
    row.practice_area = non_empty(row.practice_area);

    Ok(PreparedDocument {
        row,
        date_decided,
        status,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LegalIngestSummary {
    pub total_in_csv: usize,
    pub ingested: usize,
    pub failed: usize,
}

/// Embed and upsert every document of a legal CSV.
///
/// Invalid rows and batches whose embedding or write fails are counted in
/// `failed`; only an unreadable header is an error.
pub async fn ingest_legal_csv(
    db: &Db,
    embedder: &dyn Embedder,
    bytes: &[u8],
    batch_size: usize,
) -> Result<LegalIngestSummary> {
    let text = decode_text(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());
    reader
        .headers()
        .map_err(|e| RowragError::Parse(format!("Failed to read header row: {}", e)))?;

    let mut summary = LegalIngestSummary::default();
    let mut prepared = Vec::new();
    for (idx, result) in reader.deserialize::<LegalDocumentRow>().enumerate() {
        summary.total_in_csv += 1;
        match result.map_err(RowragError::from).and_then(prepare) {
            Ok(doc) => prepared.push(doc),
            Err(e) => {
                log::warn!("Skipping legal row {}: {}", idx + 1, e);
                summary.failed += 1;
            }
        }
    }

    for batch in prepared.chunks(batch_size.max(1)) {
        match embed_and_upsert(db, embedder, batch.to_vec()).await {
            Ok(n) => {
                summary.ingested += n;
                log::info!("Ingested {} legal documents...", summary.ingested);
            }
            Err(e) => {
                log::error!("Legal batch of {} documents failed: {}", batch.len(), e);
                summary.failed += batch.len();
            }
        }
    }

    log::info!(
        "Legal ingest finished: {} rows, {} ingested, {} failed",
        summary.total_in_csv,
        summary.ingested,
        summary.failed
    );
    Ok(summary)
}

async fn embed_and_upsert(
    db: &Db,
    embedder: &dyn Embedder,
    docs: Vec<PreparedDocument>,
) -> Result<usize> {
    let titles: Vec<String> = docs.iter().map(|d| d.row.title.clone()).collect();
    let contents: Vec<String> = docs.iter().map(|d| d.row.content.clone()).collect();
    let headnotes: Vec<String> = docs
        .iter()
        .map(|d| d.row.headnotes.clone().unwrap_or_else(|| d.row.title.clone()))
        .collect();

    let title_vecs = embedder.embed(&titles).await?;
    let content_vecs = embedder.embed(&contents).await?;
    let headnote_vecs = embedder.embed(&headnotes).await?;
    if title_vecs.len() != docs.len()
        || content_vecs.len() != docs.len()
        || headnote_vecs.len() != docs.len()
    {
        return Err(RowragError::Embedding(
            "provider returned a different number of vectors than inputs".to_string(),
        ));
    }

    db.with_connection(move |conn| {
        let tx = conn.transaction()?;
        let mut count = 0;
        for (i, doc) in docs.iter().enumerate() {
            upsert(
                &tx,
                doc,
                title_vecs[i].as_deref(),
                content_vecs[i].as_deref(),
                headnote_vecs[i].as_deref(),
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    })
    .await
}

fn upsert(
    tx: &Transaction<'_>,
    doc: &PreparedDocument,
    title_vec: Option<&[f32]>,
    content_vec: Option<&[f32]>,
    headnote_vec: Option<&[f32]>,
) -> Result<()> {
    let row = &doc.row;
    tx.execute(
        r#"
        INSERT INTO legal_documents (
            doc_id, doc_type, title, citation, jurisdiction, date_decided, court,
            content, headnotes, practice_area, status,
            title_embedding, content_embedding, headnote_embedding
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(doc_id) DO UPDATE SET
            doc_type = excluded.doc_type,
            title = excluded.title,
            citation = excluded.citation,
            jurisdiction = excluded.jurisdiction,
            date_decided = excluded.date_decided,
            court = excluded.court,
            content = excluded.content,
            headnotes = excluded.headnotes,
            practice_area = excluded.practice_area,
            status = excluded.status,
            title_embedding = excluded.title_embedding,
            content_embedding = excluded.content_embedding,
            headnote_embedding = excluded.headnote_embedding,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        "#,
        params![
            row.doc_id,
            row.doc_type,
            row.title,
            row.citation,
            row.jurisdiction,
            doc.date_decided,
            row.court,
            row.content,
            row.headnotes,
            row.practice_area,
            doc.status.as_str(),
            title_vec.map(encode_vector),
            content_vec.map(encode_vector),
            headnote_vec.map(encode_vector),
        ],
    )?;
    Ok(())
}

/// Stored legal document without its vectors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegalDocument {
    pub id: i64,
    pub doc_id: String,
    pub doc_type: String,
    pub title: String,
    pub citation: Option<String>,
    pub jurisdiction: Option<String>,
    pub date_decided: Option<String>,
    pub court: Option<String>,
    pub content: String,
    pub headnotes: Option<String>,
    pub practice_area: Option<String>,
    pub status: LegalStatus,
}

pub async fn get_legal_document(db: &Db, doc_id: &str) -> Result<LegalDocument> {
    let id = doc_id.to_string();
    let found = db
        .with_connection(move |conn| {
            let row = conn
                .query_row(
                    r#"
                    SELECT id, doc_id, doc_type, title, citation, jurisdiction, date_decided,
                           court, content, headnotes, practice_area, status
                    FROM legal_documents WHERE doc_id = ?1
                    "#,
                    params![id],
                    |r| {
                        Ok((
                            LegalDocument {
                                id: r.get(0)?,
                                doc_id: r.get(1)?,
                                doc_type: r.get(2)?,
                                title: r.get(3)?,
                                citation: r.get(4)?,
                                jurisdiction: r.get(5)?,
                                date_decided: r.get(6)?,
                                court: r.get(7)?,
                                content: r.get(8)?,
                                headnotes: r.get(9)?,
                                practice_area: r.get(10)?,
                                status: LegalStatus::GoodLaw,
                            },
                            r.get::<_, String>(11)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await?;

    let (mut doc, status) = found.ok_or_else(|| RowragError::DocumentNotFound(doc_id.to_string()))?;
    doc.status = status.parse()?;
    Ok(doc)
}

/// Change a document's treatment status (e.g. after it is overruled)
pub async fn update_legal_status(db: &Db, doc_id: &str, status: LegalStatus) -> Result<()> {
    let id = doc_id.to_string();
    let changed = db
        .with_connection(move |conn| {
            Ok(conn.execute(
                "UPDATE legal_documents SET status = ?2, \
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE doc_id = ?1",
                params![id, status.as_str()],
            )?)
        })
        .await?;

    if changed == 0 {
        return Err(RowragError::DocumentNotFound(doc_id.to_string()));
    }
    log::info!("Legal document {} status set to {}", doc_id, status);
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LegalCounts {
    pub total: i64,
    pub by_doc_type: BTreeMap<String, i64>,
}

pub async fn legal_document_counts(db: &Db) -> Result<LegalCounts> {
    db.with_connection(|conn| {
        let mut stmt =
            conn.prepare("SELECT doc_type, COUNT(*) FROM legal_documents GROUP BY doc_type")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = LegalCounts::default();
        for (doc_type, n) in rows {
            counts.total += n;
            counts.by_doc_type.insert(doc_type, n);
        }
        Ok(counts)
    })
    .await
}
