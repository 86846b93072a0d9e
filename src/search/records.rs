use crate::db::Db;
use crate::embeddings::{cosine_similarity, decode_vector};
use crate::error::{Result, RowragError};
use rusqlite::params;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::str::FromStr;

/// Vector column of `ingested_records` to search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordField {
    #[default]
    Content,
    Title,
}

impl RecordField {
    fn statement(&self) -> &'static str {
        match self {
            RecordField::Content => {
                "SELECT id, title, description, category, tags, raw_data, content_embedding \
                 FROM ingested_records \
                 WHERE status = 'active' AND content_embedding IS NOT NULL \
                   AND (?1 IS NULL OR category = ?1)"
            }
            RecordField::Title => {
                "SELECT id, title, description, category, tags, raw_data, title_embedding \
                 FROM ingested_records \
                 WHERE status = 'active' AND title_embedding IS NOT NULL \
                   AND (?1 IS NULL OR category = ?1)"
            }
        }
    }
}

impl FromStr for RecordField {
    type Err = RowragError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "content" => Ok(RecordField::Content),
            "title" => Ok(RecordField::Title),
            other => Err(RowragError::InvalidInput(format!(
                "unknown record field '{}' (expected content or title)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSearchResult {
    pub id: i64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub raw_data: Map<String, Value>,
    pub similarity: f64,
}

/// Semantic search over active ingested records, optionally restricted to
/// one category.
pub async fn search_records(
    db: &Db,
    query_vec: &[f32],
    field: RecordField,
    category: Option<&str>,
    top_k: usize,
) -> Result<Vec<RecordSearchResult>> {
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let query_vec = query_vec.to_vec();
    let category = category.map(str::to_string);

    let mut results = db
        .with_connection(move |conn| {
            let mut stmt = conn.prepare(field.statement())?;
            let mut rows = stmt.query(params![category])?;

            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let blob: Vec<u8> = row.get(6)?;
                let Some(vector) = decode_vector(&blob).filter(|v| v.len() == query_vec.len())
                else {
                    continue;
                };

                let tags: Option<String> = row.get(4)?;
                let raw_data: String = row.get(5)?;
                results.push(RecordSearchResult {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    category: row.get(3)?,
                    tags: tags.as_deref().map(serde_json::from_str).transpose()?,
                    raw_data: serde_json::from_str(&raw_data)?,
                    similarity: cosine_similarity(&query_vec, &vector) as f64,
                });
            }
            Ok(results)
        })
        .await?;

    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    results.truncate(top_k);
    Ok(results)
}
