//! Retrieval over the legal corpus and ingested records.
//!
//! Semantic search scores stored vectors by cosine similarity; keyword search
//! uses FTS5 BM25; hybrid fuses the two with Reciprocal Rank Fusion. Filters
//! are applied in SQL on both paths before ranking.

pub mod filters;
pub mod hybrid;
pub mod keyword;
pub mod records;
pub mod vector;

pub use filters::SearchFilters;
pub use hybrid::{reciprocal_rank_fusion, search_hybrid};
pub use keyword::search_keyword;
pub use records::{search_records, RecordField, RecordSearchResult};
pub use vector::search_semantic;

use crate::config::SearchConfig;
use crate::db::Db;
use crate::embeddings::{embed_one, Embedder};
use crate::error::{Result, RowragError};
use crate::ingest::LegalStatus;
use serde::Serialize;
use std::str::FromStr;

pub const SNIPPET_CHARS: usize = 300;

/// Which retrieval path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Semantic,
    Keyword,
    Hybrid,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Semantic => "semantic",
            SearchMethod::Keyword => "keyword",
            SearchMethod::Hybrid => "hybrid",
        }
    }
}

/// Search mode: one vector column, or hybrid fusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchField {
    Content,
    Title,
    Headnotes,
    #[default]
    Hybrid,
}

impl FromStr for SearchField {
    type Err = RowragError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "content" => Ok(SearchField::Content),
            "title" => Ok(SearchField::Title),
            "headnotes" | "headnote" => Ok(SearchField::Headnotes),
            "hybrid" => Ok(SearchField::Hybrid),
            other => Err(RowragError::InvalidInput(format!(
                "unknown search field '{}' (expected content, title, headnotes or hybrid)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: i64,
    pub doc_id: String,
    pub doc_type: String,
    pub title: String,
    pub citation: Option<String>,
    pub jurisdiction: Option<String>,
    pub court: Option<String>,
    pub practice_area: Option<String>,
    pub status: Option<LegalStatus>,
    pub snippet: String,
    /// Cosine similarity of the semantic match; 0 for keyword-only hits
    pub similarity: f64,
    pub score: f64,
    pub search_method: SearchMethod,
    /// 1-based position in the returned list
    pub rank: usize,
}

pub(crate) fn snippet(content: &str) -> String {
    content.chars().take(SNIPPET_CHARS).collect()
}

/// Leading columns selected by both retrieval paths
macro_rules! result_columns_sql {
    () => {
        "d.id, d.doc_id, d.doc_type, d.title, d.citation, d.jurisdiction, d.court, \
         d.practice_area, d.status, d.content"
    };
}
pub(crate) use result_columns_sql;

/// Read the leading `result_columns_sql!()` of a row into an unranked result
pub(crate) fn result_from_row(
    row: &rusqlite::Row<'_>,
    method: SearchMethod,
) -> rusqlite::Result<SearchResult> {
    let status: Option<String> = row.get(8)?;
    let content: String = row.get(9)?;
    Ok(SearchResult {
        id: row.get(0)?,
        doc_id: row.get(1)?,
        doc_type: row.get(2)?,
        title: row.get(3)?,
        citation: row.get(4)?,
        jurisdiction: row.get(5)?,
        court: row.get(6)?,
        practice_area: row.get(7)?,
        status: status.and_then(|s| s.parse().ok()),
        snippet: snippet(&content),
        similarity: 0.0,
        score: 0.0,
        search_method: method,
        rank: 0,
    })
}

pub(crate) fn assign_ranks(results: &mut [SearchResult]) {
    for (idx, result) in results.iter_mut().enumerate() {
        result.rank = idx + 1;
    }
}

/// Search the legal corpus.
///
/// `top_k == 0` returns no results. Hybrid mode draws
/// `max(candidate_cap, top_k)` candidates from each path.
pub async fn search_legal(
    db: &Db,
    embedder: &dyn Embedder,
    query: &str,
    top_k: usize,
    filters: &SearchFilters,
    field: SearchField,
    cfg: &SearchConfig,
) -> Result<Vec<SearchResult>> {
    filters.validate()?;
    if query.trim().is_empty() {
        return Err(RowragError::InvalidInput("query is empty".to_string()));
    }
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let start = std::time::Instant::now();
    let query_vec = embed_one(embedder, query).await?;

    let results = match field {
        SearchField::Hybrid => {
            let candidates = cfg.candidate_cap.max(top_k);
            search_hybrid(db, &query_vec, query, filters, top_k, candidates, cfg.rrf_k).await?
        }
        column => search_semantic(db, &query_vec, column, filters, top_k).await?,
    };

    log::debug!(
        "Legal search ({:?}) returned {} results in {:?}",
        field,
        results.len(),
        start.elapsed()
    );
    Ok(results)
}
