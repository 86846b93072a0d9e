use super::filters::{legal_filter_sql, SearchFilters};
use super::{assign_ranks, result_columns_sql, result_from_row, SearchField, SearchMethod, SearchResult};
use crate::db::Db;
use crate::embeddings::{cosine_similarity, decode_vector};
use crate::error::{Result, RowragError};
use std::cmp::Ordering;

macro_rules! semantic_sql {
    ($column:literal) => {
        concat!(
            "SELECT ",
            result_columns_sql!(),
            ", d.",
            $column,
            " FROM legal_documents d WHERE d.",
            $column,
            " IS NOT NULL",
            legal_filter_sql!()
        )
    };
}

/// Fixed statement per vector column
fn semantic_statement(field: SearchField) -> Result<&'static str> {
    match field {
        SearchField::Content => Ok(semantic_sql!("content_embedding")),
        SearchField::Title => Ok(semantic_sql!("title_embedding")),
        SearchField::Headnotes => Ok(semantic_sql!("headnote_embedding")),
        SearchField::Hybrid => Err(RowragError::InvalidInput(
            "hybrid is not a vector column".to_string(),
        )),
    }
}

/// Order by cosine distance ascending, ties by id ascending
pub(crate) fn by_distance(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then(a.id.cmp(&b.id))
}

/// Semantic search over one vector column.
///
/// Scans every filtered row with a stored vector and scores it in memory;
/// rows whose vector has a different dimension than the query are skipped.
pub async fn search_semantic(
    db: &Db,
    query_vec: &[f32],
    field: SearchField,
    filters: &SearchFilters,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let sql = semantic_statement(field)?;
    if limit == 0 {
        return Ok(Vec::new());
    }

    let start = std::time::Instant::now();
    let query_vec = query_vec.to_vec();
    let filters = filters.clone();

    let mut results = db
        .with_connection(move |conn| {
            let mut stmt = conn.prepare(sql)?;
            let params = filters.named_params();
            let mut rows = stmt.query(&params[..])?;

            let mut scored = Vec::new();
            let mut skipped = 0usize;
            while let Some(row) = rows.next()? {
                let blob: Vec<u8> = row.get(10)?;
                let vector = match decode_vector(&blob) {
                    Some(v) if v.len() == query_vec.len() => v,
                    _ => {
                        skipped += 1;
                        continue;
                    }
                };
                let mut result = result_from_row(row, SearchMethod::Semantic)?;
                result.similarity = cosine_similarity(&query_vec, &vector) as f64;
                result.score = result.similarity;
                scored.push(result);
            }

            if skipped > 0 {
                log::warn!("Skipped {} vectors with unexpected dimensions", skipped);
            }
            Ok(scored)
        })
        .await?;

    results.sort_by(by_distance);
    results.truncate(limit);
    assign_ranks(&mut results);

    log::debug!(
        "Semantic search ({:?}) took {:?}, returned {} results",
        field,
        start.elapsed(),
        results.len()
    );
    Ok(results)
}
