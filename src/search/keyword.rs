use super::filters::{legal_filter_sql, SearchFilters};
use super::{assign_ranks, result_columns_sql, result_from_row, SearchMethod, SearchResult};
use crate::db::Db;
use crate::error::Result;
use rusqlite::ToSql;
use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "should", "could", "what", "which", "who", "where", "when",
    "why", "how", "this", "that", "these", "those", "not", "no",
];

/// Split a query into lowercase search terms, dropping stop words and
/// one-character tokens. Anything that is not alphanumeric separates terms,
/// so FTS5 operators and quotes never reach the MATCH expression.
pub fn keyword_terms(query: &str) -> Vec<String> {
    let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    let mut seen = HashSet::new();
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() >= 2 && !stop.contains(t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// FTS5 expression requiring every term in the `content` column
pub fn match_expression(terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("content : \"{}\"", t))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

/// Map a BM25 score (negative, lower is better) into (0, 1), higher is better
pub fn normalize_bm25_score(raw_score: f64) -> f64 {
    if raw_score.is_nan() || raw_score.is_infinite() {
        return 0.0;
    }
    1.0 / (1.0 + raw_score.exp())
}

const KEYWORD_SQL: &str = concat!(
    "SELECT ",
    result_columns_sql!(),
    ", bm25(legal_documents_fts) AS raw_score \
     FROM legal_documents_fts \
     JOIN legal_documents d ON d.id = legal_documents_fts.rowid \
     WHERE legal_documents_fts MATCH :query",
    legal_filter_sql!(),
    " ORDER BY raw_score, d.id LIMIT :limit"
);

/// BM25 search over document content.
///
/// A query with no usable terms returns no results rather than an error.
pub async fn search_keyword(
    db: &Db,
    query: &str,
    filters: &SearchFilters,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let Some(expression) = match_expression(&keyword_terms(query)) else {
        return Ok(Vec::new());
    };
    if limit == 0 {
        return Ok(Vec::new());
    }

    let start = std::time::Instant::now();
    let filters = filters.clone();
    let limit = limit as i64;

    let mut results = db
        .with_connection(move |conn| {
            let mut stmt = conn.prepare(KEYWORD_SQL)?;
            let mut params = filters.named_params();
            params.push((":query", &expression as &dyn ToSql));
            params.push((":limit", &limit as &dyn ToSql));

            let mut rows = stmt.query(&params[..])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let raw_score: f64 = row.get(10)?;
                let mut result = result_from_row(row, SearchMethod::Keyword)?;
                result.score = normalize_bm25_score(raw_score);
                results.push(result);
            }
            Ok(results)
        })
        .await?;

    assign_ranks(&mut results);
    log::debug!(
        "Keyword search took {:?}, returned {} results",
        start.elapsed(),
        results.len()
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::test_support::legal_db;

    #[test]
    fn test_keyword_terms() {
        assert_eq!(keyword_terms("What is the duty to warn?"), vec!["duty", "warn"]);
        assert_eq!(
            keyword_terms("\"separate\" -equal* (railway) OR NEAR"),
            vec!["separate", "equal", "railway", "near"]
        );
        assert_eq!(keyword_terms("Warn warn WARN"), vec!["warn"]);
        assert!(keyword_terms("the a of ?").is_empty());
    }

    #[test]
    fn test_match_expression() {
        let terms = vec!["duty".to_string(), "warn".to_string()];
        assert_eq!(
            match_expression(&terms).unwrap(),
            "content : \"duty\" AND content : \"warn\""
        );
        assert!(match_expression(&[]).is_none());
    }

    #[test]
    fn test_normalize_bm25_score() {
        assert!(normalize_bm25_score(-5.0) > 0.9);
        assert!((normalize_bm25_score(0.0) - 0.5).abs() < 1e-9);
        assert!(normalize_bm25_score(5.0) < 0.1);
        assert_eq!(normalize_bm25_score(f64::NAN), 0.0);
        assert_eq!(normalize_bm25_score(f64::NEG_INFINITY), 0.0);
    }

    #[tokio::test]
    async fn test_keyword_search_matches_content_only() {
        let (db, _temp, _embedder) = legal_db().await;

        let results = search_keyword(&db, "overtime workweek", &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "reg-001");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].similarity, 0.0);
        assert_eq!(results[0].search_method, SearchMethod::Keyword);

        // "Miranda" appears only in a title
        let title_only = search_keyword(&db, "Miranda", &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert!(title_only.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_respects_filters() {
        let (db, _temp, _embedder) = legal_db().await;

        let all = search_keyword(&db, "warn warnings", &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let filtered = SearchFilters {
            jurisdiction: Some("California".to_string()),
            ..Default::default()
        };
        let results = search_keyword(&db, "warn warnings", &filtered, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "case-003");
    }

    #[tokio::test]
    async fn test_keyword_search_requires_every_term() {
        let (db, _temp, _embedder) = legal_db().await;

        // case-002 mentions railways and reg-001 overtime, neither both
        let results = search_keyword(&db, "overtime railway", &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert!(results.is_empty());

        let results = search_keyword(&db, "duty to warn", &SearchFilters::default(), 10)
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["case-003"]);
    }

    #[tokio::test]
    async fn test_keyword_search_stop_words_only() {
        let (db, _temp, _embedder) = legal_db().await;
        let results = search_keyword(&db, "what is the", &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
