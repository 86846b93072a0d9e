use super::filters::SearchFilters;
use super::keyword::search_keyword;
use super::vector::search_semantic;
use super::{assign_ranks, SearchField, SearchMethod, SearchResult};
use crate::db::Db;
use crate::error::Result;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Hybrid search: semantic over the content vector and BM25 keyword search,
/// both under the same filters, fused with Reciprocal Rank Fusion.
///
/// Each path contributes up to `candidates` results; the fused list is cut
/// to `top_k`.
pub async fn search_hybrid(
    db: &Db,
    query_vec: &[f32],
    query: &str,
    filters: &SearchFilters,
    top_k: usize,
    candidates: usize,
    rrf_k: f64,
) -> Result<Vec<SearchResult>> {
    let total_start = std::time::Instant::now();
    let candidates = candidates.max(top_k);

    let (semantic, keyword) = tokio::join!(
        search_semantic(db, query_vec, SearchField::Content, filters, candidates),
        search_keyword(db, query, filters, candidates)
    );
    let semantic = semantic?;
    let keyword = keyword?;

    log::debug!(
        "Hybrid search: {} semantic, {} keyword candidates",
        semantic.len(),
        keyword.len()
    );

    let fused = reciprocal_rank_fusion(semantic, keyword, rrf_k, top_k);
    log::debug!(
        "Hybrid search total: {:?} ({} results)",
        total_start.elapsed(),
        fused.len()
    );
    Ok(fused)
}

/// Combine two ranked lists with Reciprocal Rank Fusion.
///
/// ```text
/// score(d) = Σ 1 / (k + rank_i(d))
/// ```
///
/// Ranks are 1-based positions in each input list. A document found by both
/// paths is labelled `hybrid` and keeps its semantic similarity; keyword-only
/// documents have similarity 0. Ties on the fused score break by id ascending.
pub fn reciprocal_rank_fusion(
    semantic: Vec<SearchResult>,
    keyword: Vec<SearchResult>,
    k: f64,
    top_k: usize,
) -> Vec<SearchResult> {
    let mut fused: HashMap<i64, SearchResult> = HashMap::new();

    for (idx, mut result) in semantic.into_iter().enumerate() {
        result.score = 1.0 / (k + (idx + 1) as f64);
        result.search_method = SearchMethod::Semantic;
        fused.insert(result.id, result);
    }

    for (idx, mut result) in keyword.into_iter().enumerate() {
        let rrf = 1.0 / (k + (idx + 1) as f64);
        fused
            .entry(result.id)
            .and_modify(|existing| {
                existing.score += rrf;
                existing.search_method = SearchMethod::Hybrid;
            })
            .or_insert_with(|| {
                result.score = rrf;
                result.similarity = 0.0;
                result.search_method = SearchMethod::Keyword;
                result
            });
    }

    let mut ranked: Vec<SearchResult> = fused.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    ranked.truncate(top_k);
    assign_ranks(&mut ranked);
    ranked
}
