//! Grounded answers: number the retrieved sources, ask the generator for a
//! cited answer, then check which sources the text actually references.
//! Answers over ingested records use a lighter product-assistant prompt with
//! no citation checking.

use crate::config::GenerationConfig;
use crate::error::Result;
use crate::generation::Generator;
use crate::ingest::LegalStatus;
use crate::search::{RecordSearchResult, SearchResult};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

pub const SYSTEM_PROMPT: &str = "You are a legal content editor at a major legal publisher.

RULES:
1. ONLY use information from the provided source documents. Do not add facts from training data.
2. Every factual claim must include a citation in [brackets] referencing the source number.
3. If uncertain about any legal interpretation, prefix with [NEEDS REVIEW].
4. If sources are insufficient to answer the question, say \"Insufficient sources\" rather than guessing.
5. Note if any cited authority has been overruled or questioned.";

pub const RECORDS_SYSTEM_PROMPT: &str = "You are a helpful product search assistant. \
Answer questions based only on the provided product information. Be concise.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub query: String,
    pub text: String,
    pub sources: Vec<SearchResult>,
    pub citations_used: Vec<String>,
    pub faithfulness_note: String,
}

fn citation_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("Invalid regex pattern"))
}

/// Render the numbered context block handed to the generator
pub fn build_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let citation = r
                .citation
                .as_deref()
                .map(|c| format!(" ({})", c))
                .unwrap_or_default();
            let status = match r.status {
                Some(s) if s != LegalStatus::GoodLaw => format!(" [STATUS: {}]", s),
                _ => String::new(),
            };
            format!(
                "[{}] {}{}{}\nType: {} | Jurisdiction: {}\n{}",
                i + 1,
                r.title,
                citation,
                status,
                r.doc_type,
                r.jurisdiction.as_deref().unwrap_or("unknown"),
                r.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `[i] <title>: <description>`, one block per record
pub fn build_records_context(results: &[RecordSearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "[{}] {}: {}",
                i + 1,
                r.title.as_deref().unwrap_or("Untitled"),
                r.description.as_deref().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_user_prompt(query: &str, context: &str) -> String {
    format!(
        "SOURCES:\n{}\n\nQUESTION: {}\n\nProvide your answer with citations:",
        context, query
    )
}

/// Every `[n]` marker in `text`, in order of appearance
fn markers(text: &str) -> Vec<usize> {
    citation_marker()
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect()
}

/// Distinct in-range marker numbers (1-based), in order of first appearance
fn referenced_sources(text: &str, source_count: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    markers(text)
        .into_iter()
        .filter(|n| (1..=source_count).contains(n))
        .filter(|n| seen.insert(*n))
        .collect()
}

/// Citation strings of the sources referenced by `text`.
///
/// Sources without a citation string contribute nothing.
pub fn extract_citations(text: &str, results: &[SearchResult]) -> Vec<String> {
    referenced_sources(text, results.len())
        .into_iter()
        .filter_map(|n| results[n - 1].citation.clone())
        .collect()
}

/// Counts distinct markers that point at a retrieved source; `[7]` with five
/// results is a dangling reference and is not counted.
pub fn faithfulness_note(text: &str, result_count: usize) -> String {
    if markers(text).is_empty() {
        "WARNING: No source citations found in generated answer. Claims may not be grounded."
            .to_string()
    } else if result_count == 0 {
        "WARNING: No source documents retrieved. Answer may not be grounded.".to_string()
    } else {
        format!(
            "Answer references {} source(s) out of {} retrieved.",
            referenced_sources(text, result_count).len(),
            result_count
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordAnswer {
    pub query: String,
    pub text: String,
    pub sources: Vec<RecordSearchResult>,
}

pub struct AnswerAssembler {
    generator: Arc<dyn Generator>,
    max_tokens: usize,
    temperature: f32,
}

impl AnswerAssembler {
    pub fn new(generator: Arc<dyn Generator>, cfg: &GenerationConfig) -> Self {
        Self {
            generator,
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        }
    }

    /// Generate a cited answer over already-ranked results.
    ///
    /// Generator failures are returned as-is (`ProviderUnavailable`), never
    /// turned into an empty answer.
    pub async fn assemble(&self, query: &str, results: Vec<SearchResult>) -> Result<Answer> {
        let context = build_context(&results);
        let user = build_user_prompt(query, &context);

        let start = std::time::Instant::now();
        let text = self
            .generator
            .generate(SYSTEM_PROMPT, &user, self.max_tokens, self.temperature)
            .await?;
        log::info!(
            "Answer generated by {} in {:?} from {} sources",
            self.generator.model_name(),
            start.elapsed(),
            results.len()
        );

        let citations_used = extract_citations(&text, &results);
        let faithfulness_note = faithfulness_note(&text, results.len());

        Ok(Answer {
            query: query.to_string(),
            text,
            sources: results,
            citations_used,
            faithfulness_note,
        })
    }

    /// Generate an answer over ingested records
    pub async fn assemble_records(
        &self,
        query: &str,
        results: Vec<RecordSearchResult>,
    ) -> Result<RecordAnswer> {
        let user = format!(
            "Products:\n{}\n\nQuestion: {}",
            build_records_context(&results),
            query
        );
        let text = self
            .generator
            .generate(RECORDS_SYSTEM_PROMPT, &user, self.max_tokens, self.temperature)
            .await?;
        log::info!("Record answer generated from {} records", results.len());

        Ok(RecordAnswer {
            query: query.to_string(),
            text,
            sources: results,
        })
    }
}
