//! Embedding providers.
//!
//! Providers are constructed once, opened explicitly, and injected wherever
//! vectors are needed. Outputs are L2-normalized so cosine distance and dot
//! product agree.

pub mod cached;
pub mod hashing;
pub mod http;
pub mod storage;

use crate::config::{EmbeddingProviderKind, EmbeddingsConfig};
use crate::error::{Result, RowragError};
use async_trait::async_trait;
use std::sync::Arc;

pub use cached::CachedEmbedder;
pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;
pub use storage::{cosine_similarity, decode_vector, encode_vector, l2_normalize};

/// Text embedding capability
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Prepare the provider for use (connectivity/dimension checks)
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Embed texts in order. Blank inputs yield `None`, never an error.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>>;

    /// Fixed output dimensionality
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    /// Release provider resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Embed a single non-blank text
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let mut out = embedder.embed(&[text.to_string()]).await?;
    out.pop()
        .flatten()
        .ok_or_else(|| RowragError::InvalidInput("cannot embed blank text".to_string()))
}

/// Build the provider described by `cfg`, wrapped in a query cache when
/// `cache_capacity > 0`.
pub fn build_embedder(cfg: &EmbeddingsConfig) -> Result<Arc<dyn Embedder>> {
    let inner: Arc<dyn Embedder> = match cfg.provider {
        EmbeddingProviderKind::Http => {
            let api_key = match &cfg.api_key_env {
                Some(var) => Some(std::env::var(var).map_err(|_| {
                    RowragError::Config(format!("Environment variable {} not set", var))
                })?),
                None => None,
            };
            Arc::new(HttpEmbedder::new(
                cfg.base_url.clone(),
                api_key,
                cfg.model.clone(),
                cfg.batch_size,
                cfg.dimensions,
            )?)
        }
        EmbeddingProviderKind::Hashing => Arc::new(HashingEmbedder::new(cfg.dimensions)),
    };

    if cfg.cache_capacity > 0 {
        Ok(Arc::new(CachedEmbedder::new(inner, cfg.cache_capacity)))
    } else {
        Ok(inner)
    }
}

/// Partition `texts` into (original index, trimmed text) for the non-blank ones
pub(crate) fn non_blank(texts: &[String]) -> Vec<(usize, String)> {
    texts
        .iter()
        .enumerate()
        .filter_map(|(i, t)| {
            let trimmed = t.trim();
            (!trimmed.is_empty()).then(|| (i, trimmed.to_string()))
        })
        .collect()
}

/// Scatter vectors computed for `indexed` back into a result of length `len`
pub(crate) fn scatter(
    len: usize,
    indexed: &[(usize, String)],
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Option<Vec<f32>>>> {
    if vectors.len() != indexed.len() {
        return Err(RowragError::Embedding(format!(
            "provider returned {} vectors for {} inputs",
            vectors.len(),
            indexed.len()
        )));
    }
    let mut out = vec![None; len];
    for ((idx, _), vector) in indexed.iter().zip(vectors) {
        out[*idx] = Some(vector);
    }
    Ok(out)
}
