use super::Embedder;
use crate::cache::EmbeddingCache;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Wraps a provider with an LRU cache for single-text (query) embeddings.
///
/// Multi-text calls come from ingestion batches and bypass the cache.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: EmbeddingCache,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: EmbeddingCache::new(capacity),
        }
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn open(&self) -> Result<()> {
        self.inner.open().await
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        if texts.len() != 1 {
            return self.inner.embed(texts).await;
        }

        let key = texts[0].trim();
        if let Some(cached) = self.cache.get(key) {
            log::debug!("Cache hit for query: {}", key);
            return Ok(vec![Some(cached)]);
        }

        let out = self.inner.embed(texts).await?;
        if let Some(Some(vector)) = out.first() {
            self.cache.put(key.to_string(), vector.clone());
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn close(&self) -> Result<()> {
        self.cache.clear();
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts).await
        }
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
        fn model_name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_repeated_query_hits_cache() {
        let counting = Arc::new(CountingEmbedder {
            inner: HashingEmbedder::new(16),
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(counting.clone(), 10);

        let q = vec!["employment law".to_string()];
        let first = cached.embed(&q).await.unwrap();
        let second = cached.embed(&q).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_batches_bypass_cache() {
        let counting = Arc::new(CountingEmbedder {
            inner: HashingEmbedder::new(16),
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(counting.clone(), 10);

        let batch = vec!["a".to_string(), "b".to_string()];
        cached.embed(&batch).await.unwrap();
        cached.embed(&batch).await.unwrap();

        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
        assert!(cached.cache().is_empty());
    }
}
