use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

/// Thread-safe LRU cache for query embeddings
///
/// Keyed by the trimmed query text. Search requests repeat the same
/// handful of queries, so a small bounded cache removes most provider calls.
pub struct EmbeddingCache {
    cache: Mutex<LruCache<String, Vec<f32>>>,
    capacity: NonZeroUsize,
}

impl EmbeddingCache {
    /// Create a new embedding cache; a capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            capacity,
        }
    }

    // A panic while holding the lock cannot leave the LRU half-updated in a
    // way that matters for a cache, so recover the guard.
    fn lock(&self) -> MutexGuard<'_, LruCache<String, Vec<f32>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a cached embedding, marking it most recently used
    pub fn get(&self, query: &str) -> Option<Vec<f32>> {
        self.lock().get(query).cloned()
    }

    /// Store an embedding, evicting the least recently used entry when full
    pub fn put(&self, query: String, embedding: Vec<f32>) {
        self.lock().put(query, embedding);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
