//! Deterministic feature-hashing embedder.
//!
//! Each lowercase token and adjacent token pair is hashed (SHA-256) to a
//! signed bucket; the bucket counts are L2-normalized. Texts sharing vocabulary
//! land close together, which is enough for offline deployments and tests.

use super::{l2_normalize, Embedder};
use crate::error::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub struct HashingEmbedder {
    dimensions: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model: format!("hashing-{}", dimensions),
        }
    }

    fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();
        if tokens.is_empty() {
            return None;
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in &tokens {
            self.accumulate(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.accumulate(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        l2_normalize(&mut vector);
        Some(vector)
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cosine_similarity;

    #[tokio::test]
    async fn test_self_similarity_is_one() {
        let e = HashingEmbedder::new(384);
        let text = "Employers must provide reasonable accommodation".to_string();
        let first = e.embed(&[text.clone()]).await.unwrap().remove(0).unwrap();
        let second = e.embed(&[text]).await.unwrap().remove(0).unwrap();
        assert!((cosine_similarity(&first, &second) - 1.0).abs() < 1e-4);
        assert!((cosine_similarity(&first, &first) - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_scores_higher() {
        let e = HashingEmbedder::new(384);
        let out = e
            .embed(&[
                "wrongful termination employment".to_string(),
                "termination of employment contract".to_string(),
                "patent infringement remedies".to_string(),
            ])
            .await
            .unwrap();
        let a = out[0].as_ref().unwrap();
        let b = out[1].as_ref().unwrap();
        let c = out[2].as_ref().unwrap();
        assert!(cosine_similarity(a, b) > cosine_similarity(a, c));
    }

    #[tokio::test]
    async fn test_blank_and_punctuation_only_yield_none() {
        let e = HashingEmbedder::new(8);
        let out = e.embed(&["".to_string(), "--- !!".to_string(), "ok".to_string()]).await.unwrap();
        assert!(out[0].is_none());
        assert!(out[1].is_none());
        assert!(out[2].is_some());
    }
}
