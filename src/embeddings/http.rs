use super::{l2_normalize, non_blank, scatter, Embedder};
use crate::error::{Result, RowragError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request structure for an OpenAI-compatible embeddings endpoint
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Response structure from the embeddings endpoint
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

const MAX_RETRIES: usize = 3;

/// HTTP embeddings client for OpenAI-compatible servers (TEI, vLLM, OpenAI)
///
/// Splits input into `batch_size` requests, retries 429/5xx with exponential
/// backoff, and L2-normalizes every returned vector.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    batch_size: usize,
    dimensions: usize,
}

impl HttpEmbedder {
    /// Create a new HTTP embedder
    ///
    /// # Arguments
    ///
    /// * `base_url` - Server base URL, e.g. `http://localhost:8080/v1`
    /// * `api_key` - Optional bearer token
    /// * `model` - Model name sent with each request
    /// * `batch_size` - Maximum number of texts per request (capped at 2048)
    /// * `dimensions` - Expected output dimensionality
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        batch_size: usize,
        dimensions: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RowragError::Embedding(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model,
            batch_size: batch_size.clamp(1, 2048),
            dimensions,
        })
    }

    /// Single request, no retry
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RowragError::Embedding(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RowragError::Embedding(format!(
                "Embedding API error {}: {}",
                status.as_u16(),
                body
            )));
        }

        let mut result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RowragError::Embedding(format!("Failed to parse response: {}", e)))?;

        // Servers may return entries out of order when they carry an index
        if result.data.iter().all(|d| d.index.is_some()) {
            result.data.sort_by_key(|d| d.index);
        }

        let mut vectors = Vec::with_capacity(result.data.len());
        for data in result.data {
            let mut embedding = data.embedding;
            if embedding.len() != self.dimensions {
                return Err(RowragError::Embedding(format!(
                    "Unexpected embedding dimension: expected {}, got {}",
                    self.dimensions,
                    embedding.len()
                )));
            }
            l2_normalize(&mut embedding);
            vectors.push(embedding);
        }
        Ok(vectors)
    }

    /// Request with retry on rate limiting and server errors
    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = std::time::Instant::now();
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            match self.request(texts).await {
                Ok(vectors) => {
                    log::debug!(
                        "Embedding API call for {} texts took {:?} (attempt {})",
                        texts.len(),
                        start.elapsed(),
                        attempt + 1
                    );
                    return Ok(vectors);
                }
                Err(e) if attempt < MAX_RETRIES && is_retryable(&e) => {
                    log::warn!("Retry {}/{} after error: {}", attempt + 1, MAX_RETRIES, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_retryable(err: &RowragError) -> bool {
    let msg = err.to_string();
    msg.contains("Network error")
        || ["429", "500", "502", "503", "504"]
            .iter()
            .any(|code| msg.contains(&format!("error {}", code)))
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn open(&self) -> Result<()> {
        // Probe once so a wrong model/dimension fails at startup, not mid-file
        let probe = self.request_with_retry(&["ping".to_string()]).await?;
        if probe.len() != 1 {
            return Err(RowragError::Embedding(
                "Embedding server returned no vector for probe".to_string(),
            ));
        }
        log::info!(
            "Embedding provider ready: model={}, dimensions={}, endpoint={}",
            self.model,
            self.dimensions,
            self.endpoint
        );
        Ok(())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let indexed = non_blank(texts);
        if indexed.is_empty() {
            return Ok(vec![None; texts.len()]);
        }

        let inputs: Vec<String> = indexed.iter().map(|(_, t)| t.clone()).collect();
        let mut vectors = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(self.batch_size) {
            vectors.extend(self.request_with_retry(chunk).await?);
        }

        scatter(texts.len(), &indexed, vectors)
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

    fn embedder(batch_size: usize) -> HttpEmbedder {
        HttpEmbedder::new(
            "http://localhost:8080/v1/".to_string(),
            None,
            "all-MiniLM-L6-v2".to_string(),
            batch_size,
            384,
        )
        .unwrap()
    }

    #[test]
    fn test_embedder_new() {
        let e = embedder(32);
        assert_eq!(e.model_name(), "all-MiniLM-L6-v2");
        assert_eq!(e.dimensions(), 384);
        assert_eq!(e.batch_size, 32);
        assert_eq!(e.endpoint, "http://localhost:8080/v1/embeddings");
    }

    #[test]
    fn test_embedder_batch_size_limits() {
        assert_eq!(embedder(5000).batch_size, 2048);
        assert_eq!(embedder(0).batch_size, 1);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(is_retryable(&RowragError::Embedding("Embedding API error 429: slow down".into())));
        assert!(is_retryable(&RowragError::Embedding("Embedding API error 503: busy".into())));
        assert!(is_retryable(&RowragError::Embedding("Network error: refused".into())));
        assert!(!is_retryable(&RowragError::Embedding("Embedding API error 400: bad".into())));
    }

    #[tokio::test]
    async fn test_all_blank_input_skips_network() {
        // No server is listening; blank inputs must not trigger a request
        let e = embedder(32);
        let out = e.embed(&["".to_string(), "   ".to_string()]).await.unwrap();
        assert_eq!(out, vec![None, None]);
    }
}
