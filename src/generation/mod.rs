//! Text generation providers.

use crate::config::GenerationConfig;
use crate::error::{Result, RowragError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Chat-style text generation
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a completion for a system + user prompt pair.
    ///
    /// Any provider failure surfaces as `ProviderUnavailable`.
    async fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String>;

    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for OpenAI-compatible `/chat/completions` servers
pub struct HttpGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpGenerator {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Result<Self> {
        // Generation on CPU-only hosts is slow; allow well beyond the embedder timeout
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| RowragError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            max_tokens,
            temperature,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let start = std::time::Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| RowragError::ProviderUnavailable(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RowragError::ProviderUnavailable(format!(
                "Generation API error {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            RowragError::ProviderUnavailable(format!("Failed to parse response: {}", e))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                RowragError::ProviderUnavailable("Generation response had no content".to_string())
            })?;

        log::debug!(
            "Generated {} chars with {} in {:?}",
            text.len(),
            self.model,
            start.elapsed()
        );
        Ok(text.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Build the generation provider described by `cfg`
pub fn build_generator(cfg: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    let api_key = match &cfg.api_key_env {
        Some(var) => Some(std::env::var(var).map_err(|_| {
            RowragError::Config(format!("Environment variable {} not set", var))
        })?),
        None => None,
    };
    Ok(Arc::new(HttpGenerator::new(
        cfg.base_url.clone(),
        api_key,
        cfg.model.clone(),
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_base_url() {
        let g = HttpGenerator::new("http://localhost:8081/v1/".to_string(), None, "phi".to_string())
            .unwrap();
        assert_eq!(g.endpoint(), "http://localhost:8081/v1/chat/completions");
        assert_eq!(g.model_name(), "phi");
    }

    #[test]
    fn test_build_generator_from_defaults() {
        let g = build_generator(&GenerationConfig::default()).unwrap();
        assert_eq!(g.model_name(), "phi-3.5-mini-instruct");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_provider_unavailable() {
        // Port 9 (discard) is closed on test hosts
        let g = HttpGenerator::new("http://127.0.0.1:9/v1".to_string(), None, "m".to_string())
            .unwrap();
        let err = g.generate("sys", "user", 10, 0.0).await.unwrap_err();
        assert!(matches!(err, RowragError::ProviderUnavailable(_)));
    }

    #[test]
    fn test_response_without_content_parses() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
