use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rowrag: RowragConfig,
    pub embeddings: EmbeddingsConfig,
    /// Separate model for the legal corpus; falls back to `embeddings` when absent.
    #[serde(default)]
    pub legal_embeddings: Option<EmbeddingsConfig>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

/// Store location and logging
#[derive(Debug, Clone, Deserialize)]
pub struct RowragConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which embedding backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// OpenAI-compatible `/embeddings` endpoint
    Http,
    /// Deterministic feature hashing, no network
    Hashing,
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embeddings_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    pub dimensions: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_embeddings_base_url() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_embedding_batch_size() -> usize {
    32
}

fn default_cache_capacity() -> usize {
    1000
}

/// Generation provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            model: default_generation_model(),
            api_key_env: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_generation_base_url() -> String {
    "http://localhost:8081/v1".to_string()
}

fn default_generation_model() -> String {
    "phi-3.5-mini-instruct".to_string()
}

fn default_max_tokens() -> usize {
    300
}

fn default_temperature() -> f32 {
    0.7
}

/// Batch sizes and column alias lists used by the field detector
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_title_fields")]
    pub title_fields: Vec<String>,
    #[serde(default = "default_description_fields")]
    pub description_fields: Vec<String>,
    #[serde(default = "default_category_fields")]
    pub category_fields: Vec<String>,
    #[serde(default = "default_tag_fields")]
    pub tag_fields: Vec<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_ingest_batch_size(),
            title_fields: default_title_fields(),
            description_fields: default_description_fields(),
            category_fields: default_category_fields(),
            tag_fields: default_tag_fields(),
        }
    }
}

fn default_ingest_batch_size() -> usize {
    100
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_title_fields() -> Vec<String> {
    strings(&["title", "name", "heading", "subject"])
}

fn default_description_fields() -> Vec<String> {
    strings(&["description", "content", "text", "body", "summary"])
}

fn default_category_fields() -> Vec<String> {
    strings(&["category", "type", "class", "group"])
}

fn default_tag_fields() -> Vec<String> {
    strings(&["tags", "keywords", "labels"])
}

/// Worker queue and object store settings
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_object_store_root")]
    pub object_store_root: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
    /// Worst-case time to process the largest expected file
    #[serde(default = "default_max_processing")]
    pub max_processing_secs: u64,
    #[serde(default = "default_wait_time")]
    pub wait_time_secs: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Deliveries before a message is dead-lettered
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    #[serde(default = "default_backoff_step")]
    pub backoff_step_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            object_store_root: default_object_store_root(),
            bucket: default_bucket(),
            visibility_timeout_secs: default_visibility_timeout(),
            max_processing_secs: default_max_processing(),
            wait_time_secs: default_wait_time(),
            max_consecutive_errors: default_max_consecutive_errors(),
            max_receive_count: default_max_receive_count(),
            backoff_step_secs: default_backoff_step(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}

fn default_object_store_root() -> PathBuf {
    PathBuf::from("./objects")
}

fn default_bucket() -> String {
    "uploads".to_string()
}

fn default_visibility_timeout() -> u64 {
    900
}

fn default_max_processing() -> u64 {
    600
}

fn default_wait_time() -> u64 {
    20
}

fn default_max_consecutive_errors() -> u32 {
    10
}

fn default_max_receive_count() -> u32 {
    5
}

fn default_backoff_step() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    60
}

/// Retrieval configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    /// Per-path candidate cap for hybrid search
    #[serde(default = "default_candidate_cap")]
    pub candidate_cap: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            candidate_cap: default_candidate_cap(),
            rrf_k: default_rrf_k(),
        }
    }
}

fn default_k() -> usize {
    10
}

fn default_candidate_cap() -> usize {
    20
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in ROWRAG_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("ROWRAG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml_str(&config_str)?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration text without touching the environment
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse config.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        validate_embeddings("embeddings", &self.embeddings)?;
        if let Some(legal) = &self.legal_embeddings {
            validate_embeddings("legal_embeddings", legal)?;
        }

        if let Some(var) = &self.generation.api_key_env {
            std::env::var(var).with_context(|| {
                format!(
                    "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                    var
                )
            })?;
        }

        if self.ingestion.batch_size == 0 {
            anyhow::bail!("ingestion.batch_size must be greater than 0");
        }

        let alias_lists = [
            ("title_fields", &self.ingestion.title_fields),
            ("description_fields", &self.ingestion.description_fields),
            ("category_fields", &self.ingestion.category_fields),
            ("tag_fields", &self.ingestion.tag_fields),
        ];
        for (name, list) in alias_lists {
            if list.iter().all(|s| s.trim().is_empty()) {
                anyhow::bail!("ingestion.{} must contain at least one column name", name);
            }
        }

        // A lease shorter than the processing time guarantees redelivery mid-flight
        if self.worker.visibility_timeout_secs <= self.worker.max_processing_secs {
            anyhow::bail!(
                "worker.visibility_timeout_secs ({}) must be greater than worker.max_processing_secs ({})",
                self.worker.visibility_timeout_secs,
                self.worker.max_processing_secs
            );
        }

        if self.worker.max_consecutive_errors == 0 {
            anyhow::bail!("worker.max_consecutive_errors must be greater than 0");
        }

        // A single undeliverable message must be dead-lettered before it alone
        // can trip the consecutive-error limit
        if self.worker.max_receive_count == 0
            || self.worker.max_receive_count >= self.worker.max_consecutive_errors
        {
            anyhow::bail!(
                "worker.max_receive_count ({}) must be between 1 and worker.max_consecutive_errors ({})",
                self.worker.max_receive_count,
                self.worker.max_consecutive_errors
            );
        }

        if self.search.default_k == 0 {
            anyhow::bail!("search.default_k must be greater than 0");
        }

        if self.search.candidate_cap < self.search.default_k {
            anyhow::bail!("search.candidate_cap must be at least search.default_k");
        }

        if self.search.rrf_k <= 0.0 {
            anyhow::bail!("search.rrf_k must be positive");
        }

        if !(0.0..=2.0).contains(&self.generation.temperature) {
            anyhow::bail!("generation.temperature must be between 0.0 and 2.0");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.rowrag.db_path
    }

    /// Embedding settings for the legal corpus
    pub fn legal_embeddings(&self) -> &EmbeddingsConfig {
        self.legal_embeddings.as_ref().unwrap_or(&self.embeddings)
    }
}

fn validate_embeddings(section: &str, cfg: &EmbeddingsConfig) -> Result<()> {
    if cfg.dimensions == 0 {
        anyhow::bail!("{}.dimensions must be greater than 0", section);
    }
    if cfg.batch_size == 0 {
        anyhow::bail!("{}.batch_size must be greater than 0", section);
    }
    if let Some(var) = &cfg.api_key_env {
        std::env::var(var).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                var
            )
        })?;
    }
    Ok(())
}
