use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Lifecycle of an ingested row; rows are only ever soft-deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Deleted,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Deleted => "deleted",
        }
    }
}

/// One persisted CSV row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestedRecord {
    pub source_file: String,
    /// 1-based position of the row below the header
    pub row_number: i64,
    pub row_key: String,
    pub raw_data: Map<String, Value>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub searchable_content: String,
    #[serde(skip)]
    pub content_embedding: Option<Vec<f32>>,
    #[serde(skip)]
    pub title_embedding: Option<Vec<f32>>,
    pub status: RecordStatus,
    pub metadata: Value,
}

/// Stable key for a (file, row) pair.
///
/// Stored indexed but not unique: a redelivered file appends duplicate rows
/// sharing the same key, which a later cleanup pass can collapse.
pub fn row_key(source_file: &str, row_number: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", source_file, row_number).as_bytes());
    format!("{:x}", hasher.finalize())
}
