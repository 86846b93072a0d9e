use thiserror::Error;

/// Main error type for rowrag
#[derive(Error, Debug)]
pub enum RowragError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A migration file failed to apply; nothing from it was committed
    #[error("Migration {name} failed: {source}")]
    Migration {
        name: String,
        source: rusqlite::Error,
    },

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reader errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding errors for raw rows, metadata and queue bodies
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Generation provider could not produce an answer
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Source could not be parsed into rows
    #[error("Parse error: {0}")]
    Parse(String),

    /// Ingestion job not found
    #[error("Ingestion job not found: {0}")]
    JobNotFound(String),

    /// Legal document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Rejected job state machine transition
    #[error("Invalid job transition: {0}")]
    InvalidTransition(String),

    /// Work queue errors (receive, delete, stale receipt)
    #[error("Queue error: {0}")]
    Queue(String),

    /// Object store errors other than a failed download
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// Source object could not be downloaded
    #[error("Download failed for {0}")]
    Download(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Too many consecutive worker errors; operator intervention required
    #[error("Fatal worker error: {0}")]
    Fatal(String),
}

/// Convenient Result type using RowragError
pub type Result<T> = std::result::Result<T, RowragError>;
