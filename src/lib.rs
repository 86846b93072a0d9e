pub mod answer;
pub mod cache;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod search;
pub mod service;
pub mod worker;

pub use answer::{Answer, AnswerAssembler, RecordAnswer};
pub use config::Config;
pub use error::{Result, RowragError};
pub use service::RowragService;
