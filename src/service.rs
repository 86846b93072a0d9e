//! Entry points for an outer (HTTP or CLI) layer: legal search and answers,
//! record search and answers, and ingestion status.

use crate::answer::{Answer, AnswerAssembler, RecordAnswer};
use crate::config::{Config, SearchConfig};
use crate::db::Db;
use crate::embeddings::{build_embedder, embed_one, Embedder};
use crate::error::Result;
use crate::generation::{build_generator, Generator};
use crate::ingest::{IngestionJob, JobTracker};
use crate::search::{
    search_legal, search_records, RecordField, RecordSearchResult, SearchField, SearchFilters,
    SearchResult,
};
use std::sync::Arc;

pub struct RowragService {
    db: Db,
    legal_embedder: Arc<dyn Embedder>,
    record_embedder: Arc<dyn Embedder>,
    assembler: AnswerAssembler,
    jobs: JobTracker,
    search_cfg: SearchConfig,
}

impl RowragService {
    pub fn new(
        db: Db,
        legal_embedder: Arc<dyn Embedder>,
        record_embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> Self {
        Self {
            jobs: JobTracker::new(db.clone()),
            db,
            legal_embedder,
            record_embedder,
            assembler: AnswerAssembler::new(generator, &config.generation),
            search_cfg: config.search.clone(),
        }
    }

    /// Build providers from configuration and open both embedders
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = Db::new(config.db_path());
        let record_embedder = build_embedder(&config.embeddings)?;
        let legal_embedder = match &config.legal_embeddings {
            Some(cfg) => build_embedder(cfg)?,
            None => record_embedder.clone(),
        };
        record_embedder.open().await?;
        if !Arc::ptr_eq(&record_embedder, &legal_embedder) {
            legal_embedder.open().await?;
        }
        let generator = build_generator(&config.generation)?;
        Ok(Self::new(db, legal_embedder, record_embedder, generator, config))
    }

    pub fn default_k(&self) -> usize {
        self.search_cfg.default_k
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
        field: SearchField,
    ) -> Result<Vec<SearchResult>> {
        search_legal(
            &self.db,
            self.legal_embedder.as_ref(),
            query,
            top_k,
            filters,
            field,
            &self.search_cfg,
        )
        .await
    }

    /// Hybrid search followed by a cited answer over the results
    pub async fn answer(&self, query: &str, top_k: usize, filters: &SearchFilters) -> Result<Answer> {
        let results = self.search(query, top_k, filters, SearchField::Hybrid).await?;
        self.assembler.assemble(query, results).await
    }

    pub async fn search_records(
        &self,
        query: &str,
        field: RecordField,
        category: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<RecordSearchResult>> {
        let query_vec = embed_one(self.record_embedder.as_ref(), query).await?;
        search_records(&self.db, &query_vec, field, category, top_k).await
    }

    /// Content-vector search over active records followed by a generated answer
    pub async fn answer_records(&self, query: &str, top_k: usize) -> Result<RecordAnswer> {
        let results = self
            .search_records(query, RecordField::Content, None, top_k)
            .await?;
        self.assembler.assemble_records(query, results).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<IngestionJob> {
        self.jobs.get_job(job_id).await
    }

    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<IngestionJob>> {
        self.jobs.list_jobs(limit).await
    }

    pub async fn close(&self) -> Result<()> {
        self.record_embedder.close().await?;
        if !Arc::ptr_eq(&self.record_embedder, &self.legal_embedder) {
            self.legal_embedder.close().await?;
        }
        Ok(())
    }
}
