use super::db_writer::insert_records;
use super::fields::{build_record, FieldMap};
use super::record::IngestedRecord;
use super::source::ParsedRow;
use crate::db::Db;
use crate::embeddings::Embedder;
use crate::error::{Result, RowragError};
use std::sync::Arc;

/// Counts produced by one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub processed: i64,
    pub failed: i64,
}

/// Turns parsed rows into embedded, persisted records one batch at a time
pub struct RecordBatcher {
    db: Db,
    embedder: Arc<dyn Embedder>,
}

impl RecordBatcher {
    pub fn new(db: Db, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }

    /// Build, embed and persist one batch.
    ///
    /// Row extraction errors fail only their row. An embedding or persistence
    /// error fails every row that reached that stage; the error is logged and
    /// not returned so the caller moves on to the next batch.
    pub async fn process_batch(
        &self,
        headers: &[String],
        rows: &[(i64, ParsedRow)],
        field_map: &FieldMap,
        source_file: &str,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut records = Vec::with_capacity(rows.len());

        for (row_number, row) in rows {
            match row {
                ParsedRow::Values(values) => {
                    match build_record(headers, values, field_map, source_file, *row_number) {
                        Ok(record) => records.push(record),
                        Err(e) => {
                            log::warn!("{}: skipping row {}: {}", source_file, row_number, e);
                            outcome.failed += 1;
                        }
                    }
                }
                ParsedRow::Malformed(reason) => {
                    log::warn!("{}: malformed row {}: {}", source_file, row_number, reason);
                    outcome.failed += 1;
                }
            }
        }

        if records.is_empty() {
            return outcome;
        }

        let attempted = records.len() as i64;
        match self.embed_and_store(records).await {
            Ok(inserted) => outcome.processed += inserted as i64,
            Err(e) => {
                let first = rows.first().map(|(n, _)| *n).unwrap_or(0);
                let last = rows.last().map(|(n, _)| *n).unwrap_or(0);
                log::error!("{}: batch rows {}-{} failed: {}", source_file, first, last, e);
                outcome.failed += attempted;
            }
        }
        outcome
    }

    async fn embed_and_store(&self, mut records: Vec<IngestedRecord>) -> Result<usize> {
        let contents: Vec<String> = records.iter().map(|r| r.searchable_content.clone()).collect();
        let titles: Vec<String> = records
            .iter()
            .map(|r| r.title.clone().unwrap_or_default())
            .collect();

        let content_vectors = self.embedder.embed(&contents).await?;
        let title_vectors = self.embedder.embed(&titles).await?;

        if content_vectors.len() != records.len() || title_vectors.len() != records.len() {
            return Err(RowragError::Embedding(format!(
                "expected {} vectors, got {} content and {} title",
                records.len(),
                content_vectors.len(),
                title_vectors.len()
            )));
        }

        for ((record, content), title) in records.iter_mut().zip(content_vectors).zip(title_vectors) {
            record.content_embedding = content;
            record.title_embedding = title;
        }

        insert_records(&self.db, records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;
    use crate::embeddings::HashingEmbedder;
    use crate::ingest::db_writer::active_record_count;
    use crate::ingest::fields::{detect_fields, FieldAliases};
    use async_trait::async_trait;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
            Err(RowragError::Embedding("model offline".to_string()))
        }
        fn dimensions(&self) -> usize {
            8
        }
        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn headers() -> Vec<String> {
        vec!["title".to_string(), "description".to_string()]
    }

    fn row(n: i64, title: Option<&str>, desc: Option<&str>) -> (i64, ParsedRow) {
        (
            n,
            ParsedRow::Values(vec![title.map(str::to_string), desc.map(str::to_string)]),
        )
    }

    #[tokio::test]
    async fn test_row_errors_fail_only_their_row() {
        let (db, _temp) = setup_test_db().await;
        let batcher = RecordBatcher::new(db.clone(), Arc::new(HashingEmbedder::new(16)));
        let h = headers();
        let map = detect_fields(&h, &FieldAliases::default());

        let rows = vec![
            row(1, Some("Widget"), Some("Steel widget")),
            row(2, None, None),
            (3, ParsedRow::Malformed("too many fields".to_string())),
            row(4, None, Some("Untitled gadget")),
        ];
        let outcome = batcher.process_batch(&h, &rows, &map, "a.csv").await;

        assert_eq!(outcome, BatchOutcome { processed: 2, failed: 2 });
        assert_eq!(active_record_count(&db).await.unwrap(), 2);

        // Blank title yields no title vector, content vector still present
        let (content, title): (Option<Vec<u8>>, Option<Vec<u8>>) = db
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT content_embedding, title_embedding FROM ingested_records WHERE row_number = 4",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(content.map(|b| b.len()), Some(16 * 4));
        assert!(title.is_none());
    }

    #[tokio::test]
    async fn test_embedding_failure_fails_whole_batch() {
        let (db, _temp) = setup_test_db().await;
        let batcher = RecordBatcher::new(db.clone(), Arc::new(FailingEmbedder));
        let h = headers();
        let map = detect_fields(&h, &FieldAliases::default());

        let rows = vec![
            row(1, Some("A"), Some("first")),
            row(2, Some("B"), Some("second")),
            row(3, None, None),
        ];
        let outcome = batcher.process_batch(&h, &rows, &map, "a.csv").await;

        assert_eq!(outcome, BatchOutcome { processed: 0, failed: 3 });
        assert_eq!(active_record_count(&db).await.unwrap(), 0);
    }
}
