use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rowrag::db::Db;
use rowrag::embeddings::build_embedder;
use rowrag::ingest::{
    self, ingest_legal_csv, legal_document_counts, record_stats, update_legal_status, LegalStatus,
};
use rowrag::search::{RecordField, SearchField, SearchFilters, SearchResult};
use rowrag::worker::{scan_incoming, LocalObjectStore, SqliteQueue, Worker, WorkerSettings};
use rowrag::{Config, RowragService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "rowrag")]
#[command(version, about = "Queue-driven CSV ingestion and hybrid retrieval")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the database schema (default)
    Verify,
    /// Run the queue-driven ingestion worker until Ctrl-C
    Worker,
    /// Queue every eligible upload under incoming/ in the configured bucket
    Scan,
    /// Ingest a local CSV file under a new job
    Ingest {
        path: PathBuf,
        /// Name recorded as the job's source file (defaults to the path)
        #[arg(long)]
        source_name: Option<String>,
    },
    /// Upsert legal documents from a CSV file
    IngestLegal { path: PathBuf },
    /// Change the status of a legal document
    SetStatus { doc_id: String, status: String },
    /// Search the legal corpus
    Search {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// content, title, headnotes or hybrid
        #[arg(long, default_value = "hybrid")]
        field: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Answer a question with citations to retrieved documents
    Answer {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Semantic search over ingested CSV records
    Records {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// content or title
        #[arg(long, default_value = "content")]
        field: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// Answer a question from the ingested records
    Ask {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Show one ingestion job, or the most recent ones
    Jobs {
        job_id: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Record and corpus statistics
    Stats,
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    #[arg(long)]
    jurisdiction: Option<String>,
    #[arg(long)]
    doc_type: Option<String>,
    #[arg(long)]
    practice_area: Option<String>,
    #[arg(long)]
    exclude_overruled: bool,
    /// YYYY-MM-DD, inclusive
    #[arg(long)]
    date_from: Option<String>,
    /// YYYY-MM-DD, inclusive
    #[arg(long)]
    date_to: Option<String>,
}

impl From<FilterArgs> for SearchFilters {
    fn from(args: FilterArgs) -> Self {
        SearchFilters {
            jurisdiction: args.jurisdiction,
            doc_type: args.doc_type,
            practice_area: args.practice_area,
            exclude_overruled: args.exclude_overruled,
            date_from: args.date_from,
            date_to: args.date_to,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.rowrag.log_level.as_str()),
    )
    .init();

    log::info!("Starting rowrag v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Database path: {}", config.db_path().display());

    let db = Db::new(config.db_path());
    db.migrate(Path::new("migrations"))
        .await
        .context("Failed to apply migrations")?;

    match cli.command.unwrap_or(Command::Verify) {
        Command::Verify => {
            db.verify().await?;
            log::info!("✓ Database schema verification complete");
        }
        Command::Worker => run_worker(&config, db).await?,
        Command::Scan => {
            let store = LocalObjectStore::new(&config.worker.object_store_root);
            let queue = SqliteQueue::new(db);
            let summary = scan_incoming(&store, &queue, &config.worker.bucket).await?;
            println!(
                "Queued {}, skipped {}, already queued {}",
                summary.queued, summary.skipped, summary.already_queued
            );
        }
        Command::Ingest { path, source_name } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let source = source_name.unwrap_or_else(|| path.display().to_string());
            let embedder = build_embedder(&config.embeddings)?;
            embedder.open().await?;
            let job = ingest::ingest_csv(&db, embedder.clone(), &bytes, &source, &config.ingestion)
                .await?;
            embedder.close().await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Command::IngestLegal { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let legal_cfg = config.legal_embeddings();
            let embedder = build_embedder(legal_cfg)?;
            embedder.open().await?;
            let start = Instant::now();
            let summary =
                ingest_legal_csv(&db, embedder.as_ref(), &bytes, legal_cfg.batch_size).await?;
            embedder.close().await?;
            println!(
                "Ingested {} of {} documents ({} failed) in {:?}",
                summary.ingested,
                summary.total_in_csv,
                summary.failed,
                start.elapsed()
            );
        }
        Command::SetStatus { doc_id, status } => {
            let status: LegalStatus = status.parse()?;
            update_legal_status(&db, &doc_id, status).await?;
            println!("{} -> {}", doc_id, status);
        }
        Command::Search {
            query,
            top_k,
            field,
            filters,
        } => {
            let field: SearchField = field.parse()?;
            let service = RowragService::from_config(&config).await?;
            let start = Instant::now();
            let results = service
                .search(
                    &query,
                    top_k.unwrap_or(service.default_k()),
                    &filters.into(),
                    field,
                )
                .await?;
            print_results(&query, &results);
            println!("Results: {} in {:?}", results.len(), start.elapsed());
            service.close().await?;
        }
        Command::Answer {
            query,
            top_k,
            filters,
        } => {
            let service = RowragService::from_config(&config).await?;
            let answer = service
                .answer(&query, top_k.unwrap_or(service.default_k()), &filters.into())
                .await?;
            println!("\n{}\n", answer.text);
            print_results(&query, &answer.sources);
            println!("Citations used: {}", answer.citations_used.join("; "));
            println!("{}", answer.faithfulness_note);
            service.close().await?;
        }
        Command::Records {
            query,
            top_k,
            field,
            category,
        } => {
            let field: RecordField = field.parse()?;
            let service = RowragService::from_config(&config).await?;
            let results = service
                .search_records(
                    &query,
                    field,
                    category.as_deref(),
                    top_k.unwrap_or(service.default_k()),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            service.close().await?;
        }
        Command::Ask { query, top_k } => {
            let service = RowragService::from_config(&config).await?;
            let answer = service
                .answer_records(&query, top_k.unwrap_or(service.default_k()))
                .await?;
            println!("\n{}\n", answer.text);
            for (i, r) in answer.sources.iter().enumerate() {
                println!(
                    "[{}] {} (similarity {:.3})",
                    i + 1,
                    r.title.as_deref().unwrap_or("Untitled"),
                    r.similarity
                );
            }
            service.close().await?;
        }
        Command::Jobs { job_id, limit } => {
            let service = RowragService::from_config(&config).await?;
            match job_id {
                Some(id) => println!("{}", serde_json::to_string_pretty(&service.get_job(&id).await?)?),
                None => println!("{}", serde_json::to_string_pretty(&service.list_jobs(limit).await?)?),
            }
        }
        Command::Stats => {
            let records = record_stats(&db).await?;
            let legal = legal_document_counts(&db).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "records": records,
                    "legal_documents": legal,
                }))?
            );
        }
    }

    Ok(())
}

async fn run_worker(config: &Config, db: Db) -> Result<()> {
    let embedder = build_embedder(&config.embeddings)?;
    embedder.open().await?;

    let queue = Arc::new(
        SqliteQueue::new(db.clone()).with_max_receive_count(config.worker.max_receive_count),
    );
    let store = Arc::new(LocalObjectStore::new(&config.worker.object_store_root));
    let worker = Worker::new(
        db,
        embedder.clone(),
        queue,
        store,
        config.ingestion.clone(),
        WorkerSettings::from(&config.worker),
    );

    let result = worker.run().await;
    embedder.close().await?;
    result?;
    log::info!("Worker stopped");
    Ok(())
}

fn print_results(query: &str, results: &[SearchResult]) {
    println!("Query: \"{}\"\n", query);
    if results.is_empty() {
        println!("No results found.");
        return;
    }
    for r in results {
        println!("─────────────────────────────────────────────────────────────────────────────");
        println!(
            "[{}] {} ({}, score {:.4}, similarity {:.3})",
            r.rank,
            r.title,
            r.search_method.as_str(),
            r.score,
            r.similarity
        );
        if let Some(citation) = &r.citation {
            println!("Citation: {}", citation);
        }
        println!(
            "Type: {} | Jurisdiction: {}",
            r.doc_type,
            r.jurisdiction.as_deref().unwrap_or("unknown")
        );
        println!("{}\n", r.snippet);
    }
    println!("─────────────────────────────────────────────────────────────────────────────");
}
