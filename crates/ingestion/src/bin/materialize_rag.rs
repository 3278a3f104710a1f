//! Materialize the RAG tables from embedding shard artifacts.
//!
//! Loads shard JSONL into the embeddings table, reconstructs chunk text
//! deterministically from source documents, and rebuilds the doc-entity
//! table. `--resume` keeps an existing embeddings table and only backfills
//! missing chunk text.

use anyhow::Context;
use biograph_common::config::AppConfig;
use biograph_common::db::DbPool;
use biograph_ingestion::materialize::{MaterializeParams, RagMaterializer};
use biograph_ingestion::shard_source::LocalShardSource;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "materialize-rag", about = "Materialize RAG tables from embedding shards")]
struct Args {
    /// Directory holding the run's shard JSONL files
    #[arg(long)]
    shards_dir: PathBuf,

    /// Embeddings table to create or resume
    #[arg(long, default_value = "evidence_embeddings")]
    embed_table: String,

    /// Doc-entity table to create
    #[arg(long, default_value = "evidence_doc_entities")]
    entity_table: String,

    /// Keep an existing embeddings table; only backfill missing chunk text
    #[arg(long)]
    resume: bool,

    /// Skip rebuilding the entity table
    #[arg(long)]
    skip_entity_refresh: bool,

    /// Override the configured chunker maximum characters
    #[arg(long)]
    max_chunk_chars: Option<usize>,

    /// Override the configured chunker overlap characters
    #[arg(long)]
    chunk_overlap_chars: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::load().context("loading configuration")?;

    if !args.shards_dir.is_dir() {
        anyhow::bail!("shards dir not found: {}", args.shards_dir.display());
    }

    let db = DbPool::new(&config.database)
        .await
        .context("connecting to warehouse")?;

    let params = MaterializeParams {
        embed_table: args.embed_table,
        entity_table: args.entity_table,
        resume: args.resume,
        skip_entity_refresh: args.skip_entity_refresh,
        max_chunk_chars: args.max_chunk_chars.unwrap_or(config.ingest.max_chunk_chars),
        chunk_overlap_chars: args
            .chunk_overlap_chars
            .unwrap_or(config.ingest.chunk_overlap_chars),
        doc_batch_size: config.ingest.doc_batch_size,
        chunk_text_flush: config.ingest.chunk_text_flush,
    };

    let source = LocalShardSource::new(&args.shards_dir);
    let materializer = RagMaterializer::new(db, config.graph.clone());
    let summary = materializer
        .run(&source, &params)
        .await
        .context("materializing RAG tables")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
