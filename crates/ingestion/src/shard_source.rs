//! Embedding shard input
//!
//! Shards are newline-delimited JSON with `id`, `embedding`, and an
//! `embedding_metadata` record. Unknown fields are tolerated; rows missing
//! an id or doc id are dropped by the materializer. The source is a trait
//! so a bucket-backed reader can replace the local directory without
//! touching the materializer.

use biograph_common::errors::{AppError, Result};
use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbeddingMetadata {
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub chunk_index: Option<i64>,
    #[serde(default)]
    pub entity_count: Option<i64>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub embedding_metadata: EmbeddingMetadata,
}

/// Source of embedding shards under one run prefix
pub trait ShardSource: Send + Sync {
    /// Shard names, lexicographically sorted
    fn list_shards(&self) -> Result<Vec<String>>;

    /// Parse one shard's records
    fn read_shard(&self, name: &str) -> Result<Vec<EmbeddingRecord>>;
}

/// Shards in a local directory (`*.jsonl`, optionally gzipped)
pub struct LocalShardSource {
    dir: PathBuf,
}

impl LocalShardSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ShardSource for LocalShardSource {
    fn list_shards(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| {
                name.ends_with(".jsonl") || name.ends_with(".json") || name.ends_with(".jsonl.gz")
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn read_shard(&self, name: &str) -> Result<Vec<EmbeddingRecord>> {
        let path = self.dir.join(name);
        let file = File::open(&path)?;
        let reader: Box<dyn Read> = if name.ends_with(".gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: EmbeddingRecord =
                serde_json::from_str(&line).map_err(|e| AppError::Internal {
                    message: format!("{}:{}: malformed shard record: {}", name, line_no + 1, e),
                })?;
            records.push(record);
        }
        Ok(records)
    }
}
