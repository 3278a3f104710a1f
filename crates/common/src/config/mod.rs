//! Configuration management for BioGraph services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Warehouse database configuration
    pub database: DatabaseConfig,

    /// Graph query limits and table names
    pub graph: GraphConfig,

    /// Generative model configuration
    pub llm: LlmConfig,

    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// RAG retrieval configuration
    pub rag: RagConfig,

    /// Semantic Scholar configuration
    pub scholar: ScholarConfig,

    /// Offline ingest configuration
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Allowed CORS origins (empty = allow any)
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Prometheus scrape port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphConfig {
    /// Maximum related entities returned per neighborhood query
    #[serde(default = "default_max_related_entities")]
    pub max_related_entities: usize,

    /// Maximum evidence PMIDs attached to one edge
    #[serde(default = "default_max_evidence_per_edge")]
    pub max_evidence_per_edge: usize,

    /// Maximum BFS hops per direction (total path length up to 2x)
    #[serde(default = "default_max_bfs_depth")]
    pub max_bfs_depth: usize,

    /// Frontier cap to contain hub-node explosion
    #[serde(default = "default_max_frontier_size")]
    pub max_frontier_size: usize,

    /// Entity table name in the warehouse
    #[serde(default = "default_entity_table")]
    pub entity_table: String,

    /// Relationship table name in the warehouse
    #[serde(default = "default_relationship_table")]
    pub relationship_table: String,

    /// Paper table name in the warehouse
    #[serde(default = "default_paper_table")]
    pub paper_table: String,

    /// Clinical-trial table name in the warehouse
    #[serde(default = "default_trial_table")]
    pub trial_table: String,

    /// Patent table name in the warehouse
    #[serde(default = "default_patent_table")]
    pub patent_table: String,

    /// Paper-entity link table
    #[serde(default = "default_paper_link_table")]
    pub paper_link_table: String,

    /// Trial-entity link table
    #[serde(default = "default_trial_link_table")]
    pub trial_link_table: String,

    /// Patent-entity link table
    #[serde(default = "default_patent_link_table")]
    pub patent_link_table: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// API base URL for the generative-model service
    pub api_base: Option<String>,

    /// API key for the generative-model service
    pub api_key: Option<String>,

    /// Primary model for overview generation and intent detection
    #[serde(default = "default_overview_model")]
    pub overview_model: String,

    /// Fallback model for overview generation
    #[serde(default = "default_overview_fallback_model")]
    pub overview_fallback_model: String,

    /// Low-latency model used late in the fallback chain
    #[serde(default = "default_flash_model")]
    pub flash_model: String,

    /// Pinned stable variant of the low-latency model
    #[serde(default = "default_flash_stable_model")]
    pub flash_stable_model: String,

    /// Model used for deep-think analysis
    #[serde(default = "default_deep_think_model")]
    pub deep_think_model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Ordered, deduplicated model candidates for the streaming fallback chain.
    pub fn fallback_chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        for name in [
            &self.overview_model,
            &self.overview_fallback_model,
            &self.flash_model,
            &self.flash_stable_model,
        ] {
            let name = name.trim();
            if !name.is_empty() && !chain.iter().any(|c| c == name) {
                chain.push(name.to_string());
            }
        }
        chain
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// API base URL for the embedding service
    pub api_base: Option<String>,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Fallback model when the primary cannot be used
    #[serde(default = "default_embedding_fallback_model")]
    pub fallback_model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RagConfig {
    /// Embeddings table (chunk_id, metadata, embedding vector, chunk_text).
    /// Leaving this unset disables RAG retrieval.
    pub embed_table: Option<String>,

    /// Doc-entity table used by the co-mention filter
    pub entity_table: Option<String>,

    /// Scholarly contributions table (optional enrichment)
    pub contributions_table: Option<String>,

    /// ANN candidates fetched before filtering
    #[serde(default = "default_rag_fetch_k")]
    pub fetch_k: usize,

    /// Chunks kept after reranking
    #[serde(default = "default_rag_top_k")]
    pub top_k: usize,

    /// Prior session summaries included in the prompt
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Chat paper-context size that triggers compression
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_chars: usize,

    /// Upper bound on text handed to the compression call
    #[serde(default = "default_compression_input_cap")]
    pub compression_input_cap_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScholarConfig {
    /// Semantic Scholar API base
    #[serde(default = "default_scholar_base")]
    pub api_base: String,

    /// Optional API key
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_scholar_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Rows per columnar shard
    #[serde(default = "default_shard_batch_size")]
    pub batch_size: usize,

    /// Parallel workers for small/medium tables
    #[serde(default = "default_ingest_workers")]
    pub workers: usize,

    /// Tables processed sequentially after the pool drains
    #[serde(default)]
    pub large_tables: Vec<String>,

    /// Chunker maximum characters
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    /// Chunker overlap characters
    #[serde(default = "default_chunk_overlap_chars")]
    pub chunk_overlap_chars: usize,

    /// Documents fetched per reconstruction batch
    #[serde(default = "default_doc_batch_size")]
    pub doc_batch_size: usize,

    /// Reconstructed chunk rows buffered before a merge
    #[serde(default = "default_chunk_text_flush")]
    pub chunk_text_flush: usize,

    /// Embedding pool workers
    #[serde(default = "default_embed_workers")]
    pub embed_workers: usize,

    /// Embedding pool retries
    #[serde(default = "default_embed_max_retries")]
    pub embed_max_retries: u32,

    /// Base backoff between embedding retries (milliseconds)
    #[serde(default = "default_embed_base_backoff_ms")]
    pub embed_base_backoff_ms: u64,

    /// Minimum interval between embedding requests (milliseconds)
    #[serde(default = "default_embed_request_interval_ms")]
    pub embed_request_interval_ms: u64,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_metrics_port() -> u16 { 9090 }
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_max_related_entities() -> usize { 50 }
fn default_max_evidence_per_edge() -> usize { 5 }
fn default_max_bfs_depth() -> usize { 4 }
fn default_max_frontier_size() -> usize { 500 }
fn default_entity_table() -> String { "bio_entities".to_string() }
fn default_relationship_table() -> String { "bioentity_relationships".to_string() }
fn default_paper_table() -> String { "papers".to_string() }
fn default_trial_table() -> String { "clinical_trials".to_string() }
fn default_patent_table() -> String { "patents".to_string() }
fn default_paper_link_table() -> String { "link_papers_bioentities".to_string() }
fn default_trial_link_table() -> String { "link_trials_bioentities".to_string() }
fn default_patent_link_table() -> String { "link_patents_bioentities".to_string() }
fn default_overview_model() -> String { "gemini-2.5-pro".to_string() }
fn default_overview_fallback_model() -> String { "gemini-2.0-pro".to_string() }
fn default_flash_model() -> String { "gemini-2.5-flash".to_string() }
fn default_flash_stable_model() -> String { "gemini-2.0-flash-001".to_string() }
fn default_deep_think_model() -> String { "gemini-2.5-pro".to_string() }
fn default_llm_timeout() -> u64 { 60 }
fn default_embedding_model() -> String { "gemini-embedding-001".to_string() }
fn default_embedding_fallback_model() -> String { "text-embedding-005".to_string() }
fn default_embedding_dimension() -> usize { 3072 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_embed_batch_size() -> usize { 250 }
fn default_rag_fetch_k() -> usize { 150 }
fn default_rag_top_k() -> usize { 20 }
fn default_history_limit() -> usize { 6 }
fn default_compression_threshold() -> usize { 100_000 }
fn default_compression_input_cap() -> usize { 80_000 }
fn default_scholar_base() -> String { "https://api.semanticscholar.org".to_string() }
fn default_scholar_timeout() -> u64 { 15 }
fn default_shard_batch_size() -> usize { 500_000 }
fn default_ingest_workers() -> usize { 4 }
fn default_max_chunk_chars() -> usize { 3500 }
fn default_chunk_overlap_chars() -> usize { 300 }
fn default_doc_batch_size() -> usize { 2000 }
fn default_chunk_text_flush() -> usize { 25_000 }
fn default_embed_workers() -> usize { 2 }
fn default_embed_max_retries() -> u32 { 6 }
fn default_embed_base_backoff_ms() -> u64 { 500 }
fn default_embed_request_interval_ms() -> u64 { 100 }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    /// Whether the vector index is configured for RAG retrieval
    pub fn vector_configured(&self) -> bool {
        self.rag.embed_table.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
                cors_origins: Vec::new(),
                metrics_port: default_metrics_port(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/biograph".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            graph: GraphConfig {
                max_related_entities: default_max_related_entities(),
                max_evidence_per_edge: default_max_evidence_per_edge(),
                max_bfs_depth: default_max_bfs_depth(),
                max_frontier_size: default_max_frontier_size(),
                entity_table: default_entity_table(),
                relationship_table: default_relationship_table(),
                paper_table: default_paper_table(),
                trial_table: default_trial_table(),
                patent_table: default_patent_table(),
                paper_link_table: default_paper_link_table(),
                trial_link_table: default_trial_link_table(),
                patent_link_table: default_patent_link_table(),
            },
            llm: LlmConfig {
                api_base: None,
                api_key: None,
                overview_model: default_overview_model(),
                overview_fallback_model: default_overview_fallback_model(),
                flash_model: default_flash_model(),
                flash_stable_model: default_flash_stable_model(),
                deep_think_model: default_deep_think_model(),
                timeout_secs: default_llm_timeout(),
            },
            embedding: EmbeddingConfig {
                api_base: None,
                api_key: None,
                model: default_embedding_model(),
                fallback_model: default_embedding_fallback_model(),
                dimension: default_embedding_dimension(),
                timeout_secs: default_embedding_timeout(),
                max_retries: default_embedding_retries(),
                batch_size: default_embed_batch_size(),
            },
            rag: RagConfig {
                embed_table: None,
                entity_table: None,
                contributions_table: None,
                fetch_k: default_rag_fetch_k(),
                top_k: default_rag_top_k(),
                history_limit: default_history_limit(),
                compression_threshold_chars: default_compression_threshold(),
                compression_input_cap_chars: default_compression_input_cap(),
            },
            scholar: ScholarConfig {
                api_base: default_scholar_base(),
                api_key: None,
                timeout_secs: default_scholar_timeout(),
            },
            ingest: IngestConfig {
                batch_size: default_shard_batch_size(),
                workers: default_ingest_workers(),
                large_tables: Vec::new(),
                max_chunk_chars: default_max_chunk_chars(),
                chunk_overlap_chars: default_chunk_overlap_chars(),
                doc_batch_size: default_doc_batch_size(),
                chunk_text_flush: default_chunk_text_flush(),
                embed_workers: default_embed_workers(),
                embed_max_retries: default_embed_max_retries(),
                embed_base_backoff_ms: default_embed_base_backoff_ms(),
                embed_request_interval_ms: default_embed_request_interval_ms(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.graph.max_related_entities, 50);
        assert_eq!(config.rag.fetch_k, 150);
        assert_eq!(config.ingest.batch_size, 500_000);
        assert!(!config.vector_configured());
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/biograph");
    }

    #[test]
    fn test_fallback_chain_dedup() {
        let mut config = AppConfig::default();
        config.llm.overview_fallback_model = config.llm.overview_model.clone();
        let chain = config.llm.fallback_chain();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0], config.llm.overview_model);
    }
}
