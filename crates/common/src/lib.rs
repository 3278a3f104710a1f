//! BioGraph Common Library
//!
//! Shared code for the BioGraph services including:
//! - Graph payload and request models
//! - Ontology mappings (biolink classes, predicates, colors)
//! - Database connection pool
//! - Embedding and generative-model client abstractions
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod mappings;
pub mod metrics;
pub mod models;
pub mod snapshot;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::DbPool;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::GenerativeModel;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
