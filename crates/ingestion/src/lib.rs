//! BioGraph offline ingest
//!
//! Two pipelines:
//! - `dump`: stream compressed MySQL dumps into typed columnar shards
//! - `materialize`: align embedding shards with deterministically
//!   reconstructed chunk text and materialize the RAG tables
//!
//! Plus the deterministic chunker both sides share, and the rate-limited
//! embedding pool used when building the vector corpus.

pub mod chunker;
pub mod dump;
pub mod embed_pool;
pub mod materialize;
pub mod shard_source;

pub use chunker::{chunk_document, chunking_signature, signature_matches, split_sentences};
