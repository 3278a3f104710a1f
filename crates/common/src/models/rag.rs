//! RAG corpus types shared between the online retriever and the offline
//! materializer.

use serde::{Deserialize, Serialize};

/// A bounded-length slice of a document, the unit of embedding and retrieval.
///
/// `chunk_id` is deterministic given `(doc_id, chunking parameters)`:
/// `"{doc_id}#{chunk_index}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub doc_type: String,
    pub chunk_index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// A doc↔entity link row from the materialized entity table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocEntity {
    pub doc_id: String,
    pub entity_id: String,
    pub entity_type: String,
    pub mention: String,
    pub source_table: String,
}

/// A retrieved chunk with its ANN distance, hydrated from the warehouse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub doc_type: String,
    pub chunk_text: String,
    pub source_id: String,
    pub distance: f64,
}
