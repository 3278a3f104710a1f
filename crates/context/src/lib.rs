//! BioGraph context services
//!
//! The explanation side of the system: resolving query intent, retrieving
//! grounded RAG context, streaming citation-aware explanations over SSE,
//! and scoring generated answers.

pub mod deep_think;
pub mod intent;
pub mod overview;
pub mod retrieval;
pub mod reviewer;
pub mod scholar;
pub mod scholarly;
pub mod selection;
pub mod sse;

pub use intent::{IntentResolver, QueryIntent};
pub use overview::OverviewService;
pub use deep_think::DeepThinkService;
pub use retrieval::{RagRetriever, RagStore, SqlRagStore, VectorVerification};
pub use reviewer::{Review, Reviewer};
pub use sse::SseEvent;
