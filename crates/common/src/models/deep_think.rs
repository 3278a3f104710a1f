//! Request models for the deep-think stream and chat endpoints.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepThinkPathNode {
    pub entity_id: String,
    pub entity_name: String,
    pub entity_type: String,
    #[serde(default)]
    pub edge_predicate: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepThinkEdgeEvidence {
    #[serde(default)]
    pub pmid: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepThinkEdge {
    pub source: String,
    pub target: String,
    pub predicate: String,
    #[serde(default)]
    pub evidence: Vec<DeepThinkEdgeEvidence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepThinkRequest {
    pub path: Vec<DeepThinkPathNode>,
    #[serde(default)]
    pub edges: Vec<DeepThinkEdge>,
    #[serde(default)]
    pub question: Option<String>,
}

/// One prior turn of a deep-think chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepThinkChatMessage {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepThinkChatRequest {
    pub path: Vec<DeepThinkPathNode>,
    #[serde(default)]
    pub edges: Vec<DeepThinkEdge>,
    pub question: String,
    #[serde(default)]
    pub messages: Vec<DeepThinkChatMessage>,
}
