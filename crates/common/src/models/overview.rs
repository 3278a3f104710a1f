//! Request models for the AI overview stream endpoint.
//!
//! The client sends back the visible graph (entities + edges) along with the
//! selection it wants explained, so the streamer never re-queries the graph.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewEntity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverviewEvidence {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub pmid: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, rename = "sourceDb")]
    pub source_db: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub predicate: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub provenance: String,
    #[serde(default, rename = "sourceDb")]
    pub source_db: String,
    #[serde(default)]
    pub evidence: Vec<OverviewEvidence>,
    #[serde(default)]
    pub paper_count: Option<i64>,
    #[serde(default)]
    pub trial_count: Option<i64>,
    #[serde(default)]
    pub patent_count: Option<i64>,
    #[serde(default)]
    pub cooccurrence_score: Option<i64>,
}

/// Summary of a previous overview in this session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewHistoryItem {
    pub selection_key: String,
    pub selection_type: String,
    pub summary: String,
}

/// One hop of the user's exploration path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewPathEntity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewStreamRequest {
    /// `"edge"` or `"node"`
    pub selection_type: String,
    #[serde(default)]
    pub edge_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    pub center_node_id: String,
    #[serde(default)]
    pub entities: Vec<OverviewEntity>,
    #[serde(default)]
    pub edges: Vec<OverviewEdge>,
    #[serde(default)]
    pub history: Vec<OverviewHistoryItem>,
    #[serde(default)]
    pub path: Vec<OverviewPathEntity>,
}
