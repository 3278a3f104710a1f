//! Graph snapshot payloads (shareable saved views).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshotPayload {
    pub query: String,
    #[serde(default)]
    pub entities: Vec<serde_json::Value>,
    #[serde(default)]
    pub edges: Vec<serde_json::Value>,
    #[serde(default)]
    pub expanded_nodes: Vec<String>,
    pub center_node_id: String,
    #[serde(default)]
    pub path_node_ids: Vec<String>,
    #[serde(default)]
    pub entity_filter: serde_json::Value,
    #[serde(default)]
    pub node_positions: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub selection_history: Vec<serde_json::Value>,
    #[serde(default)]
    pub selected_entity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub id: String,
}
