//! Core graph types: entities, neighbor rows, path segments, and the JSON
//! payload contract consumed by the frontend.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical entity classes in the knowledge graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Gene,
    Disease,
    Drug,
    Pathway,
    Protein,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Gene => "gene",
            EntityType::Disease => "disease",
            EntityType::Drug => "drug",
            EntityType::Pathway => "pathway",
            EntityType::Protein => "protein",
            EntityType::Other => "other",
        }
    }
}

impl FromStr for EntityType {
    type Err = std::convert::Infallible;

    /// Unknown labels collapse to `Other` rather than failing; upstream
    /// tables carry free-form type strings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "gene" => EntityType::Gene,
            "disease" => EntityType::Disease,
            "drug" => EntityType::Drug,
            "pathway" => EntityType::Pathway,
            "protein" => EntityType::Protein,
            _ => EntityType::Other,
        })
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical bio-entity resolved from the warehouse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub mention: String,
}

/// One related entity returned by the neighborhood query, collapsed by
/// `(other, relation_type, direction)` with co-occurrence aggregates attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborEdge {
    pub other_entity_id: String,
    pub relation_type: String,
    /// `"->"` when the seed is entity_id1, `"<-"` otherwise
    pub direction: String,
    pub evidence_count: i64,
    /// Evidence PMIDs, capped at the configured per-edge maximum
    pub pmids: Vec<String>,
    pub other_type: Option<String>,
    pub other_mention: Option<String>,
    #[serde(default)]
    pub paper_count: i64,
    #[serde(default)]
    pub trial_count: i64,
    #[serde(default)]
    pub patent_count: i64,
    #[serde(default)]
    pub cooccurrence_score: i64,
}

/// One edge of a shortest path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub from: String,
    pub to: String,
    pub relation_type: String,
}

/// A document reference attached to an edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEvidence {
    pub pmid: String,
    pub snippet: String,
    pub pub_year: i32,
    pub source: String,
}

/// Node in the rendered graph payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub color: Option<String>,
    pub size: Option<f64>,
    pub is_expanded: Option<bool>,
    pub metadata: serde_json::Value,
}

/// Edge in the rendered graph payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub predicate: String,
    pub label: String,
    pub color: Option<String>,
    pub source_db: String,
    pub direction: String,
    pub confidence_score: Option<f64>,
    pub provenance: String,
    pub evidence: Vec<GraphEvidence>,
    #[serde(default)]
    pub paper_count: i64,
    #[serde(default)]
    pub trial_count: i64,
    #[serde(default)]
    pub patent_count: i64,
    #[serde(default)]
    pub cooccurrence_score: i64,
}

/// The JSON contract consumed by the frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPayload {
    pub center_node_id: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GraphPayload {
    /// Empty payload carrying only a user-facing message
    pub fn empty_with_message(center_node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            center_node_id: center_node_id.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_roundtrip() {
        assert_eq!("gene".parse::<EntityType>().unwrap(), EntityType::Gene);
        assert_eq!("DISEASE".parse::<EntityType>().unwrap(), EntityType::Disease);
        assert_eq!("chemical".parse::<EntityType>().unwrap(), EntityType::Other);
    }

    #[test]
    fn test_entity_type_serde_lowercase() {
        let json = serde_json::to_string(&EntityType::Pathway).unwrap();
        assert_eq!(json, "\"pathway\"");
    }

    #[test]
    fn test_empty_payload_message() {
        let p = GraphPayload::empty_with_message("", "No entity found matching 'xyz'");
        assert!(p.nodes.is_empty());
        assert!(p.edges.is_empty());
        assert_eq!(p.message.as_deref(), Some("No entity found matching 'xyz'"));
    }
}
