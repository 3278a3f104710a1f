//! Graph payload assembly
//!
//! Deterministic construction of the JSON payload from neighborhood or path
//! query results. Node sizes scale with co-occurrence relative to the
//! strongest neighbor in the payload; edge confidence follows a log1p curve
//! over the same signal.

use biograph_common::mappings::{biolink_class, color_for, label_from_predicate, predicate_for};
use biograph_common::models::{
    Entity, GraphEdge, GraphEvidence, GraphNode, GraphPayload, NeighborEdge, PathSegment,
};
use crate::warehouse::PaperDetails;
use serde_json::json;
use std::collections::{HashMap, HashSet};

const CENTER_NODE_SIZE: f64 = 1.5;
const MIN_NODE_SIZE: f64 = 0.6;
const NODE_SIZE_SPAN: f64 = 0.8;
/// Path-edge confidence saturates at this many PMIDs
const PATH_CONFIDENCE_SATURATION: f64 = 10.0;

const SOURCE_DB: &str = "literature_kg";
const PROVENANCE: &str = "literature";

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Neighbor node size relative to the payload's max co-occurrence score
fn scaled_size(score: i64, max_score: i64) -> f64 {
    if max_score <= 0 {
        return MIN_NODE_SIZE;
    }
    let ratio = score as f64 / max_score as f64;
    round3(MIN_NODE_SIZE + NODE_SIZE_SPAN * ratio)
}

/// `min(log1p(score)/log1p(max), 1.0)`, `0.0` when the payload has no signal
fn cooccurrence_confidence(score: i64, max_score: i64) -> f64 {
    if max_score <= 0 {
        return 0.0;
    }
    let confidence = (score.max(0) as f64).ln_1p() / (max_score as f64).ln_1p();
    confidence.min(1.0)
}

fn evidence_for_pmids(
    pmids: &[String],
    paper_details: &HashMap<String, PaperDetails>,
) -> Vec<GraphEvidence> {
    pmids
        .iter()
        .map(|pmid| {
            let paper = paper_details.get(pmid);
            GraphEvidence {
                pmid: pmid.clone(),
                snippet: paper.map(|p| p.title.clone()).unwrap_or_default(),
                pub_year: paper.map(|p| p.year).unwrap_or(0),
                source: "PubMed".to_string(),
            }
        })
        .collect()
}

/// Assemble the neighborhood payload around a center entity.
pub fn build_graph_payload(
    center: &Entity,
    related: &[NeighborEdge],
    paper_details: &HashMap<String, PaperDetails>,
) -> GraphPayload {
    let center_type = center.entity_type.as_str();

    let mut nodes = vec![GraphNode {
        id: center.entity_id.clone(),
        name: center.mention.clone(),
        node_type: biolink_class(Some(center_type)).to_string(),
        color: Some(color_for(Some(center_type)).to_string()),
        size: Some(CENTER_NODE_SIZE),
        is_expanded: Some(true),
        metadata: json!({ "entity_id": center.entity_id }),
    }];
    let mut node_index: HashMap<String, usize> = HashMap::new();
    node_index.insert(center.entity_id.clone(), 0);

    let max_score = related.iter().map(|r| r.cooccurrence_score).max().unwrap_or(0);

    let mut edges: Vec<GraphEdge> = Vec::with_capacity(related.len());
    let mut seen_edge_ids: HashSet<String> = HashSet::new();

    for rel in related {
        let other_type = rel.other_type.as_deref();
        let other_mention = rel
            .other_mention
            .clone()
            .unwrap_or_else(|| rel.other_entity_id.clone());
        let size = scaled_size(rel.cooccurrence_score, max_score);

        // Deduplicate nodes across relation types, keeping the larger size
        match node_index.get(&rel.other_entity_id) {
            Some(&idx) => {
                let node = &mut nodes[idx];
                if node.size.unwrap_or(0.0) < size {
                    node.size = Some(size);
                }
            }
            None => {
                node_index.insert(rel.other_entity_id.clone(), nodes.len());
                nodes.push(GraphNode {
                    id: rel.other_entity_id.clone(),
                    name: other_mention,
                    node_type: biolink_class(other_type).to_string(),
                    color: Some(color_for(other_type).to_string()),
                    size: Some(size),
                    is_expanded: Some(false),
                    metadata: json!({ "entity_id": rel.other_entity_id }),
                });
            }
        }

        // Edge source/target based on recorded direction
        let (source, target) = if rel.direction == "->" {
            (center.entity_id.clone(), rel.other_entity_id.clone())
        } else {
            (rel.other_entity_id.clone(), center.entity_id.clone())
        };

        let edge_id = format!("{}--{}--{}", source, target, rel.relation_type);
        if !seen_edge_ids.insert(edge_id.clone()) {
            continue;
        }

        let predicate = predicate_for(Some(&rel.relation_type));
        edges.push(GraphEdge {
            id: edge_id,
            source,
            target,
            predicate: predicate.to_string(),
            label: label_from_predicate(predicate),
            color: Some(color_for(other_type).to_string()),
            source_db: SOURCE_DB.to_string(),
            direction: rel.direction.clone(),
            confidence_score: Some(cooccurrence_confidence(rel.cooccurrence_score, max_score)),
            provenance: PROVENANCE.to_string(),
            evidence: evidence_for_pmids(&rel.pmids, paper_details),
            paper_count: rel.paper_count,
            trial_count: rel.trial_count,
            patent_count: rel.patent_count,
            cooccurrence_score: rel.cooccurrence_score,
        });
    }

    GraphPayload {
        center_node_id: center.entity_id.clone(),
        nodes,
        edges,
        message: None,
    }
}

/// Assemble the path payload: nodes in path order, one edge per segment.
pub fn build_path_graph_payload(
    path_ids: &[String],
    segments: &[PathSegment],
    segment_pmids: &HashMap<String, Vec<String>>,
    entity_details: &HashMap<String, Entity>,
    paper_details: &HashMap<String, PaperDetails>,
) -> GraphPayload {
    let nodes: Vec<GraphNode> = path_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let entity = entity_details.get(id);
            let type_str = entity.map(|e| e.entity_type.as_str());
            GraphNode {
                id: id.clone(),
                name: entity.map(|e| e.mention.clone()).unwrap_or_else(|| id.clone()),
                node_type: biolink_class(type_str).to_string(),
                color: Some(color_for(type_str).to_string()),
                size: Some(if i == 0 { CENTER_NODE_SIZE } else { 1.0 }),
                is_expanded: Some(i == 0),
                metadata: json!({ "entity_id": id }),
            }
        })
        .collect();

    let edges: Vec<GraphEdge> = segments
        .iter()
        .map(|seg| {
            let edge_id = format!("{}--{}--{}", seg.from, seg.to, seg.relation_type);
            let pmids = segment_pmids.get(&edge_id).cloned().unwrap_or_default();
            let target_type = entity_details
                .get(&seg.to)
                .map(|e| e.entity_type.as_str());
            let predicate = predicate_for(Some(&seg.relation_type));
            let confidence = (pmids.len() as f64 / PATH_CONFIDENCE_SATURATION).min(1.0);

            GraphEdge {
                id: edge_id,
                source: seg.from.clone(),
                target: seg.to.clone(),
                predicate: predicate.to_string(),
                label: label_from_predicate(predicate),
                color: Some(color_for(target_type).to_string()),
                source_db: SOURCE_DB.to_string(),
                direction: "->".to_string(),
                confidence_score: Some(confidence),
                provenance: PROVENANCE.to_string(),
                evidence: evidence_for_pmids(&pmids, paper_details),
                paper_count: 0,
                trial_count: 0,
                patent_count: 0,
                cooccurrence_score: 0,
            }
        })
        .collect();

    GraphPayload {
        center_node_id: path_ids.first().cloned().unwrap_or_default(),
        nodes,
        edges,
        message: None,
    }
}

/// Empty payload for a lookup miss
pub fn build_not_found_response(query: &str) -> GraphPayload {
    GraphPayload::empty_with_message("", format!("No entity found matching '{}'", query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use biograph_common::models::EntityType;

    fn center() -> Entity {
        Entity {
            entity_id: "NCBIGene:672".to_string(),
            entity_type: EntityType::Gene,
            mention: "BRCA1".to_string(),
        }
    }

    fn neighbor(id: &str, relation_type: &str, direction: &str, score: i64) -> NeighborEdge {
        NeighborEdge {
            other_entity_id: id.to_string(),
            relation_type: relation_type.to_string(),
            direction: direction.to_string(),
            evidence_count: 3,
            pmids: vec!["1234".to_string()],
            other_type: Some("disease".to_string()),
            other_mention: Some("Breast Neoplasms".to_string()),
            paper_count: score,
            trial_count: 0,
            patent_count: 0,
            cooccurrence_score: score,
        }
    }

    fn papers() -> HashMap<String, PaperDetails> {
        HashMap::from([(
            "1234".to_string(),
            PaperDetails { title: "BRCA1 and breast cancer".to_string(), year: 2019 },
        )])
    }

    #[test]
    fn test_neighborhood_payload_invariants() {
        let related = vec![
            neighbor("MESH:D001943", "gene_disease", "->", 40),
            neighbor("MESH:D009369", "gene_disease", "<-", 10),
        ];
        let payload = build_graph_payload(&center(), &related, &papers());

        assert_eq!(payload.center_node_id, "NCBIGene:672");

        let node_ids: HashSet<&str> = payload.nodes.iter().map(|n| n.id.as_str()).collect();
        for edge in &payload.edges {
            assert!(node_ids.contains(edge.source.as_str()));
            assert!(node_ids.contains(edge.target.as_str()));
            let c = edge.confidence_score.unwrap();
            assert!((0.0..=1.0).contains(&c));
        }

        let edge_ids: HashSet<&str> = payload.edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(edge_ids.len(), payload.edges.len());

        for node in &payload.nodes {
            let s = node.size.unwrap();
            assert!((0.6..=1.5).contains(&s));
        }
    }

    #[test]
    fn test_direction_swaps_endpoints() {
        let related = vec![neighbor("MESH:D001943", "gene_disease", "<-", 5)];
        let payload = build_graph_payload(&center(), &related, &papers());
        let edge = &payload.edges[0];
        assert_eq!(edge.source, "MESH:D001943");
        assert_eq!(edge.target, "NCBIGene:672");
        assert_eq!(edge.id, "MESH:D001943--NCBIGene:672--gene_disease");
    }

    #[test]
    fn test_size_scaling_and_dedup() {
        let mut weak = neighbor("MESH:D001943", "gene_disease", "->", 10);
        weak.cooccurrence_score = 10;
        let strong = neighbor("MESH:D001943", "disease_disease", "->", 40);
        let payload = build_graph_payload(&center(), &[weak, strong], &papers());

        // One center plus one deduplicated neighbor
        assert_eq!(payload.nodes.len(), 2);
        let node = payload.nodes.iter().find(|n| n.id == "MESH:D001943").unwrap();
        // Larger of 0.6+0.8*10/40 = 0.8 and 0.6+0.8*40/40 = 1.4
        assert_eq!(node.size, Some(1.4));
        // Both relation types survive as separate edges
        assert_eq!(payload.edges.len(), 2);
    }

    #[test]
    fn test_max_score_zero_floors() {
        let related = vec![neighbor("MESH:D001943", "gene_disease", "->", 0)];
        let payload = build_graph_payload(&center(), &related, &papers());
        let node = payload.nodes.iter().find(|n| n.id == "MESH:D001943").unwrap();
        assert_eq!(node.size, Some(0.6));
        assert_eq!(payload.edges[0].confidence_score, Some(0.0));
    }

    #[test]
    fn test_evidence_carries_title_and_year() {
        let related = vec![neighbor("MESH:D001943", "gene_disease", "->", 7)];
        let payload = build_graph_payload(&center(), &related, &papers());
        let ev = &payload.edges[0].evidence[0];
        assert_eq!(ev.pmid, "1234");
        assert_eq!(ev.snippet, "BRCA1 and breast cancer");
        assert_eq!(ev.pub_year, 2019);
        assert_eq!(ev.source, "PubMed");
    }

    #[test]
    fn test_empty_neighborhood_keeps_center() {
        let payload = build_graph_payload(&center(), &[], &HashMap::new());
        assert_eq!(payload.nodes.len(), 1);
        assert!(payload.edges.is_empty());
        assert_eq!(payload.nodes[0].size, Some(1.5));
    }

    #[test]
    fn test_path_payload_ordering() {
        let path_ids = vec![
            "NCBIGene:672".to_string(),
            "NCBIGene:675".to_string(),
            "MESH:D001943".to_string(),
        ];
        let segments = vec![
            PathSegment {
                from: "NCBIGene:672".into(),
                to: "NCBIGene:675".into(),
                relation_type: "gene_gene".into(),
            },
            PathSegment {
                from: "NCBIGene:675".into(),
                to: "MESH:D001943".into(),
                relation_type: "gene_disease".into(),
            },
        ];
        let mut pmids = HashMap::new();
        pmids.insert(
            "NCBIGene:672--NCBIGene:675--gene_gene".to_string(),
            vec!["1234".to_string()],
        );

        let entities = HashMap::from([(
            "NCBIGene:672".to_string(),
            Entity {
                entity_id: "NCBIGene:672".into(),
                entity_type: EntityType::Gene,
                mention: "BRCA1".into(),
            },
        )]);

        let payload =
            build_path_graph_payload(&path_ids, &segments, &pmids, &entities, &papers());

        // k segments -> k+1 nodes, in path order
        assert_eq!(payload.nodes.len(), segments.len() + 1);
        for (i, seg) in segments.iter().enumerate() {
            assert_eq!(payload.nodes[i].id, seg.from);
        }
        assert_eq!(payload.nodes[2].id, segments[1].to);

        // Consecutive edges chain
        assert_eq!(payload.edges[0].target, payload.edges[1].source);

        // First node is the expanded center
        assert_eq!(payload.center_node_id, "NCBIGene:672");
        assert_eq!(payload.nodes[0].is_expanded, Some(true));
        assert_eq!(payload.nodes[0].size, Some(1.5));
        assert_eq!(payload.nodes[1].size, Some(1.0));

        // Confidence scales with evidence count
        assert_eq!(payload.edges[0].confidence_score, Some(0.1));
        assert_eq!(payload.edges[1].confidence_score, Some(0.0));

        // Unknown entity falls back to its id as the display name
        assert_eq!(payload.nodes[1].name, "NCBIGene:675");
    }

    #[test]
    fn test_path_confidence_saturates() {
        let path_ids = vec!["A".to_string(), "B".to_string()];
        let segments = vec![PathSegment {
            from: "A".into(),
            to: "B".into(),
            relation_type: "gene_gene".into(),
        }];
        let mut pmids = HashMap::new();
        pmids.insert(
            "A--B--gene_gene".to_string(),
            (0..15).map(|i| i.to_string()).collect(),
        );

        let payload = build_path_graph_payload(
            &path_ids,
            &segments,
            &pmids,
            &HashMap::new(),
            &HashMap::new(),
        );
        assert_eq!(payload.edges[0].confidence_score, Some(1.0));
    }

    #[test]
    fn test_not_found_response() {
        let payload = build_not_found_response("frobnicase");
        assert_eq!(payload.center_node_id, "");
        assert!(payload.nodes.is_empty());
        assert!(payload.edges.is_empty());
        assert!(payload.message.unwrap().contains("frobnicase"));
    }
}
