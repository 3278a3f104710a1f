//! Selection context
//!
//! Resolves the client's selection (an edge, a node, or the center node)
//! against the visible graph it sent back, picking the edge that best
//! explains the selection. Center-node selections aggregate the strongest
//! visible edges into one synthetic overview edge.

use biograph_common::errors::{AppError, Result};
use biograph_common::models::{OverviewEdge, OverviewEntity, OverviewStreamRequest};
use std::collections::{HashMap, HashSet};

/// Evidence entries merged into a center-node aggregate edge
const MAX_MERGED_EVIDENCE: usize = 24;
/// Visible edges considered for a center-node overview
const MAX_CENTER_EDGES: usize = 10;

#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub selection_key: String,
    pub selection_type: String,
    pub edge: OverviewEdge,
    pub source: Option<OverviewEntity>,
    pub target: Option<OverviewEntity>,
    pub related_edges: Vec<OverviewEdge>,
    pub center_overview: bool,
    pub entity_lookup: HashMap<String, OverviewEntity>,
}

fn edge_rank(edge: &OverviewEdge) -> (f64, usize) {
    (edge.score.unwrap_or(0.0), edge.evidence.len())
}

fn pick_best_edge(candidates: Vec<OverviewEdge>) -> Option<OverviewEdge> {
    candidates.into_iter().max_by(|a, b| {
        let (sa, ea) = edge_rank(a);
        let (sb, eb) = edge_rank(b);
        sa.partial_cmp(&sb)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(ea.cmp(&eb))
    })
}

/// Build the selection context from the stream request.
pub fn build_selection_context(request: &OverviewStreamRequest) -> Result<SelectionContext> {
    let entities: HashMap<String, OverviewEntity> = request
        .entities
        .iter()
        .map(|e| (e.id.clone(), e.clone()))
        .collect();

    if request.selection_type == "edge" {
        let edge_id = request.edge_id.as_deref().unwrap_or_default();
        let edge = request
            .edges
            .iter()
            .find(|e| e.id == edge_id)
            .cloned()
            .ok_or_else(|| AppError::Validation {
                message: "Selected edge was not found in the provided graph payload".to_string(),
            })?;
        let source = entities.get(&edge.source).cloned();
        let target = entities.get(&edge.target).cloned();
        return Ok(SelectionContext {
            selection_key: format!("edge:{}", edge.id),
            selection_type: "edge".to_string(),
            source,
            target,
            related_edges: vec![edge.clone()],
            center_overview: false,
            entity_lookup: entities,
            edge,
        });
    }

    let node_id = request.node_id.as_deref().ok_or_else(|| AppError::Validation {
        message: "node_id is required when selection_type=node".to_string(),
    })?;
    let center_id = request.center_node_id.as_str();

    if node_id == center_id {
        return build_center_context(request, &entities, center_id, node_id);
    }

    // Prefer the direct edge between center and node
    let direct_edges: Vec<OverviewEdge> = request
        .edges
        .iter()
        .filter(|e| {
            let pair: HashSet<&str> = [e.source.as_str(), e.target.as_str()].into();
            pair == HashSet::from([center_id, node_id])
        })
        .cloned()
        .collect();
    let mut chosen = pick_best_edge(direct_edges);

    // Then an edge bridging the node to any center neighbor
    if chosen.is_none() {
        let center_neighbors: HashSet<String> = request
            .edges
            .iter()
            .filter(|e| e.source == center_id || e.target == center_id)
            .map(|e| {
                if e.source == center_id {
                    e.target.clone()
                } else {
                    e.source.clone()
                }
            })
            .collect();
        let bridge_edges: Vec<OverviewEdge> = request
            .edges
            .iter()
            .filter(|e| {
                (e.source == node_id && center_neighbors.contains(&e.target))
                    || (e.target == node_id && center_neighbors.contains(&e.source))
            })
            .cloned()
            .collect();
        chosen = pick_best_edge(bridge_edges);
    }

    // Then any edge touching the node
    if chosen.is_none() {
        let node_edges: Vec<OverviewEdge> = request
            .edges
            .iter()
            .filter(|e| e.source == node_id || e.target == node_id)
            .cloned()
            .collect();
        chosen = pick_best_edge(node_edges);
    }

    let Some(chosen) = chosen else {
        // No edge required: describe the node from its metadata alone
        let fallback_edge = OverviewEdge {
            id: format!("fallback:{}", node_id),
            source: node_id.to_string(),
            target: center_id.to_string(),
            predicate: "related_to".to_string(),
            label: Some("related to".to_string()),
            score: None,
            provenance: String::new(),
            source_db: String::new(),
            evidence: Vec::new(),
            paper_count: None,
            trial_count: None,
            patent_count: None,
            cooccurrence_score: None,
        };
        let source = entities.get(node_id).cloned();
        let target = entities.get(center_id).cloned();
        return Ok(SelectionContext {
            selection_key: format!("node:{}", node_id),
            selection_type: "node".to_string(),
            edge: fallback_edge,
            source,
            target,
            related_edges: Vec::new(),
            center_overview: false,
            entity_lookup: entities,
        });
    };

    let source = entities.get(&chosen.source).cloned();
    let target = entities.get(&chosen.target).cloned();
    Ok(SelectionContext {
        selection_key: format!("node:{}", node_id),
        selection_type: "node".to_string(),
        source,
        target,
        related_edges: vec![chosen.clone()],
        center_overview: false,
        entity_lookup: entities,
        edge: chosen,
    })
}

fn build_center_context(
    request: &OverviewStreamRequest,
    entities: &HashMap<String, OverviewEntity>,
    center_id: &str,
    node_id: &str,
) -> Result<SelectionContext> {
    let mut center_edges: Vec<OverviewEdge> = request
        .edges
        .iter()
        .filter(|e| e.source == center_id || e.target == center_id)
        .cloned()
        .collect();
    center_edges.sort_by(|a, b| {
        let (sa, ea) = edge_rank(a);
        let (sb, eb) = edge_rank(b);
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(eb.cmp(&ea))
    });
    center_edges.truncate(MAX_CENTER_EDGES);

    if center_edges.is_empty() {
        return Err(AppError::Validation {
            message: "Center node has no visible connected edges".to_string(),
        });
    }

    // Merge evidence across the top edges, deduplicated
    let mut seen_keys: HashSet<String> = HashSet::new();
    let mut merged_evidence = Vec::new();
    'outer: for edge in &center_edges {
        for ev in &edge.evidence {
            let key = ev
                .id
                .clone()
                .or_else(|| ev.pmid.clone())
                .unwrap_or_else(|| {
                    let snippet: String = ev.snippet.chars().take(120).collect();
                    format!("{}|{}", ev.title.as_deref().unwrap_or(""), snippet)
                });
            if !seen_keys.insert(key) {
                continue;
            }
            merged_evidence.push(ev.clone());
            if merged_evidence.len() >= MAX_MERGED_EVIDENCE {
                break 'outer;
            }
        }
    }

    let first = &center_edges[0];
    let aggregate_edge = OverviewEdge {
        id: format!("center:{}:all-visible", center_id),
        source: center_id.to_string(),
        target: "__all_visible_neighbors__".to_string(),
        predicate: "center_node_overview".to_string(),
        label: Some("center node relation to visible nodes".to_string()),
        score: first.score,
        provenance: first.provenance.clone(),
        source_db: first.source_db.clone(),
        evidence: merged_evidence,
        paper_count: Some(center_edges.iter().map(|e| e.paper_count.unwrap_or(0)).sum()),
        trial_count: Some(center_edges.iter().map(|e| e.trial_count.unwrap_or(0)).sum()),
        patent_count: Some(center_edges.iter().map(|e| e.patent_count.unwrap_or(0)).sum()),
        cooccurrence_score: first.cooccurrence_score,
    };

    Ok(SelectionContext {
        selection_key: format!("node:{}", node_id),
        selection_type: "node".to_string(),
        edge: aggregate_edge,
        source: entities.get(center_id).cloned(),
        target: None,
        related_edges: center_edges,
        center_overview: true,
        entity_lookup: entities.clone(),
    })
}
