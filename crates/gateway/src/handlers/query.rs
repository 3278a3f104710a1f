//! Graph query handlers
//!
//! `/api/query` resolves the intent of a free-text query and dispatches to
//! either the single-entity neighborhood flow or the shortest-path flow;
//! `/api/expand` re-runs the neighborhood flow for an exact entity id.

use crate::state::AppState;
use axum::{extract::State, Json};
use biograph_common::errors::{AppError, Result};
use biograph_common::metrics;
use biograph_common::models::{Entity, ExpandRequest, GraphPayload, QueryRequest};
use biograph_context::QueryIntent;
use biograph_graph::builder::{
    build_graph_payload, build_not_found_response, build_path_graph_payload,
};
use std::collections::HashSet;
use std::time::Instant;
use tracing::info;
use validator::Validate;

pub async fn query_entity(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<GraphPayload>> {
    request.validate().map_err(|e| AppError::Validation { message: e.to_string() })?;

    let start = Instant::now();
    let intent = state.intent.resolve(&request.query).await?;
    info!(query = %request.query, intent = ?intent, "Resolved query intent");

    let payload = match intent {
        QueryIntent::SearchEntity { entity_name, entity_type } => {
            handle_search_entity(&state, &entity_name, entity_type.as_deref()).await?
        }
        QueryIntent::FindShortestPath {
            entity1_name,
            entity1_type,
            entity2_name,
            entity2_type,
        } => {
            handle_shortest_path(
                &state,
                &entity1_name,
                entity1_type.as_deref(),
                &entity2_name,
                entity2_type.as_deref(),
            )
            .await?
        }
    };

    metrics::record_query(start.elapsed().as_secs_f64(), "query", payload.nodes.len());
    Ok(Json(payload))
}

pub async fn expand_entity(
    State(state): State<AppState>,
    Json(request): Json<ExpandRequest>,
) -> Result<Json<GraphPayload>> {
    request.validate().map_err(|e| AppError::Validation { message: e.to_string() })?;

    let start = Instant::now();
    let Some(entity) = state.warehouse.find_entity_by_id(&request.entity_id).await? else {
        return Ok(Json(build_not_found_response(&request.entity_id)));
    };

    let payload = neighborhood_payload(&state, entity).await?;
    metrics::record_query(start.elapsed().as_secs_f64(), "expand", payload.nodes.len());
    Ok(Json(payload))
}

async fn handle_search_entity(
    state: &AppState,
    entity_name: &str,
    entity_type: Option<&str>,
) -> Result<GraphPayload> {
    let Some(entity) = state.warehouse.find_entity(entity_name, entity_type).await? else {
        return Ok(build_not_found_response(entity_name));
    };
    neighborhood_payload(state, entity).await
}

async fn neighborhood_payload(state: &AppState, entity: Entity) -> Result<GraphPayload> {
    let related = state.warehouse.find_related_entities(&entity.entity_id).await?;

    let all_pmids: Vec<String> = related
        .iter()
        .flat_map(|rel| rel.pmids.iter().cloned())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let paper_details = state.warehouse.fetch_paper_details(&all_pmids).await?;

    Ok(build_graph_payload(&entity, &related, &paper_details))
}

async fn handle_shortest_path(
    state: &AppState,
    name1: &str,
    type1: Option<&str>,
    name2: &str,
    type2: Option<&str>,
) -> Result<GraphPayload> {
    if name1.is_empty() || name2.is_empty() {
        return Ok(build_not_found_response(
            "Could not identify two entities in the query.",
        ));
    }

    let Some(entity1) = state.warehouse.find_entity(name1, type1).await? else {
        return Ok(build_not_found_response(name1));
    };
    let Some(entity2) = state.warehouse.find_entity(name2, type2).await? else {
        return Ok(build_not_found_response(name2));
    };

    let id1 = entity1.entity_id.clone();
    let id2 = entity2.entity_id.clone();

    if id1 == id2 {
        return Ok(GraphPayload::empty_with_message(
            id1,
            format!("'{}' and '{}' resolve to the same entity.", name1, name2),
        ));
    }

    let segments = state.path_engine.find_shortest_path(&id1, &id2).await;
    let Some(segments) = segments else {
        metrics::record_path(false, 0);
        return Ok(GraphPayload::empty_with_message(
            id1,
            format!(
                "No path found between '{}' and '{}' within the knowledge graph.",
                name1, name2
            ),
        ));
    };
    metrics::record_path(true, segments.len());

    // Entity ids along the path, in order
    let mut path_ids = vec![id1.clone()];
    for seg in &segments {
        if !path_ids.contains(&seg.to) {
            path_ids.push(seg.to.clone());
        }
    }

    // The graph store returns structure only; evidence comes from the warehouse
    let edge_pairs: Vec<(String, String, String)> = segments
        .iter()
        .map(|seg| (seg.from.clone(), seg.to.clone(), seg.relation_type.clone()))
        .collect();
    let edge_pmids = state.warehouse.fetch_edge_pmids(&edge_pairs).await?;

    let entity_details = state.warehouse.find_entities_by_ids(&path_ids).await?;
    let all_pmids: Vec<String> = edge_pmids
        .values()
        .flatten()
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let paper_details = state.warehouse.fetch_paper_details(&all_pmids).await?;

    Ok(build_path_graph_payload(
        &path_ids,
        &segments,
        &edge_pmids,
        &entity_details,
        &paper_details,
    ))
}
