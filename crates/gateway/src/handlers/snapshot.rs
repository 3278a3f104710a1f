//! Graph snapshot handlers

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use biograph_common::errors::{AppError, Result};
use biograph_common::models::{GraphSnapshotPayload, SnapshotResponse};

pub async fn create_snapshot(
    State(state): State<AppState>,
    Json(payload): Json<GraphSnapshotPayload>,
) -> Result<Json<SnapshotResponse>> {
    let data = serde_json::to_value(&payload)?;
    let id = state.snapshots.save(data);
    Ok(Json(SnapshotResponse { id }))
}

pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state
        .snapshots
        .load(&id)
        .map(Json)
        .ok_or(AppError::SnapshotNotFound { id })
}
