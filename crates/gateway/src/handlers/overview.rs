//! AI overview stream handlers

use crate::handlers::sse_response;
use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use biograph_common::metrics;
use biograph_common::models::OverviewStreamRequest;
use biograph_context::VectorVerification;

pub async fn stream_overview(
    State(state): State<AppState>,
    Json(request): Json<OverviewStreamRequest>,
) -> impl IntoResponse {
    metrics::record_stream("overview", "started");
    sse_response(state.overview.stream(request))
}

pub async fn verify_overview_vector(State(state): State<AppState>) -> Json<VectorVerification> {
    Json(state.retriever.verify().await)
}
