//! Deep-think stream handlers

use crate::handlers::sse_response;
use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use biograph_common::metrics;
use biograph_common::models::{DeepThinkChatRequest, DeepThinkRequest};

pub async fn stream_deep_think(
    State(state): State<AppState>,
    Json(request): Json<DeepThinkRequest>,
) -> impl IntoResponse {
    metrics::record_stream("deep_think", "started");
    sse_response(state.deep_think.stream(request))
}

pub async fn stream_deep_think_chat(
    State(state): State<AppState>,
    Json(request): Json<DeepThinkChatRequest>,
) -> impl IntoResponse {
    metrics::record_stream("deep_think_chat", "started");
    sse_response(state.deep_think.chat_stream(request))
}
