//! BioGraph gateway library
//!
//! Router construction and handlers live here so integration tests can
//! drive the full HTTP surface against mock services; the binary wires real
//! clients in `main.rs`.

pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Graph queries
        .route("/query", post(handlers::query::query_entity))
        .route("/expand", post(handlers::query::expand_entity))
        // Explanation streams
        .route("/overview/stream", post(handlers::overview::stream_overview))
        .route("/overview/verify", get(handlers::overview::verify_overview_vector))
        .route("/deep-think/stream", post(handlers::deep_think::stream_deep_think))
        .route(
            "/deep-think/chat/stream",
            post(handlers::deep_think::stream_deep_think_chat),
        )
        // Snapshots
        .route("/graph/snapshot", post(handlers::snapshot::create_snapshot))
        .route("/graph/snapshot/{id}", get(handlers::snapshot::get_snapshot));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(handlers::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}
