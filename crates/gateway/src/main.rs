//! BioGraph API Gateway
//!
//! The main entry point for all external API requests. Handles:
//! - Natural-language graph queries and node expansion
//! - SSE explanation streams (overview, deep-think, deep-think chat)
//! - Graph snapshots
//! - Observability (logging, metrics, tracing)

use biograph_common::{
    config::AppConfig, db::DbPool, embeddings::create_embedder, llm::HttpGenerativeClient,
    metrics, snapshot::SnapshotStore,
};
use biograph_context::scholar::SemanticScholarClient;
use biograph_context::scholarly::{ScholarlyContext, SqlContributionStore};
use biograph_context::{
    DeepThinkService, IntentResolver, OverviewService, RagRetriever, Reviewer, SqlRagStore,
};
use biograph_gateway::{create_router, state::AppState};
use biograph_graph::{PathEngine, SqlGraphStore, SqlWarehouse};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting BioGraph API Gateway v{}", biograph_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;
    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();
    if config.server.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.metrics_port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
    }

    // Initialize database connection
    info!("Connecting to warehouse...");
    let db = DbPool::new(&config.database).await?;

    let state = build_state(config.clone(), db)?;

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Construct every shared client once and wire the services together.
fn build_state(config: Arc<AppConfig>, db: DbPool) -> Result<AppState, Box<dyn std::error::Error>> {
    let warehouse = Arc::new(SqlWarehouse::new(db.clone(), config.graph.clone()));

    let graph_store = Arc::new(SqlGraphStore::new(
        db.read().clone(),
        config.graph.relationship_table.clone(),
    ));
    let path_engine = Arc::new(PathEngine::new(
        graph_store,
        config.graph.max_bfs_depth,
        config.graph.max_frontier_size,
    ));

    let model: Arc<dyn biograph_common::GenerativeModel> =
        Arc::new(HttpGenerativeClient::new(&config.llm)?);
    let embedder = create_embedder(&config.embedding);

    let rag_store = match (&config.rag.embed_table, &config.rag.entity_table) {
        (Some(embed_table), Some(entity_table)) => Some(Arc::new(SqlRagStore::new(
            db.clone(),
            embed_table.clone(),
            entity_table.clone(),
        )) as Arc<dyn biograph_context::RagStore>),
        _ => {
            info!("Vector index not configured; RAG retrieval disabled");
            None
        }
    };
    let retriever = Arc::new(RagRetriever::new(embedder, rag_store, config.rag.clone()));

    let scholarly = config.rag.contributions_table.as_ref().map(|table| {
        Arc::new(ScholarlyContext::new(Arc::new(SqlContributionStore::new(
            db.clone(),
            table.clone(),
        ))))
    });

    let reviewer = Arc::new(Reviewer::new(model.clone(), config.llm.flash_model.clone()));

    let overview = Arc::new(OverviewService::new(
        model.clone(),
        retriever.clone(),
        scholarly,
        Some(reviewer.clone()),
        config.llm.clone(),
        config.rag.clone(),
    ));

    let scholar = Arc::new(SemanticScholarClient::new(&config.scholar)?);
    let deep_think = Arc::new(DeepThinkService::new(
        model.clone(),
        scholar,
        Some(reviewer),
        config.llm.clone(),
        config.rag.clone(),
    ));

    let intent = Arc::new(IntentResolver::new(model, config.llm.clone()));

    Ok(AppState {
        config,
        warehouse,
        path_engine,
        intent,
        overview,
        deep_think,
        retriever,
        snapshots: Arc::new(SnapshotStore::new()),
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
