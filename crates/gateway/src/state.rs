//! Shared application state
//!
//! Every remote client is constructed once at startup and shared through
//! the request context; the snapshot store is the only process-scoped
//! mutable container.

use biograph_common::config::AppConfig;
use biograph_common::snapshot::SnapshotStore;
use biograph_context::{DeepThinkService, IntentResolver, OverviewService, RagRetriever};
use biograph_graph::{PathEngine, Warehouse};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub warehouse: Arc<dyn Warehouse>,
    pub path_engine: Arc<PathEngine>,
    pub intent: Arc<IntentResolver>,
    pub overview: Arc<OverviewService>,
    pub deep_think: Arc<DeepThinkService>,
    pub retriever: Arc<RagRetriever>,
    pub snapshots: Arc<SnapshotStore>,
}
