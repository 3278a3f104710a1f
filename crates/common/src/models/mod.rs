//! Shared request/response models for the BioGraph services

pub mod deep_think;
pub mod graph;
pub mod overview;
pub mod rag;
pub mod request;
pub mod snapshot;

pub use deep_think::{
    DeepThinkChatMessage, DeepThinkChatRequest, DeepThinkEdge, DeepThinkEdgeEvidence,
    DeepThinkPathNode, DeepThinkRequest,
};
pub use graph::{
    Entity, EntityType, GraphEdge, GraphEvidence, GraphNode, GraphPayload, NeighborEdge,
    PathSegment,
};
pub use overview::{
    OverviewEdge, OverviewEntity, OverviewEvidence, OverviewHistoryItem, OverviewPathEntity,
    OverviewStreamRequest,
};
pub use rag::{Chunk, DocEntity, RagChunk};
pub use request::{ExpandRequest, QueryRequest};
pub use snapshot::{GraphSnapshotPayload, SnapshotResponse};
