//! BioGraph graph services
//!
//! Everything between the resolved entity and the JSON payload:
//! - Warehouse repository: entity lookup, neighborhood queries, evidence
//! - Graph store abstraction with shortest-path engine
//! - Deterministic graph payload assembly

pub mod builder;
pub mod pathfind;
pub mod store;
pub mod warehouse;

pub use pathfind::PathEngine;
pub use store::{GraphStore, MemoryGraphStore, NeighborRecord, SqlGraphStore};
pub use warehouse::{SqlWarehouse, Warehouse};
