//! Graph store abstraction
//!
//! The path engine only needs two primitives from the graph database: a
//! single-query ANY-SHORTEST attempt and batched 1-hop neighbor lookups.
//! `SqlGraphStore` serves both from the relationship table (edges are stored
//! bidirectionally, so the forward direction covers all neighbors);
//! `MemoryGraphStore` is an adjacency-map double used in tests.

use async_trait::async_trait;
use biograph_common::errors::{AppError, Result};
use biograph_common::models::PathSegment;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Statement};
use std::collections::HashMap;

/// One outgoing edge from a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborRecord {
    pub neighbor_id: String,
    pub relation_type: String,
}

/// Minimal graph-database surface needed by the path engine
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Attempt a single-query ANY-SHORTEST path of length 1..=max_hops,
    /// treating edges as undirected. `Ok(None)` means the store found no
    /// path this way (or does not support the operator); the caller falls
    /// back to BFS.
    async fn any_shortest(
        &self,
        start_id: &str,
        end_id: &str,
        max_hops: usize,
    ) -> Result<Option<Vec<PathSegment>>>;

    /// Batch 1-hop neighbor lookup: `{src: [(neighbor, relation_type)]}`
    async fn neighbors(
        &self,
        entity_ids: &[String],
    ) -> Result<HashMap<String, Vec<NeighborRecord>>>;
}

/// Graph store backed by the relationship table
pub struct SqlGraphStore {
    conn: DatabaseConnection,
    relationship_table: String,
}

impl SqlGraphStore {
    pub fn new(conn: DatabaseConnection, relationship_table: impl Into<String>) -> Self {
        Self {
            conn,
            relationship_table: relationship_table.into(),
        }
    }
}

#[async_trait]
impl GraphStore for SqlGraphStore {
    /// Direct 1-hop check. Longer paths are left to the BFS stage, which
    /// reuses the same neighbor index instead of an in-database traversal.
    async fn any_shortest(
        &self,
        start_id: &str,
        end_id: &str,
        _max_hops: usize,
    ) -> Result<Option<Vec<PathSegment>>> {
        let sql = format!(
            r#"
            SELECT entity_id1, entity_id2, relation_type
            FROM {table}
            WHERE (entity_id1 = $1 AND entity_id2 = $2)
               OR (entity_id1 = $2 AND entity_id2 = $1)
            LIMIT 1
            "#,
            table = self.relationship_table
        );

        let row = self
            .conn
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &sql,
                vec![start_id.into(), end_id.into()],
            ))
            .await
            .map_err(|e| AppError::GraphStoreTransport {
                message: format!("Direct-path query failed: {}", e),
            })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id1: String = row.try_get("", "entity_id1")?;
        let id2: String = row.try_get("", "entity_id2")?;
        let relation_type: String = row.try_get("", "relation_type")?;

        // Orient the segment from the requested start
        let segment = if id1 == start_id {
            PathSegment { from: id1, to: id2, relation_type }
        } else {
            PathSegment { from: id2, to: id1, relation_type }
        };
        Ok(Some(vec![segment]))
    }

    async fn neighbors(
        &self,
        entity_ids: &[String],
    ) -> Result<HashMap<String, Vec<NeighborRecord>>> {
        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders: Vec<String> = (1..=entity_ids.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            r#"
            SELECT entity_id1 AS src, entity_id2 AS nbr, relation_type
            FROM {table}
            WHERE entity_id1 IN ({placeholders})
            "#,
            table = self.relationship_table,
            placeholders = placeholders.join(", ")
        );

        let values: Vec<sea_orm::Value> = entity_ids.iter().map(|id| id.as_str().into()).collect();

        let rows = self
            .conn
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await
            .map_err(|e| AppError::GraphStoreTransport {
                message: format!("Neighbor lookup failed: {}", e),
            })?;

        let mut result: HashMap<String, Vec<NeighborRecord>> = HashMap::new();
        for row in rows {
            let src: String = row.try_get("", "src")?;
            let neighbor_id: String = row.try_get("", "nbr")?;
            let relation_type: String = row.try_get("", "relation_type")?;
            result
                .entry(src)
                .or_default()
                .push(NeighborRecord { neighbor_id, relation_type });
        }
        Ok(result)
    }
}

/// In-memory graph store for tests. Edges added through `add_edge` are
/// stored in both directions, matching how the loader materializes the
/// relationship table.
#[derive(Default)]
pub struct MemoryGraphStore {
    adjacency: HashMap<String, Vec<NeighborRecord>>,
    /// When set, every call fails with a transport error
    pub fail_transport: bool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, a: &str, b: &str, relation_type: &str) {
        self.adjacency.entry(a.to_string()).or_default().push(NeighborRecord {
            neighbor_id: b.to_string(),
            relation_type: relation_type.to_string(),
        });
        self.adjacency.entry(b.to_string()).or_default().push(NeighborRecord {
            neighbor_id: a.to_string(),
            relation_type: relation_type.to_string(),
        });
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn any_shortest(
        &self,
        start_id: &str,
        end_id: &str,
        _max_hops: usize,
    ) -> Result<Option<Vec<PathSegment>>> {
        if self.fail_transport {
            return Err(AppError::GraphStoreTransport {
                message: "injected transport failure".to_string(),
            });
        }
        let direct = self
            .adjacency
            .get(start_id)
            .and_then(|edges| edges.iter().find(|e| e.neighbor_id == end_id));
        Ok(direct.map(|edge| {
            vec![PathSegment {
                from: start_id.to_string(),
                to: end_id.to_string(),
                relation_type: edge.relation_type.clone(),
            }]
        }))
    }

    async fn neighbors(
        &self,
        entity_ids: &[String],
    ) -> Result<HashMap<String, Vec<NeighborRecord>>> {
        if self.fail_transport {
            return Err(AppError::GraphStoreTransport {
                message: "injected transport failure".to_string(),
            });
        }
        let mut result = HashMap::new();
        for id in entity_ids {
            if let Some(edges) = self.adjacency.get(id) {
                result.insert(id.clone(), edges.clone());
            }
        }
        Ok(result)
    }
}
