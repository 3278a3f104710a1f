//! Shortest-path engine
//!
//! Strategy:
//!   1. Try the graph store's ANY-SHORTEST query (instant when the edge is
//!      direct).
//!   2. Fall back to bidirectional BFS over batched neighbor lookups.
//!
//! The BFS keeps two parent maps and always expands the smaller frontier.
//! Frontiers are capped at `max_frontier_size` (truncated in enumeration
//! order) so hub nodes cannot blow up a level. Within one expansion the
//! first writer of a parent entry wins; the first node found in the other
//! side's parent map is the meeting point, which yields *a* shortest path,
//! not necessarily a unique one.

use crate::store::GraphStore;
use biograph_common::models::PathSegment;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Parent entry: `(parent_id, relation_type)`; the search roots hold `None`.
type ParentMap = HashMap<String, Option<(String, String)>>;

pub struct PathEngine {
    store: Arc<dyn GraphStore>,
    /// Max hops per BFS direction (total path length up to 2x)
    max_depth: usize,
    /// Frontier cap to prevent hub-node explosion
    max_frontier_size: usize,
    /// Hop budget offered to the store's ANY-SHORTEST attempt
    max_hops: usize,
}

impl PathEngine {
    pub fn new(store: Arc<dyn GraphStore>, max_depth: usize, max_frontier_size: usize) -> Self {
        Self {
            store,
            max_depth,
            max_frontier_size,
            max_hops: max_depth * 2,
        }
    }

    /// Find a shortest path between two entities.
    ///
    /// Returns `Some(segments)` with `segments[0].from == start_id` and the
    /// last segment ending at `end_id`, `Some([])` when `start_id == end_id`,
    /// and `None` when no path exists within the hop budget. Transport
    /// failures are logged and reported as `None`; callers that care render
    /// a user-visible "no path" message. When several shortest paths exist
    /// an arbitrary one is returned.
    pub async fn find_shortest_path(&self, start_id: &str, end_id: &str) -> Option<Vec<PathSegment>> {
        if start_id == end_id {
            return Some(Vec::new());
        }

        // Fast path: single store-side query
        match self.store.any_shortest(start_id, end_id, self.max_hops).await {
            Ok(Some(segments)) => {
                info!(start = start_id, end = end_id, "Found direct path via graph store");
                return Some(segments);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "ANY-SHORTEST query failed, falling back to BFS");
            }
        }

        info!(start = start_id, end = end_id, "No direct path; running bidirectional BFS");
        match self.bfs_shortest_path(start_id, end_id).await {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, start = start_id, end = end_id, "BFS failed against graph store");
                None
            }
        }
    }

    async fn bfs_shortest_path(
        &self,
        start_id: &str,
        end_id: &str,
    ) -> biograph_common::Result<Option<Vec<PathSegment>>> {
        let mut forward_parents: ParentMap = HashMap::new();
        forward_parents.insert(start_id.to_string(), None);
        let mut forward_frontier = vec![start_id.to_string()];

        let mut backward_parents: ParentMap = HashMap::new();
        backward_parents.insert(end_id.to_string(), None);
        let mut backward_frontier = vec![end_id.to_string()];

        for _depth in 0..self.max_depth {
            // Expand the smaller frontier
            let forward = forward_frontier.len() <= backward_frontier.len();
            let (frontier, own, other) = if forward {
                (&mut forward_frontier, &mut forward_parents, &backward_parents)
            } else {
                (&mut backward_frontier, &mut backward_parents, &forward_parents)
            };

            let meeting = self.expand_frontier(frontier, own, other).await?;
            if let Some(meeting) = meeting {
                return Ok(Some(reconstruct_path(
                    &meeting,
                    &forward_parents,
                    &backward_parents,
                )));
            }
            if frontier.is_empty() {
                return Ok(None);
            }
        }

        Ok(None)
    }

    /// Expand one BFS level. The frontier is replaced with the next level;
    /// returns the meeting point if one side reached the other.
    async fn expand_frontier(
        &self,
        frontier: &mut Vec<String>,
        own_parents: &mut ParentMap,
        other_parents: &ParentMap,
    ) -> biograph_common::Result<Option<String>> {
        if frontier.len() > self.max_frontier_size {
            frontier.truncate(self.max_frontier_size);
        }

        let neighbors = self.store.neighbors(frontier).await?;

        let mut next_frontier: Vec<String> = Vec::new();
        for src in frontier.iter() {
            let Some(edges) = neighbors.get(src) else { continue };
            for edge in edges {
                if own_parents.contains_key(&edge.neighbor_id) {
                    continue;
                }
                own_parents.insert(
                    edge.neighbor_id.clone(),
                    Some((src.clone(), edge.relation_type.clone())),
                );
                next_frontier.push(edge.neighbor_id.clone());

                if other_parents.contains_key(&edge.neighbor_id) {
                    let meeting = edge.neighbor_id.clone();
                    *frontier = next_frontier;
                    return Ok(Some(meeting));
                }
            }
        }

        *frontier = next_frontier;
        Ok(None)
    }
}

/// Trace back from the meeting point through both parent maps.
fn reconstruct_path(
    meeting_point: &str,
    forward_parents: &ParentMap,
    backward_parents: &ParentMap,
) -> Vec<PathSegment> {
    // Forward half: start -> meeting_point, walked backwards then reversed
    let mut forward_path = Vec::new();
    let mut current = meeting_point.to_string();
    while let Some(Some((parent, relation_type))) = forward_parents.get(&current) {
        forward_path.push(PathSegment {
            from: parent.clone(),
            to: current.clone(),
            relation_type: relation_type.clone(),
        });
        current = parent.clone();
    }
    forward_path.reverse();

    // Backward half: meeting_point -> end, parent pointers already face the end
    let mut backward_path = Vec::new();
    let mut current = meeting_point.to_string();
    while let Some(Some((parent, relation_type))) = backward_parents.get(&current) {
        backward_path.push(PathSegment {
            from: current.clone(),
            to: parent.clone(),
            relation_type: relation_type.clone(),
        });
        current = parent.clone();
    }

    forward_path.extend(backward_path);
    forward_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGraphStore;

    fn engine(store: MemoryGraphStore) -> PathEngine {
        PathEngine::new(Arc::new(store), 4, 500)
    }

    #[tokio::test]
    async fn test_same_entity_returns_empty() {
        let store = MemoryGraphStore::new();
        let path = engine(store).find_shortest_path("A", "A").await;
        assert_eq!(path, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_direct_edge() {
        let mut store = MemoryGraphStore::new();
        store.add_edge("A", "B", "gene_disease");

        let path = engine(store).find_shortest_path("A", "B").await.unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0], PathSegment {
            from: "A".into(),
            to: "B".into(),
            relation_type: "gene_disease".into(),
        });
    }

    #[tokio::test]
    async fn test_two_hop_path() {
        let mut store = MemoryGraphStore::new();
        store.add_edge("A", "B", "gene_gene");
        store.add_edge("B", "C", "gene_disease");

        let path = engine(store).find_shortest_path("A", "C").await.unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].from, "A");
        assert_eq!(path[0].to, "B");
        assert_eq!(path[1].from, "B");
        assert_eq!(path[1].to, "C");
    }

    #[tokio::test]
    async fn test_prefers_shorter_path() {
        let mut store = MemoryGraphStore::new();
        // Long route A-X-Y-C and short route A-B-C
        store.add_edge("A", "X", "gene_gene");
        store.add_edge("X", "Y", "gene_gene");
        store.add_edge("Y", "C", "gene_gene");
        store.add_edge("A", "B", "gene_gene");
        store.add_edge("B", "C", "gene_disease");

        let path = engine(store).find_shortest_path("A", "C").await.unwrap();
        assert_eq!(path.len(), 2);
    }

    #[tokio::test]
    async fn test_disconnected_returns_none() {
        let mut store = MemoryGraphStore::new();
        store.add_edge("A", "B", "gene_gene");
        store.add_edge("C", "D", "gene_gene");

        let path = engine(store).find_shortest_path("A", "D").await;
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn test_hop_budget_exhausted_returns_none() {
        let mut store = MemoryGraphStore::new();
        // Chain of 10 hops exceeds the 4+4 budget
        let ids: Vec<String> = (0..11).map(|i| format!("N{}", i)).collect();
        for pair in ids.windows(2) {
            store.add_edge(&pair[0], &pair[1], "gene_gene");
        }

        let path = engine(store).find_shortest_path("N0", "N10").await;
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn test_long_path_within_budget() {
        let mut store = MemoryGraphStore::new();
        // 6 hops: reachable with 4 per side
        let ids: Vec<String> = (0..7).map(|i| format!("N{}", i)).collect();
        for pair in ids.windows(2) {
            store.add_edge(&pair[0], &pair[1], "gene_gene");
        }

        let path = engine(store).find_shortest_path("N0", "N6").await.unwrap();
        assert_eq!(path.len(), 6);
        assert_eq!(path[0].from, "N0");
        assert_eq!(path[5].to, "N6");
        // Consecutive segments chain
        for pair in path.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
    }

    #[tokio::test]
    async fn test_transport_error_surfaces_as_none() {
        let mut store = MemoryGraphStore::new();
        store.add_edge("A", "B", "gene_gene");
        store.fail_transport = true;

        let path = engine(store).find_shortest_path("A", "B").await;
        assert!(path.is_none());
    }
}
