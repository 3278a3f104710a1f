//! In-memory snapshot store
//!
//! Process-scoped keyed container for shareable graph snapshots. Ids are
//! 10-hex-char prefixes of a v4 UUID; entries live for the life of the
//! process.

use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct SnapshotStore {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot and return its id
    pub fn save(&self, data: serde_json::Value) -> String {
        let id = Uuid::new_v4().simple().to_string()[..10].to_string();
        self.entries.write().unwrap().insert(id.clone(), data);
        id
    }

    /// Load a snapshot by id
    pub fn load(&self, id: &str) -> Option<serde_json::Value> {
        self.entries.read().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_load_roundtrip() {
        let store = SnapshotStore::new();
        let id = store.save(json!({"query": "BRCA1", "center_node_id": "NCBIGene:672"}));
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded["query"], "BRCA1");
    }

    #[test]
    fn test_load_missing() {
        let store = SnapshotStore::new();
        assert!(store.load("0123456789").is_none());
    }

    #[test]
    fn test_distinct_ids() {
        let store = SnapshotStore::new();
        let a = store.save(json!({}));
        let b = store.save(json!({}));
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }
}
