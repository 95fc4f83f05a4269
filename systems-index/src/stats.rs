//! Index size figures reported by the server and `sx-query stats`.

use serde::{Deserialize, Serialize};

use crate::node::RECORD_SIZE;
use crate::store::NodeStore;

/// Size and shape of an index, derived entirely from the node store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    #[serde(rename = "SizeBytes")]
    pub size_bytes: i64,
    #[serde(rename = "Nodes")]
    pub node_count: i64,
    #[serde(rename = "NodeSize")]
    pub record_size: usize,
}

impl IndexStats {
    pub fn from_store(store: &NodeStore) -> Self {
        let size_bytes = store.len_bytes();
        Self {
            size_bytes,
            node_count: size_bytes / RECORD_SIZE as i64,
            record_size: RECORD_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::node::TrieNode;

    #[test]
    fn test_stats_follow_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = NodeStore::open(dir.path(), 2).unwrap();
        assert_eq!(
            IndexStats::from_store(&store),
            IndexStats {
                size_bytes: 0,
                node_count: 0,
                record_size: 21
            }
        );

        for c in b"abc" {
            store.append_node(&TrieNode::new(*c)).unwrap();
        }
        let stats = IndexStats::from_store(&store);
        assert_eq!(stats.size_bytes, 63);
        assert_eq!(stats.node_count, 3);

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"SizeBytes": 63, "Nodes": 3, "NodeSize": 21})
        );
    }
}
