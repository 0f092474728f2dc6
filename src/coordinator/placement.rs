//! Replica placement
//!
//! Targets are chosen among active nodes that do not already hold a replica
//! row for the file: most available capacity first, ties broken by the
//! smallest node id so placement is deterministic.

use crate::common::{Error, ReplicaStatus, Result};
use crate::coordinator::metadata::{NodeRecord, Tables};
use crate::coordinator::node_client::NodeEndpoint;
use std::cmp::Reverse;

fn by_capacity(a: &&NodeRecord, b: &&NodeRecord) -> std::cmp::Ordering {
    (Reverse(a.available_bytes), &a.node_id).cmp(&(Reverse(b.available_bytes), &b.node_id))
}

/// Healthy source for a copy: an active replica on an active node
pub fn select_source(tables: &Tables, file_id: &str) -> Option<NodeEndpoint> {
    tables
        .active_replicas_of(file_id)
        .filter_map(|r| tables.node(&r.node_id))
        .min_by(by_capacity)
        .map(NodeRecord::endpoint)
}

/// Up to `count` targets for new replicas of a file
pub fn select_targets(tables: &Tables, file_id: &str, count: usize) -> Vec<NodeEndpoint> {
    let mut candidates: Vec<&NodeRecord> = tables
        .active_nodes()
        .filter(|n| tables.replica(file_id, &n.node_id).is_none())
        .collect();
    candidates.sort_by(by_capacity);
    candidates
        .into_iter()
        .take(count)
        .map(NodeRecord::endpoint)
        .collect()
}

/// Nodes that should receive a fresh upload
pub fn select_upload_nodes(tables: &Tables, replication_factor: usize) -> Result<Vec<NodeEndpoint>> {
    let mut active: Vec<&NodeRecord> = tables.active_nodes().collect();
    if active.len() < replication_factor {
        return Err(Error::InsufficientTargets {
            needed: replication_factor,
            available: active.len(),
        });
    }
    active.sort_by(by_capacity);
    Ok(active
        .into_iter()
        .take(replication_factor)
        .map(NodeRecord::endpoint)
        .collect())
}

/// Replica rows stranded on inactive nodes, candidates for a direct fetch
/// when no live copy remains. Ordered by node id.
pub fn stranded_sources(tables: &Tables, file_id: &str) -> Vec<NodeEndpoint> {
    tables
        .replicas_of(file_id)
        .filter(|r| r.status == ReplicaStatus::Active)
        .filter_map(|r| tables.node(&r.node_id))
        .filter(|n| !n.status.is_active())
        .map(NodeRecord::endpoint)
        .collect()
}

/// Corrupted replicas on nodes that can currently be written to
pub fn corrupted_targets(tables: &Tables, file_id: &str) -> Vec<NodeEndpoint> {
    tables
        .replicas_of(file_id)
        .filter(|r| r.status == ReplicaStatus::Corrupted)
        .filter_map(|r| tables.node(&r.node_id))
        .filter(|n| n.status.is_active())
        .map(NodeRecord::endpoint)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeStatus;
    use crate::coordinator::metadata::tests::{file, node};
    use crate::coordinator::metadata::{MetadataStore, ReplicaRecord};

    fn cluster(nodes: Vec<NodeRecord>) -> MetadataStore {
        let store = MetadataStore::in_memory();
        store
            .write(|txn| {
                for n in nodes {
                    txn.put_node(n);
                }
                txn.insert_file(file("file-1", 2))
            })
            .unwrap();
        store
    }

    #[test]
    fn test_target_prefers_capacity_then_id() {
        let store = cluster(vec![
            node("node-a", NodeStatus::Active, 500),
            node("node-b", NodeStatus::Active, 900),
            node("node-c", NodeStatus::Active, 900),
            node("node-d", NodeStatus::Inactive, 5_000),
        ]);

        let targets = store.read(|t| select_targets(t, "file-1", 3));
        let ids: Vec<_> = targets.iter().map(|e| e.node_id.as_str()).collect();
        assert_eq!(ids, vec!["node-b", "node-c", "node-a"]);
    }

    #[test]
    fn test_target_skips_nodes_already_hosting() {
        let store = cluster(vec![
            node("node-1", NodeStatus::Active, 900),
            node("node-2", NodeStatus::Active, 100),
        ]);
        store
            .write(|txn| txn.insert_replica(ReplicaRecord::new("file-1", "node-1", 1_000)))
            .unwrap();

        let targets = store.read(|t| select_targets(t, "file-1", 2));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].node_id, "node-2");
        let source = store.read(|t| select_source(t, "file-1")).unwrap();
        assert_eq!(source.node_id, "node-1");
    }

    #[test]
    fn test_no_target_when_all_hosting() {
        let store = cluster(vec![node("node-1", NodeStatus::Active, 900)]);
        store
            .write(|txn| txn.insert_replica(ReplicaRecord::new("file-1", "node-1", 1_000)))
            .unwrap();
        assert!(store.read(|t| select_targets(t, "file-1", 1)).is_empty());
    }

    #[test]
    fn test_upload_nodes_insufficient() {
        let store = cluster(vec![
            node("node-1", NodeStatus::Active, 900),
            node("node-2", NodeStatus::Inactive, 900),
        ]);
        let err = store.read(|t| select_upload_nodes(t, 2)).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientTargets {
                needed: 2,
                available: 1
            }
        ));
    }

    #[test]
    fn test_stranded_sources_only_on_inactive_nodes() {
        let store = cluster(vec![
            node("node-1", NodeStatus::Inactive, 900),
            node("node-2", NodeStatus::Active, 900),
        ]);
        store
            .write(|txn| {
                txn.insert_replica(ReplicaRecord::new("file-1", "node-1", 1_000))?;
                txn.insert_replica(ReplicaRecord::new("file-1", "node-2", 1_000))?;
                txn.set_replica_status("file-1", "node-2", ReplicaStatus::Corrupted)
            })
            .unwrap();

        let stranded = store.read(|t| stranded_sources(t, "file-1"));
        assert_eq!(stranded.len(), 1);
        assert_eq!(stranded[0].node_id, "node-1");
        let corrupted = store.read(|t| corrupted_targets(t, "file-1"));
        assert_eq!(corrupted[0].node_id, "node-2");
    }
}
