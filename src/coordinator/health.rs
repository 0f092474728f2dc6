//! Node health monitor
//!
//! Heartbeats are the only liveness signal. A node turns active when it
//! registers or heartbeats, and inactive only when a sweep finds it silent for
//! longer than the heartbeat timeout. Nodes are never deleted.

use crate::common::{Error, HealthConfig, NodeStatus, Result};
use crate::coordinator::events::{emit, ClusterEvent, EventSender};
use crate::coordinator::metadata::{MetadataStore, NodeRecord, Txn};
use crate::coordinator::node_client::{NodeTransport, ProbeReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Node registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: String,
    pub node_address: String,
    #[serde(default)]
    pub available_space: u64,
}

/// Heartbeat from a storage node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: String,
    #[serde(default)]
    pub available_space: u64,
    #[serde(default)]
    pub file_count: u64,
    /// Needed only when the coordinator has never seen this node
    #[serde(default)]
    pub node_address: Option<String>,
}

pub struct HealthMonitor {
    store: Arc<MetadataStore>,
    config: HealthConfig,
    events: Option<EventSender>,
}

impl HealthMonitor {
    pub fn new(store: Arc<MetadataStore>, config: HealthConfig) -> Self {
        Self {
            store,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Create or reactivate a node
    pub fn register_node(&self, registration: NodeRegistration, now: u64) -> Result<NodeRecord> {
        validate_node_id(&registration.node_id)?;
        validate_address(&registration.node_address)?;

        let (node, event) = self.store.write(|txn| {
            let node = match txn.node(&registration.node_id) {
                Some(existing) => NodeRecord {
                    address: registration.node_address.clone(),
                    available_bytes: registration.available_space,
                    last_heartbeat: now,
                    ..existing.clone()
                },
                None => {
                    tracing::info!(
                        node_id = %registration.node_id,
                        address = %registration.node_address,
                        "Registered storage node"
                    );
                    NodeRecord {
                        node_id: registration.node_id.clone(),
                        address: registration.node_address.clone(),
                        status: NodeStatus::Unknown,
                        last_heartbeat: now,
                        available_bytes: registration.available_space,
                        file_count: 0,
                        registered_at: now,
                    }
                }
            };
            Ok(activate(txn, node))
        })?;
        self.announce(event);
        Ok(node)
    }

    /// Refresh a node's heartbeat and capacity. Unknown nodes are registered
    /// implicitly when the heartbeat carries their address.
    pub fn receive_heartbeat(&self, heartbeat: Heartbeat, now: u64) -> Result<NodeRecord> {
        validate_node_id(&heartbeat.node_id)?;
        let known = self.store.read(|t| t.node(&heartbeat.node_id).is_some());
        if !known {
            let address = heartbeat.node_address.clone().ok_or_else(|| {
                Error::InvalidRequest(format!(
                    "heartbeat from unknown node {} without node_address",
                    heartbeat.node_id
                ))
            })?;
            self.register_node(
                NodeRegistration {
                    node_id: heartbeat.node_id.clone(),
                    node_address: address,
                    available_space: heartbeat.available_space,
                },
                now,
            )?;
        }

        let (node, event) = self.store.write(|txn| {
            let existing = txn
                .node(&heartbeat.node_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("node {}", heartbeat.node_id)))?;
            let node = NodeRecord {
                last_heartbeat: now,
                available_bytes: heartbeat.available_space,
                file_count: heartbeat.file_count,
                ..existing
            };
            Ok(activate(txn, node))
        })?;
        self.announce(event);
        Ok(node)
    }

    /// Send events produced by a committed transaction
    fn announce(&self, events: impl IntoIterator<Item = ClusterEvent>) {
        for event in events {
            emit(self.events.as_ref(), event);
        }
    }

    /// Mark silent nodes inactive. Returns the ids of nodes lost in this sweep.
    ///
    /// The status flip and the list of files that lost a live replica are
    /// produced under one store transaction.
    pub fn sweep(&self, now: u64) -> Result<Vec<String>> {
        let timeout = self.config.heartbeat_timeout_secs;
        let (lost, events) = self.store.write(|txn| expire(txn, now, timeout))?;
        self.announce(events);
        Ok(lost)
    }

    /// Ask a node for its capacity. Liveness is left to heartbeats; only the
    /// capacity figure is refreshed.
    pub async fn probe_node(&self, transport: &dyn NodeTransport, node_id: &str) -> Result<ProbeReport> {
        let endpoint = self
            .store
            .read(|t| t.node(node_id).map(NodeRecord::endpoint))
            .ok_or_else(|| Error::NotFound(format!("node {}", node_id)))?;
        let report = transport.probe(&endpoint).await?;
        self.store.write(|txn| {
            if let Some(existing) = txn.node(node_id).cloned() {
                txn.put_node(NodeRecord {
                    available_bytes: report.available_bytes,
                    file_count: report.file_count,
                    ..existing
                });
            }
            Ok(())
        })?;
        Ok(report)
    }
}

/// Write `node` back as active. A node returning from inactive yields a
/// `NodeRecovered` event for the caller to send once the write commits.
fn activate(txn: &mut Txn<'_>, mut node: NodeRecord) -> (NodeRecord, Option<ClusterEvent>) {
    let previous = node.status;
    node.status = NodeStatus::Active;
    txn.put_node(node.clone());

    if previous != NodeStatus::Inactive {
        return (node, None);
    }
    let files = txn.files_on_node(&node.node_id);
    tracing::info!(node_id = %node.node_id, files = files.len(), "Node recovered");
    let event = ClusterEvent::NodeRecovered {
        node_id: node.node_id.clone(),
        files,
    };
    (node, Some(event))
}

/// Flip nodes silent for longer than `timeout` to inactive, returning their
/// ids and the `NodeLost` events listing files that lost a live replica
fn expire(txn: &mut Txn<'_>, now: u64, timeout: u64) -> Result<(Vec<String>, Vec<ClusterEvent>)> {
    let expired: Vec<(String, u64)> = txn
        .active_nodes()
        .filter(|n| now.saturating_sub(n.last_heartbeat) > timeout)
        .map(|n| (n.node_id.clone(), now.saturating_sub(n.last_heartbeat)))
        .collect();

    for (node_id, _) in &expired {
        txn.set_node_status(node_id, NodeStatus::Inactive)?;
    }

    let mut events = Vec::with_capacity(expired.len());
    for (node_id, silent_for) in &expired {
        let files: Vec<String> = txn
            .files_on_node(node_id)
            .into_iter()
            .filter(|f| txn.health(f).is_some_and(|h| h.needs_recovery()))
            .collect();
        tracing::warn!(
            node_id = %node_id,
            silent_secs = silent_for,
            affected_files = files.len(),
            "Node lost: no heartbeat"
        );
        events.push(ClusterEvent::NodeLost {
            node_id: node_id.clone(),
            files,
        });
    }

    Ok((expired.into_iter().map(|(id, _)| id).collect(), events))
}

fn validate_node_id(node_id: &str) -> Result<()> {
    if node_id.trim().is_empty() {
        return Err(Error::InvalidRequest("node_id required".into()));
    }
    Ok(())
}

fn validate_address(address: &str) -> Result<()> {
    let url = reqwest::Url::parse(address)
        .map_err(|e| Error::InvalidRequest(format!("invalid node_address {}: {}", address, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
        return Err(Error::InvalidRequest(format!(
            "node_address must be an http(s) URL: {}",
            address
        )));
    }
    Ok(())
}
