//! Recovery strategies
//!
//! A plan is chosen from metadata alone, then executed against the storage
//! nodes. Planning runs under the store's read lock; execution never holds it.

use crate::common::{timestamp_now, Error, Result};
use crate::coordinator::metadata::{FileRecord, MetadataStore, ReplicaHealth, Tables};
use crate::coordinator::node_client::{NodeEndpoint, NodeTransport};
use crate::coordinator::placement;
use crate::coordinator::transfer::{commit_replica, copy_replica, fetch_verified, store_verified};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Strategy tag, as reported in the queue and history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    CreateReplica,
    ReplaceCorrupted,
    DisasterRecovery,
    NoAction,
}

impl StrategyKind {
    /// Strategy a file in this state is expected to need
    pub fn for_health(health: &ReplicaHealth) -> Self {
        if health.active == 0 {
            StrategyKind::DisasterRecovery
        } else if health.corrupted > 0 {
            StrategyKind::ReplaceCorrupted
        } else if health.active < health.desired {
            StrategyKind::CreateReplica
        } else {
            StrategyKind::NoAction
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::CreateReplica => write!(f, "create_replica"),
            StrategyKind::ReplaceCorrupted => write!(f, "replace_corrupted"),
            StrategyKind::DisasterRecovery => write!(f, "disaster_recovery"),
            StrategyKind::NoAction => write!(f, "no_action"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryPlan {
    /// Copy from a healthy replica to new nodes
    CreateReplica {
        source: NodeEndpoint,
        targets: Vec<NodeEndpoint>,
        needed: usize,
    },
    /// Overwrite corrupted copies on live nodes from a healthy replica
    ReplaceCorrupted {
        source: NodeEndpoint,
        targets: Vec<NodeEndpoint>,
    },
    /// No live copy left: read directly from nodes marked inactive
    DisasterRecovery {
        candidates: Vec<NodeEndpoint>,
        needed: usize,
    },
    NoAction,
}

impl RecoveryPlan {
    /// Pick a plan from the current replica and node state
    pub fn select(tables: &Tables, file_id: &str) -> Result<Self> {
        let health = tables
            .health(file_id)
            .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;

        if health.active == 0 {
            return Ok(RecoveryPlan::DisasterRecovery {
                candidates: placement::stranded_sources(tables, file_id),
                needed: health.desired,
            });
        }

        let Some(source) = placement::select_source(tables, file_id) else {
            return Err(Error::Internal(format!(
                "file {} counts active replicas but has no source",
                file_id
            )));
        };

        let corrupted = placement::corrupted_targets(tables, file_id);
        if !corrupted.is_empty() {
            return Ok(RecoveryPlan::ReplaceCorrupted {
                source,
                targets: corrupted,
            });
        }

        if health.active < health.desired {
            let needed = health.desired - health.active;
            return Ok(RecoveryPlan::CreateReplica {
                source,
                targets: placement::select_targets(tables, file_id, needed),
                needed,
            });
        }

        Ok(RecoveryPlan::NoAction)
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            RecoveryPlan::CreateReplica { .. } => StrategyKind::CreateReplica,
            RecoveryPlan::ReplaceCorrupted { .. } => StrategyKind::ReplaceCorrupted,
            RecoveryPlan::DisasterRecovery { .. } => StrategyKind::DisasterRecovery,
            RecoveryPlan::NoAction => StrategyKind::NoAction,
        }
    }
}

/// What an executed plan achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryOutcome {
    pub replicas_written: usize,
    pub bytes: u64,
}

/// Carry out a plan. Succeeds when the file gained at least one healthy copy
/// (or had nothing to do).
pub async fn execute(
    store: &MetadataStore,
    transport: &dyn NodeTransport,
    file: &FileRecord,
    plan: RecoveryPlan,
) -> Result<RecoveryOutcome> {
    match plan {
        RecoveryPlan::CreateReplica {
            source,
            targets,
            needed,
        } => create_replicas(store, transport, file, &source, &targets, needed).await,
        RecoveryPlan::ReplaceCorrupted { source, targets } => {
            replace_corrupted(store, transport, file, &source, &targets).await
        }
        RecoveryPlan::DisasterRecovery { candidates, needed } => {
            disaster_recovery(store, transport, file, &candidates, needed).await
        }
        RecoveryPlan::NoAction => Ok(RecoveryOutcome::default()),
    }
}

async fn create_replicas(
    store: &MetadataStore,
    transport: &dyn NodeTransport,
    file: &FileRecord,
    source: &NodeEndpoint,
    targets: &[NodeEndpoint],
    needed: usize,
) -> Result<RecoveryOutcome> {
    if targets.is_empty() {
        return Err(Error::InsufficientTargets {
            needed,
            available: 0,
        });
    }

    let mut outcome = RecoveryOutcome::default();
    let mut last_error = None;
    for target in targets {
        match copy_replica(transport, source, target, file).await {
            Ok(bytes) => {
                if commit_replica(store, &file.file_id, &target.node_id, timestamp_now())? {
                    outcome.replicas_written += 1;
                    outcome.bytes += bytes;
                }
            }
            Err(e) => {
                tracing::warn!(
                    file_id = %file.file_id,
                    source = %source.node_id,
                    target = %target.node_id,
                    "Replica copy failed: {}", e
                );
                last_error = Some(e);
            }
        }
    }
    finish(outcome, last_error)
}

async fn replace_corrupted(
    store: &MetadataStore,
    transport: &dyn NodeTransport,
    file: &FileRecord,
    source: &NodeEndpoint,
    targets: &[NodeEndpoint],
) -> Result<RecoveryOutcome> {
    let data = fetch_verified(transport, source, file).await?;

    let mut outcome = RecoveryOutcome::default();
    let mut last_error = None;
    for target in targets {
        match store_verified(transport, target, file, data.clone()).await {
            Ok(bytes) => {
                store.write(|txn| {
                    txn.mark_replica_verified(&file.file_id, &target.node_id, timestamp_now())
                })?;
                tracing::info!(file_id = %file.file_id, node_id = %target.node_id, "Replaced corrupted replica");
                outcome.replicas_written += 1;
                outcome.bytes += bytes;
            }
            Err(e) => {
                tracing::warn!(
                    file_id = %file.file_id,
                    target = %target.node_id,
                    "Corrupted replica replacement failed: {}", e
                );
                last_error = Some(e);
            }
        }
    }

    // Any copy still corrupted keeps the task alive
    match last_error {
        Some(e) => Err(e),
        None => Ok(outcome),
    }
}

async fn disaster_recovery(
    store: &MetadataStore,
    transport: &dyn NodeTransport,
    file: &FileRecord,
    candidates: &[NodeEndpoint],
    needed: usize,
) -> Result<RecoveryOutcome> {
    let Some((origin, data)) = find_surviving_copy(transport, file, candidates).await else {
        return Err(Error::RecoveryExhausted(format!(
            "no valid copy of {} on {} inactive node(s)",
            file.file_id,
            candidates.len()
        )));
    };
    tracing::info!(file_id = %file.file_id, origin = %origin, "Recovered data from inactive node");

    let targets = store.read(|t| placement::select_targets(t, &file.file_id, needed));
    if targets.is_empty() {
        return Err(Error::InsufficientTargets {
            needed,
            available: 0,
        });
    }

    let mut outcome = RecoveryOutcome::default();
    let mut last_error = None;
    for target in &targets {
        match store_verified(transport, target, file, data.clone()).await {
            Ok(bytes) => {
                if commit_replica(store, &file.file_id, &target.node_id, timestamp_now())? {
                    outcome.replicas_written += 1;
                    outcome.bytes += bytes;
                }
            }
            Err(e) => {
                tracing::warn!(file_id = %file.file_id, target = %target.node_id, "Restore failed: {}", e);
                last_error = Some(e);
            }
        }
    }
    finish(outcome, last_error)
}

async fn find_surviving_copy(
    transport: &dyn NodeTransport,
    file: &FileRecord,
    candidates: &[NodeEndpoint],
) -> Option<(String, Bytes)> {
    for candidate in candidates {
        match fetch_verified(transport, candidate, file).await {
            Ok(data) => return Some((candidate.node_id.clone(), data)),
            Err(e) => {
                tracing::debug!(file_id = %file.file_id, node_id = %candidate.node_id, "No usable copy: {}", e)
            }
        }
    }
    None
}

fn finish(outcome: RecoveryOutcome, last_error: Option<Error>) -> Result<RecoveryOutcome> {
    match last_error {
        Some(e) if outcome.replicas_written == 0 => Err(e),
        _ => Ok(outcome),
    }
}
