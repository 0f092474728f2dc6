//! Replication reconciler
//!
//! Brings under-replicated files back to their desired replica count by
//! copying from a healthy replica. Files with no healthy replica are handed to
//! the recovery scheduler instead.

use crate::common::{Error, Result};
use crate::coordinator::events::{emit, ClusterEvent, EventSender};
use crate::coordinator::metadata::{FileRecord, MetadataStore};
use crate::coordinator::node_client::{NodeEndpoint, NodeTransport};
use crate::coordinator::placement;
use crate::coordinator::transfer::{commit_replica, copy_replica};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub files_checked: usize,
    pub files_repaired: usize,
    pub replicas_created: usize,
    pub bytes_copied: u64,
    /// Under-replicated, but no eligible target node
    pub skipped_no_target: usize,
    /// No healthy source; sent to the recovery scheduler
    pub escalated: usize,
    pub verification_failures: usize,
}

enum Step {
    Escalate,
    NoTarget,
    Copy {
        file: FileRecord,
        source: NodeEndpoint,
        targets: Vec<NodeEndpoint>,
    },
}

pub struct Reconciler {
    store: Arc<MetadataStore>,
    transport: Arc<dyn NodeTransport>,
    events: Option<EventSender>,
}

impl Reconciler {
    pub fn new(store: Arc<MetadataStore>, transport: Arc<dyn NodeTransport>) -> Self {
        Self {
            store,
            transport,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// One reconciliation pass over every file. Running it on a healthy
    /// cluster changes nothing.
    pub async fn run_cycle(&self, now: u64) -> Result<RepairReport> {
        let under_replicated: Vec<String> = self.store.read(|t| {
            t.files()
                .filter(|f| t.health(&f.file_id).is_some_and(|h| h.is_under_replicated()))
                .map(|f| f.file_id.clone())
                .collect()
        });
        let mut report = RepairReport {
            files_checked: self.store.read(|t| t.file_count()),
            ..RepairReport::default()
        };

        for file_id in under_replicated {
            match self.plan(&file_id) {
                Some(Step::Escalate) => {
                    tracing::warn!(file_id = %file_id, "No healthy replica, escalating to recovery");
                    emit(
                        self.events.as_ref(),
                        ClusterEvent::FileEscalated { file_id },
                    );
                    report.escalated += 1;
                }
                Some(Step::NoTarget) => {
                    tracing::debug!(file_id = %file_id, "Under-replicated, no eligible target");
                    report.skipped_no_target += 1;
                }
                Some(Step::Copy {
                    file,
                    source,
                    targets,
                }) => {
                    let created = self
                        .replicate(&file, &source, &targets, now, &mut report)
                        .await?;
                    if created > 0 {
                        report.files_repaired += 1;
                    }
                }
                None => {}
            }
        }

        if report.replicas_created > 0 || report.escalated > 0 {
            tracing::info!(
                repaired = report.files_repaired,
                replicas = report.replicas_created,
                escalated = report.escalated,
                "Reconciliation pass complete"
            );
        }
        Ok(report)
    }

    fn plan(&self, file_id: &str) -> Option<Step> {
        self.store.read(|t| {
            let file = t.file(file_id)?;
            let health = t.health(file_id)?;
            if !health.is_under_replicated() {
                return None;
            }
            let Some(source) = placement::select_source(t, file_id) else {
                return Some(Step::Escalate);
            };
            let needed = health.desired - health.active;
            let targets = placement::select_targets(t, file_id, needed);
            if targets.is_empty() {
                return Some(Step::NoTarget);
            }
            Some(Step::Copy {
                file: file.clone(),
                source,
                targets,
            })
        })
    }

    async fn replicate(
        &self,
        file: &FileRecord,
        source: &NodeEndpoint,
        targets: &[NodeEndpoint],
        now: u64,
        report: &mut RepairReport,
    ) -> Result<usize> {
        let mut created = 0;
        for target in targets {
            match copy_replica(self.transport.as_ref(), source, target, file).await {
                Ok(bytes) => match commit_replica(&self.store, &file.file_id, &target.node_id, now) {
                    Ok(true) => {
                        tracing::info!(
                            file_id = %file.file_id,
                            source = %source.node_id,
                            target = %target.node_id,
                            bytes,
                            "Replica created"
                        );
                        created += 1;
                        report.replicas_created += 1;
                        report.bytes_copied += bytes;
                    }
                    Ok(false) => {}
                    Err(Error::NotFound(_)) => break,
                    Err(e) => return Err(e),
                },
                Err(e @ Error::ChecksumMismatch { .. }) => {
                    tracing::warn!(
                        file_id = %file.file_id,
                        source = %source.node_id,
                        target = %target.node_id,
                        "Copy failed verification: {}", e
                    );
                    report.verification_failures += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        file_id = %file.file_id,
                        source = %source.node_id,
                        target = %target.node_id,
                        "Copy failed: {}", e
                    );
                }
            }
        }
        Ok(created)
    }
}
