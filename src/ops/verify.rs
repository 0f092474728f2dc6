//! Replica integrity verifier
//!
//! Asks each node for the digest of its stored copy and compares it with the
//! file's recorded checksum. Only active replicas on active nodes are checked.

use crate::common::{digests_match, Error, ReplicaStatus, Result};
use crate::coordinator::events::{emit, ClusterEvent, EventSender};
use crate::coordinator::metadata::MetadataStore;
use crate::coordinator::node_client::{NodeEndpoint, NodeTransport};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Concurrent verify requests in flight
const VERIFY_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub verified: usize,
    pub corrupted: usize,
    pub missing: usize,
    pub unreachable: usize,
}

struct Check {
    file_id: String,
    checksum: String,
    node: NodeEndpoint,
}

enum Verdict {
    Match,
    Mismatch(String),
    Missing,
    Unreachable(Error),
}

pub struct Verifier {
    store: Arc<MetadataStore>,
    transport: Arc<dyn NodeTransport>,
    events: Option<EventSender>,
}

impl Verifier {
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

    pub async fn run_cycle(&self, now: u64) -> Result<VerifyReport> {
        let checks: Vec<Check> = self.store.read(|t| {
            t.files()
                .flat_map(|f| {
                    t.active_replicas_of(&f.file_id).filter_map(move |r| {
                        t.node(&r.node_id).map(|n| Check {
                            file_id: f.file_id.clone(),
                            checksum: f.checksum.clone(),
                            node: n.endpoint(),
                        })
                    })
                })
                .collect()
        });

        let transport = self.transport.as_ref();
        let verdicts: Vec<(Check, Verdict)> = stream::iter(checks)
            .map(|check| async move {
                let verdict = match transport.verify(&check.node, &check.file_id).await {
                    Ok(digest) if digests_match(&check.checksum, &digest) => Verdict::Match,
                    Ok(digest) => Verdict::Mismatch(digest),
                    Err(Error::NotFound(_)) => Verdict::Missing,
                    Err(e) => Verdict::Unreachable(e),
                };
                (check, verdict)
            })
            .buffer_unordered(VERIFY_CONCURRENCY)
            .collect()
            .await;

        let mut report = VerifyReport::default();
        for (check, verdict) in verdicts {
            report.checked += 1;
            match verdict {
                Verdict::Match => {
                    self.store.write(|txn| {
                        txn.mark_replica_verified(&check.file_id, &check.node.node_id, now)
                    })?;
                    report.verified += 1;
                }
                Verdict::Mismatch(actual) => {
                    self.store.write(|txn| {
                        txn.set_replica_status(
                            &check.file_id,
                            &check.node.node_id,
                            ReplicaStatus::Corrupted,
                        )
                    })?;
                    tracing::warn!(
                        file_id = %check.file_id,
                        node_id = %check.node.node_id,
                        expected = %check.checksum,
                        actual = %actual,
                        "Replica failed checksum verification"
                    );
                    emit(
                        self.events.as_ref(),
                        ClusterEvent::ReplicaCorrupted {
                            file_id: check.file_id,
                            node_id: check.node.node_id,
                        },
                    );
                    report.corrupted += 1;
                }
                Verdict::Missing => {
                    tracing::warn!(file_id = %check.file_id, node_id = %check.node.node_id, "Replica missing on node");
                    report.missing += 1;
                }
                Verdict::Unreachable(e) => {
                    tracing::debug!(node_id = %check.node.node_id, "Verify skipped: {}", e);
                    report.unreachable += 1;
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            corrupted = report.corrupted,
            missing = report.missing,
            "Verification pass complete"
        );
        Ok(report)
    }
}
