//! Cluster events
//!
//! Status changes that make files need attention are pushed to the recovery
//! scheduler over an unbounded channel instead of being polled for.

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// Node missed its heartbeat deadline; `files` lost a live replica with it
    NodeLost { node_id: String, files: Vec<String> },
    /// Inactive node heartbeated again; `files` have replicas on it
    NodeRecovered { node_id: String, files: Vec<String> },
    /// Reconciler found no healthy source for an under-replicated file
    FileEscalated { file_id: String },
    /// Verification found a stored copy that no longer matches its checksum
    ReplicaCorrupted { file_id: String, node_id: String },
}

pub type EventSender = mpsc::UnboundedSender<ClusterEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ClusterEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Send if anyone is listening
pub(crate) fn emit(sender: Option<&EventSender>, event: ClusterEvent) {
    if let Some(tx) = sender {
        if tx.send(event).is_err() {
            tracing::debug!("Event receiver dropped, event discarded");
        }
    }
}
