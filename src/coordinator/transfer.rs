//! Replica transfers between storage nodes
//!
//! Every copy is checked twice against the file's recorded checksum: once on
//! the bytes read from the source, once on the digest the target reports for
//! what it stored. A replica row is only written after both match.

use crate::common::{digests_match, Error, Result};
use crate::coordinator::metadata::{FileRecord, MetadataStore, ReplicaRecord};
use crate::coordinator::node_client::{NodeEndpoint, NodeTransport};
use bytes::Bytes;

/// Read a file from `source` and check it against the recorded checksum
pub async fn fetch_verified(
    transport: &dyn NodeTransport,
    source: &NodeEndpoint,
    file: &FileRecord,
) -> Result<Bytes> {
    let blob = transport
        .fetch(source, &file.file_id)
        .await
        .map_err(|e| match e {
            Error::NotFound(what) => Error::TransferFailed(format!("source missing {}", what)),
            other => other,
        })?;
    if !digests_match(&file.checksum, &blob.digest) {
        return Err(Error::ChecksumMismatch {
            expected: file.checksum.clone(),
            actual: blob.digest,
        });
    }
    Ok(blob.data)
}

/// Write `data` to `target` and check the digest it reports back
pub async fn store_verified(
    transport: &dyn NodeTransport,
    target: &NodeEndpoint,
    file: &FileRecord,
    data: Bytes,
) -> Result<u64> {
    let receipt = transport.store(target, &file.file_id, data).await?;
    if !digests_match(&file.checksum, &receipt.digest) {
        tracing::warn!(
            file_id = %file.file_id,
            node_id = %target.node_id,
            actual = %receipt.digest,
            "Stored copy failed verification, discarding candidate replica"
        );
        return Err(Error::ChecksumMismatch {
            expected: file.checksum.clone(),
            actual: receipt.digest,
        });
    }
    Ok(receipt.size)
}

/// Copy a file from `source` to `target`, returning the bytes moved
pub async fn copy_replica(
    transport: &dyn NodeTransport,
    source: &NodeEndpoint,
    target: &NodeEndpoint,
    file: &FileRecord,
) -> Result<u64> {
    let data = fetch_verified(transport, source, file).await?;
    store_verified(transport, target, file, data).await
}

/// Record a verified copy. Returns `false` when another unit already
/// created the replica for this (file, node) pair.
pub fn commit_replica(store: &MetadataStore, file_id: &str, node_id: &str, now: u64) -> Result<bool> {
    let result = store.write(|txn| {
        if txn.file(file_id).is_none() {
            return Err(Error::NotFound(format!("file {}", file_id)));
        }
        txn.insert_replica(ReplicaRecord::new(file_id, node_id, now))
    });
    match result {
        Ok(()) => Ok(true),
        Err(Error::DuplicateReplica { .. }) => {
            tracing::debug!(file_id, node_id, "Replica already recorded by a concurrent unit");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{sha256_hex, NodeStatus};
    use crate::coordinator::metadata::tests::node;
    use crate::coordinator::node_client::InMemoryNodes;

    fn file_with(data: &[u8]) -> FileRecord {
        FileRecord {
            file_id: "file-1".into(),
            filename: "a.bin".into(),
            size: data.len() as u64,
            checksum: sha256_hex(data),
            replication_factor: 2,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_copy_replica() {
        let nodes = InMemoryNodes::new();
        nodes.put("node-1", "file-1", &b"payload"[..]);
        let file = file_with(b"payload");
        let src = node("node-1", NodeStatus::Active, 0).endpoint();
        let dst = node("node-2", NodeStatus::Active, 0).endpoint();

        let copied = copy_replica(&nodes, &src, &dst, &file).await.unwrap();
        assert_eq!(copied, 7);
        assert!(nodes.has("node-2", "file-1"));
    }

    #[tokio::test]
    async fn test_copy_rejects_damaged_store() {
        let nodes = InMemoryNodes::new();
        nodes.put("node-1", "file-1", &b"payload"[..]);
        nodes.corrupt_next_stores("node-2", 1);
        let file = file_with(b"payload");
        let src = node("node-1", NodeStatus::Active, 0).endpoint();
        let dst = node("node-2", NodeStatus::Active, 0).endpoint();

        let err = copy_replica(&nodes, &src, &dst, &file).await.unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_source_is_transfer_failure() {
        let nodes = InMemoryNodes::new();
        let file = file_with(b"payload");
        let src = node("node-1", NodeStatus::Active, 0).endpoint();
        let err = fetch_verified(&nodes, &src, &file).await.unwrap_err();
        assert!(matches!(err, Error::TransferFailed(_)));
    }
}
