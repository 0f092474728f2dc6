//! File catalog: upload placement, replica confirmation, download lookup and
//! cluster-wide listings.

use crate::common::{digests_match, is_valid_digest, Error, NodeStatus, ReplicaStatus, Result};
use crate::coordinator::metadata::{
    FileRecord, MetadataStore, PendingUpload, ReplicaRecord, Tables,
};
use crate::coordinator::placement;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub file_size: u64,
    #[serde(default)]
    pub replication_factor: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub node_id: String,
    pub upload_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPlan {
    pub file_id: String,
    pub replication_factor: usize,
    pub upload_nodes: Vec<UploadTarget>,
}

/// A storage node reporting that it holds a copy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfirmation {
    pub file_id: String,
    pub node_id: String,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPlan {
    pub file_id: String,
    pub filename: String,
    pub file_size: u64,
    pub checksum: String,
    pub download_nodes: Vec<DownloadTarget>,
}

/// A live replica a client can read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTarget {
    pub node_id: String,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaView {
    pub node_id: String,
    pub node_address: Option<String>,
    pub node_status: NodeStatus,
    pub status: ReplicaStatus,
    pub path: String,
    pub created_at: u64,
    pub last_verified: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDetail {
    #[serde(flatten)]
    pub file: FileRecord,
    pub active_replicas: usize,
    pub replicas: Vec<ReplicaView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub file_id: String,
    pub filename: String,
    pub size: u64,
    pub replication_factor: usize,
    pub active_replicas: usize,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListing {
    pub files: Vec<FileSummary>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub inactive_nodes: usize,
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub under_replicated_files: usize,
    pub unavailable_files: usize,
    pub recovery_queue_length: usize,
}

/// Assign nodes to a new upload and remember the assignment
pub fn request_upload(
    store: &MetadataStore,
    request: &UploadRequest,
    default_factor: usize,
    file_id: String,
    now: u64,
) -> Result<UploadPlan> {
    if request.filename.trim().is_empty() {
        return Err(Error::InvalidRequest("filename required".into()));
    }
    let factor = request.replication_factor.unwrap_or(default_factor);
    if factor == 0 {
        return Err(Error::InvalidRequest("replication_factor must be > 0".into()));
    }

    let nodes = store.write(|txn| {
        let nodes = placement::select_upload_nodes(txn, factor)?;
        txn.put_upload(PendingUpload {
            file_id: file_id.clone(),
            filename: request.filename.clone(),
            size: request.file_size,
            replication_factor: factor,
            nodes: nodes.iter().map(|n| n.node_id.clone()).collect(),
            requested_at: now,
        });
        Ok(nodes)
    })?;

    tracing::info!(file_id = %file_id, filename = %request.filename, factor, "Upload assigned");
    Ok(UploadPlan {
        upload_nodes: nodes
            .into_iter()
            .map(|n| UploadTarget {
                upload_url: format!("{}/upload/{}", n.address.trim_end_matches('/'), file_id),
                node_id: n.node_id,
            })
            .collect(),
        file_id,
        replication_factor: factor,
    })
}

/// Record a node's copy of an uploaded file. The first confirmation fixes the
/// file's checksum; later ones must match it. Returns `true` when a new
/// replica row was created.
pub fn confirm_replica(store: &MetadataStore, confirmation: &UploadConfirmation, now: u64) -> Result<bool> {
    if !is_valid_digest(&confirmation.checksum) {
        return Err(Error::InvalidRequest(format!(
            "checksum must be a hex SHA-256 digest: {}",
            confirmation.checksum
        )));
    }
    let checksum = confirmation.checksum.to_ascii_lowercase();
    let (file_id, node_id) = (&confirmation.file_id, &confirmation.node_id);

    store.write(|txn| {
        if txn.node(node_id).is_none() {
            return Err(Error::NotFound(format!("node {}", node_id)));
        }

        match txn.file(file_id).map(|f| f.checksum.clone()) {
            Some(recorded) => {
                if !digests_match(&recorded, &checksum) {
                    return Err(Error::ChecksumMismatch {
                        expected: recorded,
                        actual: checksum,
                    });
                }
            }
            None => {
                let upload = txn
                    .remove_upload(file_id)
                    .ok_or_else(|| Error::NotFound(format!("upload {}", file_id)))?;
                txn.insert_file(FileRecord {
                    file_id: file_id.clone(),
                    filename: upload.filename,
                    size: upload.size,
                    checksum: checksum.clone(),
                    replication_factor: upload.replication_factor,
                    created_at: now,
                })?;
                tracing::info!(file_id = %file_id, node_id = %node_id, "File created on first confirmation");
            }
        }

        if txn.replica(file_id, node_id).is_some() {
            txn.mark_replica_verified(file_id, node_id, now)?;
            return Ok(false);
        }
        txn.insert_replica(ReplicaRecord::new(file_id, node_id, now))?;
        Ok(true)
    })
}

/// Download locations: active replicas on active nodes
pub fn locate_download(store: &MetadataStore, file_id: &str) -> Result<DownloadPlan> {
    store.read(|t| {
        let file = t
            .file(file_id)
            .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;
        let download_nodes: Vec<DownloadTarget> = t
            .active_replicas_of(file_id)
            .filter_map(|r| t.node(&r.node_id))
            .map(|n| DownloadTarget {
                node_id: n.node_id.clone(),
                download_url: format!("{}/download/{}", n.address.trim_end_matches('/'), file_id),
            })
            .collect();
        if download_nodes.is_empty() {
            return Err(Error::FileUnavailable(file_id.to_string()));
        }
        Ok(DownloadPlan {
            file_id: file.file_id.clone(),
            filename: file.filename.clone(),
            file_size: file.size,
            checksum: file.checksum.clone(),
            download_nodes,
        })
    })
}

pub fn file_detail(tables: &Tables, file_id: &str) -> Result<FileDetail> {
    let file = tables
        .file(file_id)
        .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;
    let replicas = tables
        .replicas_of(file_id)
        .map(|r| {
            let node = tables.node(&r.node_id);
            ReplicaView {
                node_id: r.node_id.clone(),
                node_address: node.map(|n| n.address.clone()),
                node_status: node.map(|n| n.status).unwrap_or_default(),
                status: r.status,
                path: r.path.clone(),
                created_at: r.created_at,
                last_verified: r.last_verified,
            }
        })
        .collect();
    Ok(FileDetail {
        file: file.clone(),
        active_replicas: tables.active_replicas_of(file_id).count(),
        replicas,
    })
}

pub fn list_files(tables: &Tables, limit: usize, offset: usize) -> FileListing {
    let files = tables
        .files()
        .skip(offset)
        .take(limit)
        .map(|f| FileSummary {
            file_id: f.file_id.clone(),
            filename: f.filename.clone(),
            size: f.size,
            replication_factor: f.replication_factor,
            active_replicas: tables.active_replicas_of(&f.file_id).count(),
            created_at: f.created_at,
        })
        .collect();
    FileListing {
        files,
        total: tables.file_count(),
        limit,
        offset,
    }
}

pub fn cluster_stats(tables: &Tables) -> ClusterStats {
    let mut stats = ClusterStats::default();
    for node in tables.nodes() {
        stats.total_nodes += 1;
        match node.status {
            NodeStatus::Active => stats.active_nodes += 1,
            NodeStatus::Inactive => stats.inactive_nodes += 1,
            NodeStatus::Unknown => {}
        }
    }
    for file in tables.files() {
        stats.total_files += 1;
        stats.total_size_bytes += file.size;
        if let Some(health) = tables.health(&file.file_id) {
            if health.is_unavailable() {
                stats.unavailable_files += 1;
            } else if health.is_under_replicated() {
                stats.under_replicated_files += 1;
            }
        }
    }
    stats
}
