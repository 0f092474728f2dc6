//! Storage node client
//!
//! The coordinator never touches file bytes itself except while moving a
//! replica between nodes. [`NodeTransport`] is that boundary: the HTTP client
//! talks to real storage nodes, [`InMemoryNodes`] simulates a cluster in-process.

use crate::common::{sha256_hex, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Where to reach a storage node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub node_id: String,
    pub address: String,
}

/// Bytes read from a node, with the digest computed over what was received
#[derive(Debug, Clone)]
pub struct FetchedBlob {
    pub data: Bytes,
    pub digest: String,
}

/// Node's confirmation of a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReceipt {
    /// Digest of the bytes as stored on the node
    pub digest: String,
    pub size: u64,
}

/// Liveness probe result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub available_bytes: u64,
    pub file_count: u64,
}

#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Read a file from a node
    async fn fetch(&self, node: &NodeEndpoint, file_id: &str) -> Result<FetchedBlob>;

    /// Write a file to a node, replacing any existing copy
    async fn store(&self, node: &NodeEndpoint, file_id: &str, data: Bytes) -> Result<StoreReceipt>;

    /// Digest of a node's stored copy, without transferring it
    async fn verify(&self, node: &NodeEndpoint, file_id: &str) -> Result<String>;

    async fn probe(&self, node: &NodeEndpoint) -> Result<ProbeReport>;
}

// ============================================================================
// HTTP transport
// ============================================================================

#[derive(Debug, Deserialize)]
struct UploadReply {
    checksum: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct VerifyReply {
    checksum: String,
}

#[derive(Debug, Deserialize)]
struct HealthReply {
    #[serde(default)]
    available_space: u64,
    #[serde(default)]
    file_count: u64,
}

/// Talks to storage nodes over their HTTP API
pub struct HttpNodeClient {
    client: reqwest::Client,
}

impl HttpNodeClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn url(node: &NodeEndpoint, path: &str) -> String {
        format!("{}/{}", node.address.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        node: &NodeEndpoint,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| classify(node, e))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("{} on {}", what, node.node_id)));
        }
        if !status.is_success() {
            return Err(Error::TransferFailed(format!(
                "{} on {} returned {}",
                what, node.node_id, status
            )));
        }
        Ok(response)
    }
}

fn classify(node: &NodeEndpoint, err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::NodeUnreachable {
            node: node.node_id.clone(),
            reason: err.to_string(),
        }
    } else {
        Error::TransferFailed(format!("{}: {}", node.node_id, err))
    }
}

#[async_trait]
impl NodeTransport for HttpNodeClient {
    async fn fetch(&self, node: &NodeEndpoint, file_id: &str) -> Result<FetchedBlob> {
        let url = Self::url(node, &format!("download/{}", file_id));
        let response = self.send(node, self.client.get(url), file_id).await?;
        let data = response.bytes().await.map_err(|e| classify(node, e))?;
        let digest = sha256_hex(&data);
        Ok(FetchedBlob { data, digest })
    }

    async fn store(&self, node: &NodeEndpoint, file_id: &str, data: Bytes) -> Result<StoreReceipt> {
        let len = data.len() as u64;
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(file_id.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = Self::url(node, &format!("upload/{}", file_id));
        let response = self
            .send(node, self.client.post(url).multipart(form), file_id)
            .await?;
        let reply: UploadReply = response
            .json()
            .await
            .map_err(|e| Error::TransferFailed(format!("{}: bad upload reply: {}", node.node_id, e)))?;
        Ok(StoreReceipt {
            digest: reply.checksum,
            size: reply.size.unwrap_or(len),
        })
    }

    async fn verify(&self, node: &NodeEndpoint, file_id: &str) -> Result<String> {
        let url = Self::url(node, &format!("verify/{}", file_id));
        let response = self.send(node, self.client.get(url), file_id).await?;
        let reply: VerifyReply = response
            .json()
            .await
            .map_err(|e| Error::TransferFailed(format!("{}: bad verify reply: {}", node.node_id, e)))?;
        Ok(reply.checksum)
    }

    async fn probe(&self, node: &NodeEndpoint) -> Result<ProbeReport> {
        let url = Self::url(node, "health");
        let response = self.send(node, self.client.get(url), "health").await?;
        let reply: HealthReply = response
            .json()
            .await
            .map_err(|e| Error::TransferFailed(format!("{}: bad health reply: {}", node.node_id, e)))?;
        Ok(ProbeReport {
            available_bytes: reply.available_space,
            file_count: reply.file_count,
        })
    }
}

// ============================================================================
// In-process transport
// ============================================================================

#[derive(Default)]
struct SimulatedCluster {
    blobs: HashMap<String, HashMap<String, Bytes>>,
    unreachable: HashSet<String>,
    corrupt_stores: HashMap<String, usize>,
    capacity: HashMap<String, u64>,
    stores: usize,
}

/// Storage nodes simulated in memory, keyed by node id.
///
/// Supports fault injection: nodes can be cut off, and writes to a node can be
/// made to land corrupted.
#[derive(Default)]
pub struct InMemoryNodes {
    state: Mutex<SimulatedCluster>,
}

impl InMemoryNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place bytes on a node directly
    pub fn put(&self, node_id: &str, file_id: &str, data: impl Into<Bytes>) {
        self.state
            .lock()
            .blobs
            .entry(node_id.to_string())
            .or_default()
            .insert(file_id.to_string(), data.into());
    }

    pub fn get(&self, node_id: &str, file_id: &str) -> Option<Bytes> {
        self.state
            .lock()
            .blobs
            .get(node_id)
            .and_then(|files| files.get(file_id))
            .cloned()
    }

    pub fn has(&self, node_id: &str, file_id: &str) -> bool {
        self.get(node_id, file_id).is_some()
    }

    pub fn set_reachable(&self, node_id: &str, reachable: bool) {
        let mut state = self.state.lock();
        if reachable {
            state.unreachable.remove(node_id);
        } else {
            state.unreachable.insert(node_id.to_string());
        }
    }

    pub fn set_capacity(&self, node_id: &str, bytes: u64) {
        self.state.lock().capacity.insert(node_id.to_string(), bytes);
    }

    /// The next `count` writes to this node store damaged bytes
    pub fn corrupt_next_stores(&self, node_id: &str, count: usize) {
        self.state
            .lock()
            .corrupt_stores
            .insert(node_id.to_string(), count);
    }

    /// Damage the copy already stored on a node
    pub fn corrupt_stored(&self, node_id: &str, file_id: &str) {
        let mut state = self.state.lock();
        if let Some(data) = state
            .blobs
            .get_mut(node_id)
            .and_then(|files| files.get_mut(file_id))
        {
            *data = damaged(data);
        }
    }

    /// Number of writes that reached a node
    pub fn store_count(&self) -> usize {
        self.state.lock().stores
    }

    fn check_reachable(state: &SimulatedCluster, node: &NodeEndpoint) -> Result<()> {
        if state.unreachable.contains(&node.node_id) {
            return Err(Error::NodeUnreachable {
                node: node.node_id.clone(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }
}

fn damaged(data: &Bytes) -> Bytes {
    let mut bytes = data.to_vec();
    match bytes.last_mut() {
        Some(last) => *last ^= 0xff,
        None => bytes.push(0xff),
    }
    Bytes::from(bytes)
}

#[async_trait]
impl NodeTransport for InMemoryNodes {
    async fn fetch(&self, node: &NodeEndpoint, file_id: &str) -> Result<FetchedBlob> {
        let state = self.state.lock();
        Self::check_reachable(&state, node)?;
        let data = state
            .blobs
            .get(&node.node_id)
            .and_then(|files| files.get(file_id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} on {}", file_id, node.node_id)))?;
        let digest = sha256_hex(&data);
        Ok(FetchedBlob { data, digest })
    }

    async fn store(&self, node: &NodeEndpoint, file_id: &str, data: Bytes) -> Result<StoreReceipt> {
        let mut state = self.state.lock();
        Self::check_reachable(&state, node)?;
        let data = match state.corrupt_stores.get_mut(&node.node_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                damaged(&data)
            }
            _ => data,
        };
        let receipt = StoreReceipt {
            digest: sha256_hex(&data),
            size: data.len() as u64,
        };
        state.stores += 1;
        state
            .blobs
            .entry(node.node_id.clone())
            .or_default()
            .insert(file_id.to_string(), data);
        Ok(receipt)
    }

    async fn verify(&self, node: &NodeEndpoint, file_id: &str) -> Result<String> {
        let blob = self.fetch(node, file_id).await?;
        Ok(blob.digest)
    }

    async fn probe(&self, node: &NodeEndpoint) -> Result<ProbeReport> {
        let state = self.state.lock();
        Self::check_reachable(&state, node)?;
        Ok(ProbeReport {
            available_bytes: state.capacity.get(&node.node_id).copied().unwrap_or(0),
            file_count: state
                .blobs
                .get(&node.node_id)
                .map(|files| files.len() as u64)
                .unwrap_or(0),
        })
    }
}
