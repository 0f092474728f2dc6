//! Metadata store
//!
//! Holds the relations every coordinator unit works from:
//! - Nodes (node_id → address, status, last heartbeat, free capacity)
//! - Files (file_id → name, size, checksum, desired replication factor)
//! - Replicas ((file_id, node_id) → storage path, status)
//! - Recovery history (sequence → entry, owned by the scheduler)
//!
//! State is served from memory behind a single lock. When opened on disk,
//! every committed write is mirrored to RocksDB and reloaded on open.

use crate::common::{Error, NodeStatus, ReplicaStatus, Result};
use crate::coordinator::node_client::NodeEndpoint;
use parking_lot::RwLock;
use rocksdb::{ColumnFamily, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::path::Path;

const CF_NODES: &str = "nodes";
const CF_FILES: &str = "files";
const CF_REPLICAS: &str = "replicas";
const CF_HISTORY: &str = "history";

/// Storage node registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub address: String,
    pub status: NodeStatus,
    pub last_heartbeat: u64,
    pub available_bytes: u64,
    pub file_count: u64,
    pub registered_at: u64,
}

impl NodeRecord {
    pub fn endpoint(&self) -> NodeEndpoint {
        NodeEndpoint {
            node_id: self.node_id.clone(),
            address: self.address.clone(),
        }
    }
}

/// File metadata; checksum and replication factor never change once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub filename: String,
    pub size: u64,
    pub checksum: String,
    pub replication_factor: usize,
    pub created_at: u64,
}

/// One stored copy of a file on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaRecord {
    pub file_id: String,
    pub node_id: String,
    pub path: String,
    pub status: ReplicaStatus,
    pub created_at: u64,
    pub last_verified: Option<u64>,
}

impl ReplicaRecord {
    pub fn new(file_id: &str, node_id: &str, now: u64) -> Self {
        Self {
            file_id: file_id.to_string(),
            node_id: node_id.to_string(),
            path: replica_path(file_id),
            status: ReplicaStatus::Active,
            created_at: now,
            last_verified: Some(now),
        }
    }
}

/// Location of a file inside a storage node's blob directory
pub fn replica_path(file_id: &str) -> String {
    format!("blobs/{}", file_id)
}

/// Upload assignment waiting for its first confirmation (memory only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpload {
    pub file_id: String,
    pub filename: String,
    pub size: u64,
    pub replication_factor: usize,
    pub nodes: Vec<String>,
    pub requested_at: u64,
}

/// Replica counts for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaHealth {
    pub desired: usize,
    /// Replicas that are active and hosted on an active node
    pub active: usize,
    /// Corrupted replicas on active nodes, the ones a recovery can rewrite
    pub corrupted: usize,
    pub total: usize,
}

impl ReplicaHealth {
    pub fn is_unavailable(&self) -> bool {
        self.active == 0
    }

    pub fn is_under_replicated(&self) -> bool {
        self.active < self.desired
    }

    pub fn needs_recovery(&self) -> bool {
        self.is_under_replicated() || self.corrupted > 0
    }
}

/// In-memory view of the relations
#[derive(Debug, Default)]
pub struct Tables {
    nodes: BTreeMap<String, NodeRecord>,
    files: BTreeMap<String, FileRecord>,
    replicas: BTreeMap<String, BTreeMap<String, ReplicaRecord>>,
    uploads: HashMap<String, PendingUpload>,
}

impl Tables {
    // === Node reads ===

    pub fn node(&self, node_id: &str) -> Option<&NodeRecord> {
        self.nodes.get(node_id)
    }

    /// Nodes ordered by id
    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> + '_ {
        self.nodes.values()
    }

    pub fn active_nodes(&self) -> impl Iterator<Item = &NodeRecord> + '_ {
        self.nodes.values().filter(|n| n.status.is_active())
    }

    pub fn is_node_active(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .is_some_and(|n| n.status.is_active())
    }

    // === File reads ===

    pub fn file(&self, file_id: &str) -> Option<&FileRecord> {
        self.files.get(file_id)
    }

    /// Files ordered by id
    pub fn files(&self) -> impl Iterator<Item = &FileRecord> + '_ {
        self.files.values()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    // === Replica reads ===

    pub fn replica(&self, file_id: &str, node_id: &str) -> Option<&ReplicaRecord> {
        self.replicas.get(file_id).and_then(|m| m.get(node_id))
    }

    /// All replica rows of a file, ordered by node id
    pub fn replicas_of(&self, file_id: &str) -> impl Iterator<Item = &ReplicaRecord> + '_ {
        self.replicas
            .get(file_id)
            .into_iter()
            .flat_map(|m| m.values())
    }

    /// Replicas counted towards the active replica count
    pub fn active_replicas_of(&self, file_id: &str) -> impl Iterator<Item = &ReplicaRecord> + '_ {
        self.replicas_of(file_id)
            .filter(move |r| r.status == ReplicaStatus::Active && self.is_node_active(&r.node_id))
    }

    /// Ids of files with a replica row on this node
    pub fn files_on_node(&self, node_id: &str) -> Vec<String> {
        self.replicas
            .iter()
            .filter(|(_, by_node)| by_node.contains_key(node_id))
            .map(|(file_id, _)| file_id.clone())
            .collect()
    }

    pub fn health(&self, file_id: &str) -> Option<ReplicaHealth> {
        let file = self.files.get(file_id)?;
        let mut health = ReplicaHealth {
            desired: file.replication_factor,
            active: 0,
            corrupted: 0,
            total: 0,
        };
        for replica in self.replicas_of(file_id) {
            health.total += 1;
            match replica.status {
                ReplicaStatus::Corrupted if self.is_node_active(&replica.node_id) => {
                    health.corrupted += 1
                }
                ReplicaStatus::Corrupted => {}
                ReplicaStatus::Active if self.is_node_active(&replica.node_id) => {
                    health.active += 1
                }
                ReplicaStatus::Active => {}
            }
        }
        Some(health)
    }

    // === Upload reads ===

    pub fn upload(&self, file_id: &str) -> Option<&PendingUpload> {
        self.uploads.get(file_id)
    }
}

enum Undo {
    Node(String, Option<NodeRecord>),
    File(String, Option<FileRecord>),
    Replica(String, String, Option<ReplicaRecord>),
    Upload(String, Option<PendingUpload>),
}

/// A write transaction: all changes apply together or not at all
pub struct Txn<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
}

impl Deref for Txn<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        self.tables
    }
}

impl Txn<'_> {
    /// Create or replace a node record
    pub fn put_node(&mut self, node: NodeRecord) {
        let id = node.node_id.clone();
        let prev = self.tables.nodes.insert(id.clone(), node);
        self.undo.push(Undo::Node(id, prev));
    }

    pub fn set_node_status(&mut self, node_id: &str, status: NodeStatus) -> Result<()> {
        let mut node = self
            .tables
            .nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("node {}", node_id)))?;
        node.status = status;
        self.put_node(node);
        Ok(())
    }

    /// Create a file record; existing files are immutable
    pub fn insert_file(&mut self, file: FileRecord) -> Result<()> {
        if self.tables.files.contains_key(&file.file_id) {
            return Err(Error::InvalidRequest(format!(
                "file {} already exists",
                file.file_id
            )));
        }
        let id = file.file_id.clone();
        self.tables.files.insert(id.clone(), file);
        self.undo.push(Undo::File(id, None));
        Ok(())
    }

    /// Insert a replica row, enforcing one replica per (file, node)
    pub fn insert_replica(&mut self, replica: ReplicaRecord) -> Result<()> {
        if !self.tables.files.contains_key(&replica.file_id) {
            return Err(Error::NotFound(format!("file {}", replica.file_id)));
        }
        if self.replica(&replica.file_id, &replica.node_id).is_some() {
            return Err(Error::DuplicateReplica {
                file_id: replica.file_id,
                node_id: replica.node_id,
            });
        }
        let (file_id, node_id) = (replica.file_id.clone(), replica.node_id.clone());
        self.tables
            .replicas
            .entry(file_id.clone())
            .or_default()
            .insert(node_id.clone(), replica);
        self.undo.push(Undo::Replica(file_id, node_id, None));
        Ok(())
    }

    fn update_replica(
        &mut self,
        file_id: &str,
        node_id: &str,
        apply: impl FnOnce(&mut ReplicaRecord),
    ) -> Result<()> {
        let slot = self
            .tables
            .replicas
            .get_mut(file_id)
            .and_then(|m| m.get_mut(node_id))
            .ok_or_else(|| Error::NotFound(format!("replica {} on {}", file_id, node_id)))?;
        let prev = slot.clone();
        apply(slot);
        self.undo.push(Undo::Replica(
            file_id.to_string(),
            node_id.to_string(),
            Some(prev),
        ));
        Ok(())
    }

    pub fn set_replica_status(
        &mut self,
        file_id: &str,
        node_id: &str,
        status: ReplicaStatus,
    ) -> Result<()> {
        self.update_replica(file_id, node_id, |r| r.status = status)
    }

    /// Record a successful checksum verification of a replica
    pub fn mark_replica_verified(&mut self, file_id: &str, node_id: &str, at: u64) -> Result<()> {
        self.update_replica(file_id, node_id, |r| {
            r.status = ReplicaStatus::Active;
            r.last_verified = Some(at);
        })
    }

    pub fn put_upload(&mut self, upload: PendingUpload) {
        let id = upload.file_id.clone();
        let prev = self.tables.uploads.insert(id.clone(), upload);
        self.undo.push(Undo::Upload(id, prev));
    }

    pub fn remove_upload(&mut self, file_id: &str) -> Option<PendingUpload> {
        let prev = self.tables.uploads.remove(file_id)?;
        self.undo
            .push(Undo::Upload(file_id.to_string(), Some(prev.clone())));
        Some(prev)
    }

    fn rollback(self) {
        for undo in self.undo.into_iter().rev() {
            match undo {
                Undo::Node(id, prev) => match prev {
                    Some(node) => {
                        self.tables.nodes.insert(id, node);
                    }
                    None => {
                        self.tables.nodes.remove(&id);
                    }
                },
                Undo::File(id, prev) => match prev {
                    Some(file) => {
                        self.tables.files.insert(id, file);
                    }
                    None => {
                        self.tables.files.remove(&id);
                    }
                },
                Undo::Upload(id, prev) => match prev {
                    Some(upload) => {
                        self.tables.uploads.insert(id, upload);
                    }
                    None => {
                        self.tables.uploads.remove(&id);
                    }
                },
                Undo::Replica(file_id, node_id, prev) => {
                    let by_node = self.tables.replicas.entry(file_id.clone()).or_default();
                    match prev {
                        Some(replica) => {
                            by_node.insert(node_id, replica);
                        }
                        None => {
                            by_node.remove(&node_id);
                        }
                    }
                    if by_node.is_empty() {
                        self.tables.replicas.remove(&file_id);
                    }
                }
            }
        }
    }
}

fn replica_key(file_id: &str, node_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(file_id.len() + node_id.len() + 1);
    key.extend_from_slice(file_id.as_bytes());
    key.push(0);
    key.extend_from_slice(node_id.as_bytes());
    key
}

/// Metadata store
pub struct MetadataStore {
    tables: RwLock<Tables>,
    db: Option<DB>,
}

impl MetadataStore {
    /// Non-persistent store
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            db: None,
        }
    }

    /// Open or create a persistent store and load its contents
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(
            &opts,
            path,
            vec![CF_NODES, CF_FILES, CF_REPLICAS, CF_HISTORY],
        )?;

        let mut tables = Tables::default();
        for node in scan::<NodeRecord>(&db, CF_NODES)? {
            tables.nodes.insert(node.node_id.clone(), node);
        }
        for file in scan::<FileRecord>(&db, CF_FILES)? {
            tables.files.insert(file.file_id.clone(), file);
        }
        for replica in scan::<ReplicaRecord>(&db, CF_REPLICAS)? {
            tables
                .replicas
                .entry(replica.file_id.clone())
                .or_default()
                .insert(replica.node_id.clone(), replica);
        }

        tracing::info!(
            nodes = tables.nodes.len(),
            files = tables.files.len(),
            "Loaded metadata store"
        );

        Ok(Self {
            tables: RwLock::new(tables),
            db: Some(db),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }

    /// Run a read-only view over a consistent snapshot
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        f(&self.tables.read())
    }

    /// Run a read-modify-write step atomically.
    ///
    /// Other units never observe a partial update: the write lock is held for the
    /// whole closure, and an `Err` rolls every change back.
    pub fn write<T>(&self, f: impl FnOnce(&mut Txn<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.tables.write();
        let mut txn = Txn {
            tables: &mut *guard,
            undo: Vec::new(),
        };
        match f(&mut txn) {
            Ok(value) => {
                if let Err(e) = self.persist(&txn) {
                    txn.rollback();
                    return Err(e);
                }
                Ok(value)
            }
            Err(e) => {
                txn.rollback();
                Err(e)
            }
        }
    }

    fn persist(&self, txn: &Txn<'_>) -> Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let mut batch = WriteBatch::default();
        for undo in &txn.undo {
            match undo {
                Undo::Node(id, _) => {
                    let cf = handle(db, CF_NODES)?;
                    match txn.tables.nodes.get(id) {
                        Some(node) => batch.put_cf(cf, id.as_bytes(), bincode::serialize(node)?),
                        None => batch.delete_cf(cf, id.as_bytes()),
                    }
                }
                Undo::File(id, _) => {
                    let cf = handle(db, CF_FILES)?;
                    match txn.tables.files.get(id) {
                        Some(file) => batch.put_cf(cf, id.as_bytes(), bincode::serialize(file)?),
                        None => batch.delete_cf(cf, id.as_bytes()),
                    }
                }
                Undo::Replica(file_id, node_id, _) => {
                    let cf = handle(db, CF_REPLICAS)?;
                    let key = replica_key(file_id, node_id);
                    match txn.tables.replica(file_id, node_id) {
                        Some(replica) => batch.put_cf(cf, key, bincode::serialize(replica)?),
                        None => batch.delete_cf(cf, key),
                    }
                }
                Undo::Upload(..) => {}
            }
        }
        db.write(batch)?;
        Ok(())
    }

    // === History operations ===

    /// Persist one history entry under its sequence number
    pub fn put_history<T: Serialize>(&self, seq: u64, entry: &T) -> Result<()> {
        if let Some(db) = &self.db {
            let cf = handle(db, CF_HISTORY)?;
            db.put_cf(cf, seq.to_be_bytes(), bincode::serialize(entry)?)?;
        }
        Ok(())
    }

    pub fn delete_history(&self, seq: u64) -> Result<()> {
        if let Some(db) = &self.db {
            let cf = handle(db, CF_HISTORY)?;
            db.delete_cf(cf, seq.to_be_bytes())?;
        }
        Ok(())
    }

    /// Persisted history entries, oldest first
    pub fn load_history<T: DeserializeOwned>(&self) -> Result<Vec<(u64, T)>> {
        let Some(db) = &self.db else {
            return Ok(Vec::new());
        };
        let cf = handle(db, CF_HISTORY)?;
        let mut entries = Vec::new();
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let seq_bytes = <[u8; 8]>::try_from(&key[..])
                .map_err(|_| Error::MetadataCorrupted("invalid history key".into()))?;
            entries.push((u64::from_be_bytes(seq_bytes), bincode::deserialize(&value)?));
        }
        Ok(entries)
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        if let Some(db) = &self.db {
            db.flush()?;
        }
        Ok(())
    }
}

fn handle<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| Error::Internal(format!("missing column family {}", name)))
}

fn scan<T: DeserializeOwned>(db: &DB, name: &str) -> Result<Vec<T>> {
    let cf = handle(db, name)?;
    let mut rows = Vec::new();
    for item in db.iterator_cf(cf, IteratorMode::Start) {
        let (_, value) = item?;
        rows.push(bincode::deserialize(&value)?);
    }
    Ok(rows)
}
