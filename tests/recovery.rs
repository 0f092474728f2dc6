//! Recovery scheduler scenarios against a simulated cluster

use minidfs::common::{sha256_hex, NodeStatus, RecoveryConfig, ReplicaStatus};
use minidfs::coordinator::events::ClusterEvent;
use minidfs::coordinator::metadata::{FileRecord, MetadataStore, NodeRecord, ReplicaRecord};
use minidfs::coordinator::node_client::InMemoryNodes;
use minidfs::recovery::{Lane, Priority, RecoveryScheduler, StrategyKind, TaskStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const DATA: &[u8] = b"the only copy that matters";

struct Cluster {
    store: Arc<MetadataStore>,
    nodes: Arc<InMemoryNodes>,
    scheduler: Arc<RecoveryScheduler>,
    clock: Arc<AtomicU64>,
}

impl Cluster {
    fn new(config: RecoveryConfig, node_states: &[(&str, NodeStatus)]) -> Self {
        let store = Arc::new(MetadataStore::in_memory());
        let nodes = Arc::new(InMemoryNodes::new());
        let clock = Arc::new(AtomicU64::new(10_000));
        let ticks = Arc::clone(&clock);
        let scheduler = RecoveryScheduler::new(Arc::clone(&store), nodes.clone(), config)
            .unwrap()
            .with_clock(Arc::new(move || ticks.load(Ordering::SeqCst)));

        store
            .write(|txn| {
                for (id, status) in node_states {
                    txn.put_node(NodeRecord {
                        node_id: id.to_string(),
                        address: format!("http://{}:8001", id),
                        status: *status,
                        last_heartbeat: 10_000,
                        available_bytes: 1 << 30,
                        file_count: 0,
                        registered_at: 0,
                    });
                }
                Ok(())
            })
            .unwrap();

        Self {
            store,
            nodes,
            scheduler: Arc::new(scheduler),
            clock,
        }
    }

    fn add_file(&self, file_id: &str, factor: usize, hosts: &[&str]) {
        self.store
            .write(|txn| {
                txn.insert_file(FileRecord {
                    file_id: file_id.to_string(),
                    filename: format!("{}.dat", file_id),
                    size: DATA.len() as u64,
                    checksum: sha256_hex(DATA),
                    replication_factor: factor,
                    created_at: 0,
                })?;
                for host in hosts {
                    txn.insert_replica(ReplicaRecord::new(file_id, host, 0))?;
                }
                Ok(())
            })
            .unwrap();
        for host in hosts {
            self.nodes.put(host, file_id, DATA);
        }
    }

    fn set_time(&self, now: u64) {
        self.clock.store(now, Ordering::SeqCst);
    }

    async fn run(&self, lane: Lane) -> usize {
        let handles = self.scheduler.dispatch(lane);
        let started = handles.len();
        for handle in handles {
            handle.await.unwrap();
        }
        started
    }

    fn active(&self, file_id: &str) -> usize {
        self.store.read(|t| t.health(file_id)).unwrap().active
    }
}

#[tokio::test]
async fn test_disaster_recovery_from_inactive_node() {
    let cluster = Cluster::new(
        RecoveryConfig::default(),
        &[
            ("node-a", NodeStatus::Inactive),
            ("node-b", NodeStatus::Inactive),
            ("node-c", NodeStatus::Active),
            ("node-d", NodeStatus::Active),
        ],
    );
    cluster.add_file("file-1", 2, &["node-a", "node-b"]);
    // node-a is really gone; node-b stopped heartbeating but still serves reads
    cluster.nodes.set_reachable("node-a", false);

    assert_eq!(cluster.scheduler.enqueue("file-1"), Some(Priority::Critical));
    assert_eq!(cluster.run(Lane::FastPath).await, 1);

    assert_eq!(cluster.active("file-1"), 2);
    assert!(cluster.nodes.has("node-c", "file-1"));
    assert!(cluster.nodes.has("node-d", "file-1"));

    let history = cluster.scheduler.history(1);
    assert_eq!(history[0].strategy, StrategyKind::DisasterRecovery);
    assert_eq!(history[0].priority, Priority::Critical);
    assert!(history[0].success);
    assert_eq!(cluster.scheduler.stats().history.critical_recoveries, 1);
}

#[tokio::test]
async fn test_disaster_recovery_after_host_returns_during_backoff() {
    let cluster = Cluster::new(
        RecoveryConfig::default(),
        &[
            ("node-a", NodeStatus::Inactive),
            ("node-b", NodeStatus::Inactive),
            ("node-c", NodeStatus::Active),
            ("node-d", NodeStatus::Active),
        ],
    );
    cluster.add_file("file-1", 2, &["node-a", "node-b"]);
    cluster.nodes.set_reachable("node-a", false);
    cluster.nodes.set_reachable("node-b", false);

    cluster.scheduler.enqueue("file-1");
    assert_eq!(cluster.run(Lane::FastPath).await, 1);

    // No copy reachable: the task backs off instead of giving up
    assert!(!cluster.scheduler.is_parked("file-1"));
    let task = cluster.scheduler.task("file-1").unwrap();
    assert_eq!(task.attempts, 1);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.eligible_at, 10_300);
    assert_eq!(task.tier, Priority::Critical);
    let history = cluster.scheduler.history(10);
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert!(history[0].error.as_deref().unwrap_or("").contains("exhausted"));

    // node-b answers again while the coordinator still counts it inactive
    cluster.nodes.set_reachable("node-b", true);
    cluster.set_time(10_299);
    assert_eq!(cluster.scheduler.reassess(), 0);
    assert_eq!(cluster.run(Lane::FastPath).await, 0);

    cluster.set_time(10_300);
    assert_eq!(cluster.run(Lane::FastPath).await, 1);
    assert_eq!(cluster.active("file-1"), 2);
    assert!(cluster.scheduler.task("file-1").is_none());

    let history = cluster.scheduler.history(10);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].strategy, StrategyKind::DisasterRecovery);
    assert!(history[1].success);
    assert_eq!(history[1].attempts, 2);
}

#[tokio::test]
async fn test_disaster_recovery_parks_file_at_attempt_cap() {
    let cluster = Cluster::new(
        RecoveryConfig {
            max_attempts: Some(2),
            ..RecoveryConfig::default()
        },
        &[("node-a", NodeStatus::Inactive), ("node-c", NodeStatus::Active)],
    );
    cluster.add_file("file-1", 1, &["node-a"]);
    cluster.nodes.corrupt_stored("node-a", "file-1");

    cluster.scheduler.enqueue("file-1");
    cluster.run(Lane::FastPath).await;
    assert!(!cluster.scheduler.is_parked("file-1"));
    assert_eq!(cluster.scheduler.task("file-1").unwrap().eligible_at, 10_300);

    cluster.set_time(10_300);
    cluster.run(Lane::FastPath).await;
    assert!(cluster.scheduler.is_parked("file-1"));
    assert!(cluster.scheduler.queue().is_empty());
    let history = cluster.scheduler.history(10);
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| !h.success));

    // Parked files are skipped by the safety sweep until forced
    assert_eq!(cluster.scheduler.reassess(), 0);
    cluster.scheduler.force_recovery("file-1").unwrap();
    assert_eq!(
        cluster.scheduler.task("file-1").map(|t| t.tier),
        Some(Priority::Critical)
    );
}

#[tokio::test]
async fn test_corruption_on_lost_node_waits_for_its_return() {
    let cluster = Cluster::new(
        RecoveryConfig::default(),
        &[
            ("node-a", NodeStatus::Active),
            ("node-b", NodeStatus::Active),
            ("node-x", NodeStatus::Inactive),
        ],
    );
    cluster.add_file("file-1", 2, &["node-a", "node-b", "node-x"]);
    cluster.nodes.corrupt_stored("node-x", "file-1");
    cluster
        .store
        .write(|txn| txn.set_replica_status("file-1", "node-x", ReplicaStatus::Corrupted))
        .unwrap();

    // Nothing a plan could rewrite while node-x is down
    assert_eq!(cluster.scheduler.enqueue("file-1"), None);
    assert_eq!(cluster.scheduler.reassess(), 0);
    assert!(cluster.scheduler.queue().is_empty());

    cluster
        .store
        .write(|txn| txn.set_node_status("node-x", NodeStatus::Active))
        .unwrap();
    cluster.scheduler.handle_event(&ClusterEvent::NodeRecovered {
        node_id: "node-x".into(),
        files: vec!["file-1".into()],
    });
    let task = cluster.scheduler.task("file-1").unwrap();
    assert_eq!(task.tier, Priority::Medium);
    assert_eq!(task.strategy, StrategyKind::ReplaceCorrupted);

    assert_eq!(cluster.run(Lane::Main).await, 1);
    assert_eq!(cluster.store.read(|t| t.health("file-1")).unwrap().corrupted, 0);
    assert_eq!(cluster.nodes.get("node-x", "file-1").unwrap(), DATA);
    assert!(cluster.scheduler.queue().is_empty());
}

#[tokio::test]
async fn test_corrupted_store_is_retried_with_backoff() {
    let cluster = Cluster::new(
        RecoveryConfig::default(),
        &[("node-a", NodeStatus::Active), ("node-b", NodeStatus::Active)],
    );
    cluster.add_file("file-1", 2, &["node-a"]);
    cluster.nodes.corrupt_next_stores("node-b", 1);

    assert_eq!(cluster.scheduler.enqueue("file-1"), Some(Priority::High));
    cluster.run(Lane::FastPath).await;

    // The damaged copy was not recorded
    assert!(!cluster.store.read(|t| t.replica("file-1", "node-b").is_some()));
    let task = cluster.scheduler.task("file-1").unwrap();
    assert_eq!(task.attempts, 1);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.eligible_at, 10_300);
    assert!(task.last_error.unwrap().contains("Checksum mismatch"));

    cluster.set_time(10_299);
    assert_eq!(cluster.run(Lane::FastPath).await, 0);

    cluster.set_time(10_300);
    assert_eq!(cluster.run(Lane::FastPath).await, 1);
    assert_eq!(cluster.active("file-1"), 2);
    assert_eq!(cluster.nodes.get("node-b", "file-1").unwrap(), DATA);

    let stats = cluster.scheduler.stats();
    assert_eq!(stats.history.total_recoveries, 2);
    assert_eq!(stats.history.successful_recoveries, 1);
    assert_eq!(stats.history.success_rate, 50.0);
    assert_eq!(stats.queue_length, 0);
}

#[tokio::test]
async fn test_backoff_delays_double_up_to_cap() {
    let cluster = Cluster::new(
        RecoveryConfig::default(),
        &[("node-a", NodeStatus::Active), ("node-b", NodeStatus::Active)],
    );
    cluster.add_file("file-1", 2, &["node-a"]);
    cluster.nodes.corrupt_next_stores("node-b", 10);
    cluster.scheduler.enqueue("file-1");

    let mut now = 10_000;
    let mut delays = Vec::new();
    for _ in 0..6 {
        cluster.set_time(now);
        assert_eq!(cluster.run(Lane::Main).await, 1);
        let next = cluster.scheduler.task("file-1").unwrap().eligible_at;
        delays.push(next - now);
        now = next;
    }
    assert_eq!(delays, vec![300, 600, 1200, 2400, 3600, 3600]);
}

#[tokio::test]
async fn test_urgent_files_dispatched_first() {
    let cluster = Cluster::new(
        RecoveryConfig {
            max_concurrent_recoveries: 1,
            ..RecoveryConfig::default()
        },
        &[
            ("node-a", NodeStatus::Active),
            ("node-b", NodeStatus::Active),
            ("node-c", NodeStatus::Active),
            ("node-x", NodeStatus::Inactive),
        ],
    );
    // Normal: 2 of 3 live
    cluster.add_file("file-normal", 3, &["node-a", "node-b"]);
    // Medium: corrupted copy, enough live ones
    cluster.add_file("file-medium", 2, &["node-a", "node-b", "node-c"]);
    cluster
        .store
        .write(|txn| txn.set_replica_status("file-medium", "node-c", ReplicaStatus::Corrupted))
        .unwrap();
    // High: 1 live copy left
    cluster.add_file("file-high", 2, &["node-a", "node-x"]);

    cluster.scheduler.enqueue("file-normal");
    cluster.set_time(10_001);
    cluster.scheduler.enqueue("file-medium");
    cluster.set_time(10_002);
    cluster.scheduler.enqueue("file-high");

    let order: Vec<String> = cluster
        .scheduler
        .queue()
        .into_iter()
        .map(|t| t.file_id)
        .collect();
    assert_eq!(order, vec!["file-high", "file-medium", "file-normal"]);

    let summary = cluster.scheduler.queue_summary();
    assert_eq!((summary.high, summary.medium, summary.normal), (1, 1, 1));

    // Fast path ignores everything below HIGH
    assert_eq!(cluster.run(Lane::FastPath).await, 1);
    assert_eq!(cluster.run(Lane::FastPath).await, 0);

    assert_eq!(cluster.run(Lane::Main).await, 1);
    assert!(cluster.scheduler.task("file-medium").is_none());
    assert_eq!(cluster.run(Lane::Main).await, 1);
    assert!(cluster.scheduler.queue().is_empty());
}

#[tokio::test]
async fn test_history_persists_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta");
    {
        let store = Arc::new(MetadataStore::open(&path).unwrap());
        let nodes = Arc::new(InMemoryNodes::new());
        store
            .write(|txn| {
                for id in ["node-a", "node-b"] {
                    txn.put_node(NodeRecord {
                        node_id: id.into(),
                        address: format!("http://{}:8001", id),
                        status: NodeStatus::Active,
                        last_heartbeat: 0,
                        available_bytes: 100,
                        file_count: 0,
                        registered_at: 0,
                    });
                }
                txn.insert_file(FileRecord {
                    file_id: "file-1".into(),
                    filename: "a.dat".into(),
                    size: DATA.len() as u64,
                    checksum: sha256_hex(DATA),
                    replication_factor: 2,
                    created_at: 0,
                })?;
                txn.insert_replica(ReplicaRecord::new("file-1", "node-a", 0))
            })
            .unwrap();
        nodes.put("node-a", "file-1", DATA);

        let scheduler = Arc::new(
            RecoveryScheduler::new(Arc::clone(&store), nodes, RecoveryConfig::default()).unwrap(),
        );
        scheduler.enqueue("file-1");
        for handle in scheduler.dispatch(Lane::Main) {
            handle.await.unwrap();
        }
        assert_eq!(scheduler.history(10).len(), 1);
        store.flush().unwrap();
    }

    let store = Arc::new(MetadataStore::open(&path).unwrap());
    let scheduler = RecoveryScheduler::new(
        Arc::clone(&store),
        Arc::new(InMemoryNodes::new()),
        RecoveryConfig::default(),
    )
    .unwrap();
    let history = scheduler.history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].file_id, "file-1");
    assert!(history[0].success);
    assert_eq!(store.read(|t| t.health("file-1")).unwrap().active, 2);
}
