//! Recovery scheduler
//!
//! Owns the recovery queue and history. Work arrives from cluster events and
//! from a periodic reassessment of every file; two dispatch lanes drain the
//! queue under a shared concurrency cap.

use crate::common::{timestamp_now, Error, RecoveryConfig, Result};
use crate::coordinator::events::{ClusterEvent, EventReceiver};
use crate::coordinator::metadata::{FileRecord, MetadataStore, ReplicaHealth};
use crate::coordinator::node_client::NodeTransport;
use crate::recovery::backoff::RetryPolicy;
use crate::recovery::history::{RecoveryHistory, RecoveryHistoryEntry, RecoveryStats};
use crate::recovery::priority::Priority;
use crate::recovery::queue::{RecoveryQueue, RecoveryTask, TaskStatus};
use crate::recovery::strategy::{self, RecoveryOutcome, RecoveryPlan, StrategyKind};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Source of the current time in unix seconds
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Dispatch lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Only HIGH and CRITICAL tasks, on a short interval
    FastPath,
    /// Everything, in queue order
    Main,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub file_id: String,
    pub priority: u8,
    pub tier: Priority,
    pub strategy: StrategyKind,
    pub status: TaskStatus,
    pub attempts: u32,
    pub enqueued_at: u64,
    pub eligible_at: u64,
    pub forced: bool,
    pub last_error: Option<String>,
}

impl From<RecoveryTask> for QueueEntry {
    fn from(task: RecoveryTask) -> Self {
        Self {
            priority: task.priority.value(),
            tier: task.priority,
            file_id: task.file_id,
            strategy: task.strategy,
            status: task.status,
            attempts: task.attempts,
            enqueued_at: task.enqueued_at,
            eligible_at: task.eligible_at,
            forced: task.forced,
            last_error: task.last_error,
        }
    }
}

/// Queue length by tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub total: usize,
    pub in_flight: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub normal: usize,
    /// Files that failed terminally and wait for an operator or a returning node
    pub parked: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    #[serde(flatten)]
    pub history: RecoveryStats,
    pub queue_length: usize,
    pub in_flight: usize,
    pub parked: usize,
}

struct SchedulerState {
    queue: RecoveryQueue,
    history: RecoveryHistory,
    parked: BTreeSet<String>,
}

pub struct RecoveryScheduler {
    store: Arc<MetadataStore>,
    transport: Arc<dyn NodeTransport>,
    config: RecoveryConfig,
    retry: RetryPolicy,
    clock: Clock,
    state: Mutex<SchedulerState>,
}

impl RecoveryScheduler {
    /// Create a scheduler, restoring any persisted history
    pub fn new(
        store: Arc<MetadataStore>,
        transport: Arc<dyn NodeTransport>,
        config: RecoveryConfig,
    ) -> Result<Self> {
        let persisted = store.load_history::<RecoveryHistoryEntry>()?;
        if !persisted.is_empty() {
            tracing::info!(entries = persisted.len(), "Restored recovery history");
        }
        let history = RecoveryHistory::restore(config.history_limit, persisted);

        Ok(Self {
            store,
            transport,
            retry: RetryPolicy::from_config(&config),
            config,
            clock: Arc::new(timestamp_now),
            state: Mutex::new(SchedulerState {
                queue: RecoveryQueue::new(),
                history,
                parked: BTreeSet::new(),
            }),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    fn assess(&self, file_id: &str) -> Option<ReplicaHealth> {
        self.store.read(|t| t.health(file_id))
    }

    // === Intake ===

    /// Queue a file if it needs recovery. Returns the priority it was queued at.
    pub fn enqueue(&self, file_id: &str) -> Option<Priority> {
        let health = self.assess(file_id)?;
        if !health.needs_recovery() {
            return None;
        }
        let now = self.now();
        let priority = Priority::for_health(&health);

        let mut state = self.state.lock();
        if state.parked.contains(file_id) {
            tracing::debug!(file_id, "File is parked, not queueing");
            return None;
        }
        if state
            .queue
            .push(file_id, priority, StrategyKind::for_health(&health), now)
        {
            tracing::info!(
                file_id,
                priority = priority.value(),
                active = health.active,
                desired = health.desired,
                "Queued recovery"
            );
        }
        Some(priority)
    }

    /// Operator request: queue at CRITICAL, eligible now, even if parked
    pub fn force_recovery(&self, file_id: &str) -> Result<Priority> {
        let health = self
            .assess(file_id)
            .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;
        let now = self.now();

        let mut state = self.state.lock();
        if state.parked.remove(file_id) {
            tracing::info!(file_id, "Unparked file for forced recovery");
        }
        state
            .queue
            .force(file_id, StrategyKind::for_health(&health), now);
        tracing::info!(file_id, "Forced recovery queued");
        Ok(Priority::Critical)
    }

    pub fn handle_event(&self, event: &ClusterEvent) {
        match event {
            ClusterEvent::NodeLost { node_id, files } => {
                tracing::warn!(node_id = %node_id, files = files.len(), "Node lost, queueing affected files");
                for file_id in files {
                    self.enqueue(file_id);
                }
            }
            ClusterEvent::NodeRecovered { node_id, files } => {
                {
                    let mut state = self.state.lock();
                    for file_id in files {
                        if state.parked.remove(file_id) {
                            tracing::info!(file_id = %file_id, node_id = %node_id, "Node returned, unparking file");
                        }
                    }
                }
                for file_id in files {
                    self.enqueue(file_id);
                }
            }
            ClusterEvent::FileEscalated { file_id } => {
                tracing::warn!(file_id = %file_id, "File escalated by reconciler");
                self.enqueue(file_id);
            }
            ClusterEvent::ReplicaCorrupted { file_id, node_id } => {
                tracing::warn!(file_id = %file_id, node_id = %node_id, "Corrupted replica reported");
                self.enqueue(file_id);
            }
        }
    }

    /// Consume cluster events until the channel closes or shutdown is signalled
    pub async fn run_events(
        self: Arc<Self>,
        mut events: EventReceiver,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(&event),
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!("Recovery event listener stopped");
    }

    /// Safety sweep: recompute the priority of every file. Degraded files not
    /// yet queued are added, pending tasks of healthy files are dropped.
    /// Returns how many new tasks were queued.
    pub fn reassess(&self) -> usize {
        let assessed: Vec<(String, ReplicaHealth)> = self.store.read(|t| {
            t.files()
                .filter_map(|f| t.health(&f.file_id).map(|h| (f.file_id.clone(), h)))
                .collect()
        });
        let now = self.now();

        let mut state = self.state.lock();
        let mut queued = 0;
        for (file_id, health) in assessed {
            if !health.needs_recovery() {
                state.queue.discard_pending(&file_id);
                state.parked.remove(&file_id);
                continue;
            }
            let priority = Priority::for_health(&health);
            let kind = StrategyKind::for_health(&health);
            if state.queue.contains(&file_id) {
                state.queue.reprioritize(&file_id, priority, kind);
            } else if !state.parked.contains(&file_id) {
                state.queue.push(&file_id, priority, kind, now);
                queued += 1;
            }
        }
        if queued > 0 {
            tracing::info!(queued, "Safety sweep queued files missed by events");
        }
        queued
    }

    // === Dispatch ===

    /// Start ready tasks on this lane, up to the free concurrency slots
    pub fn dispatch(self: &Arc<Self>, lane: Lane) -> Vec<JoinHandle<()>> {
        let now = self.now();
        let ready = {
            let mut state = self.state.lock();
            let free = self
                .config
                .max_concurrent_recoveries
                .saturating_sub(state.queue.in_flight());
            let min_priority = match lane {
                Lane::FastPath => Some(Priority::High),
                Lane::Main => None,
            };
            state.queue.take_ready(now, min_priority, free)
        };

        ready
            .into_iter()
            .map(|task| {
                let scheduler = Arc::clone(self);
                tokio::spawn(async move { scheduler.run_task(task).await })
            })
            .collect()
    }

    async fn run_task(&self, task: RecoveryTask) {
        let started = Instant::now();
        let (kind, result) = self.attempt(&task).await;
        self.complete(task, kind, result, started.elapsed());
    }

    async fn attempt(&self, task: &RecoveryTask) -> (StrategyKind, Result<RecoveryOutcome>) {
        let planned = self.store.read(|t| -> Result<(FileRecord, RecoveryPlan)> {
            let file = t
                .file(&task.file_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("file {}", task.file_id)))?;
            Ok((file, RecoveryPlan::select(t, &task.file_id)?))
        });
        let (file, plan) = match planned {
            Ok(planned) => planned,
            Err(e) => return (task.strategy, Err(e)),
        };

        let kind = plan.kind();
        tracing::info!(
            file_id = %task.file_id,
            strategy = %kind,
            priority = task.priority.value(),
            attempt = task.attempts + 1,
            "Starting recovery"
        );
        let result = strategy::execute(&self.store, self.transport.as_ref(), &file, plan).await;
        (kind, result)
    }

    fn complete(
        &self,
        task: RecoveryTask,
        kind: StrategyKind,
        result: Result<RecoveryOutcome>,
        elapsed: Duration,
    ) {
        let now = self.now();
        let filename = self
            .store
            .read(|t| t.file(&task.file_id).map(|f| f.filename.clone()))
            .unwrap_or_default();
        let entry = |success: bool, bytes: u64, error: Option<String>| RecoveryHistoryEntry {
            file_id: task.file_id.clone(),
            filename: filename.clone(),
            timestamp: Utc::now(),
            strategy: kind,
            priority: task.priority,
            success,
            elapsed_ms: elapsed.as_millis() as u64,
            attempts: task.attempts + 1,
            bytes_transferred: bytes,
            error,
        };

        let mut state = self.state.lock();
        let record = match result {
            Ok(_) if kind == StrategyKind::NoAction => {
                state.queue.finish(&task.file_id);
                tracing::debug!(file_id = %task.file_id, "Nothing left to recover");
                None
            }
            Ok(outcome) => {
                state.queue.finish(&task.file_id);
                tracing::info!(
                    file_id = %task.file_id,
                    strategy = %kind,
                    replicas = outcome.replicas_written,
                    bytes = outcome.bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Recovery succeeded"
                );
                Some(entry(true, outcome.bytes, None))
            }
            Err(e) if !e.counts_as_attempt() => {
                state
                    .queue
                    .retry(&task.file_id, task.attempts, now, Some(e.to_string()));
                tracing::info!(file_id = %task.file_id, "Recovery waiting for capacity: {}", e);
                None
            }
            Err(e) => {
                let attempts = task.attempts + 1;
                // Deleted files are dropped; other failures back off until the attempt cap
                let deleted = matches!(e, Error::NotFound(_));
                if deleted || self.retry.is_exhausted(attempts) {
                    state.queue.finish(&task.file_id);
                    if !deleted {
                        state.parked.insert(task.file_id.clone());
                    }
                    tracing::error!(
                        file_id = %task.file_id,
                        attempts,
                        "Recovery failed permanently: {}", e
                    );
                } else {
                    let delay = self.retry.delay(task.attempts);
                    state.queue.retry(
                        &task.file_id,
                        attempts,
                        now + delay.as_secs(),
                        Some(e.to_string()),
                    );
                    tracing::warn!(
                        file_id = %task.file_id,
                        attempts,
                        retry_in_secs = delay.as_secs(),
                        "Recovery failed: {}", e
                    );
                }
                Some(entry(false, 0, Some(e.to_string())))
            }
        };

        let Some(entry) = record else {
            return;
        };
        let (seq, evicted) = state.history.push(entry.clone());
        drop(state);

        if let Err(e) = self.store.put_history(seq, &entry) {
            tracing::warn!("Failed to persist recovery history: {}", e);
        }
        for old in evicted {
            if let Err(e) = self.store.delete_history(old) {
                tracing::warn!("Failed to prune recovery history: {}", e);
            }
        }
    }

    // === Introspection ===

    /// Queued tasks in dispatch order
    pub fn queue(&self) -> Vec<QueueEntry> {
        self.state
            .lock()
            .queue
            .snapshot()
            .into_iter()
            .map(QueueEntry::from)
            .collect()
    }

    pub fn queue_summary(&self) -> QueueSummary {
        let state = self.state.lock();
        let mut summary = QueueSummary {
            parked: state.parked.len(),
            ..QueueSummary::default()
        };
        for task in state.queue.snapshot() {
            summary.total += 1;
            if task.status == TaskStatus::InFlight {
                summary.in_flight += 1;
            }
            match task.priority {
                Priority::Critical => summary.critical += 1,
                Priority::High => summary.high += 1,
                Priority::Medium => summary.medium += 1,
                Priority::Normal => summary.normal += 1,
            }
        }
        summary
    }

    /// Most recent history entries, oldest first
    pub fn history(&self, limit: usize) -> Vec<RecoveryHistoryEntry> {
        self.state.lock().history.recent(limit)
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.state.lock();
        SchedulerStats {
            history: state.history.stats(),
            queue_length: state.queue.len(),
            in_flight: state.queue.in_flight(),
            parked: state.parked.len(),
        }
    }

    pub fn is_parked(&self, file_id: &str) -> bool {
        self.state.lock().parked.contains(file_id)
    }

    pub fn task(&self, file_id: &str) -> Option<QueueEntry> {
        self.state
            .lock()
            .queue
            .get(file_id)
            .cloned()
            .map(QueueEntry::from)
    }
}
