//! Recovery queue
//!
//! One task per file. Ready tasks are served by descending priority, then by
//! enqueue time. A file that is re-enqueued keeps its place and can only move
//! up a tier.

use crate::recovery::priority::Priority;
use crate::recovery::strategy::StrategyKind;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryTask {
    pub file_id: String,
    pub priority: Priority,
    pub strategy: StrategyKind,
    /// Failed attempts so far
    pub attempts: u32,
    pub enqueued_at: u64,
    /// Not dispatched before this time
    pub eligible_at: u64,
    pub status: TaskStatus,
    /// Requested by an operator; kept even if the file looks healthy
    pub forced: bool,
    pub last_error: Option<String>,
    #[serde(skip)]
    seq: u64,
}

impl RecoveryTask {
    fn order_key(&self) -> (Reverse<Priority>, u64, u64) {
        (Reverse(self.priority), self.enqueued_at, self.seq)
    }

    pub fn is_ready(&self, now: u64) -> bool {
        self.status == TaskStatus::Pending && self.eligible_at <= now
    }
}

#[derive(Debug, Default)]
pub struct RecoveryQueue {
    tasks: HashMap<String, RecoveryTask>,
    next_seq: u64,
}

impl RecoveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, file_id: &str) -> Option<&RecoveryTask> {
        self.tasks.get(file_id)
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.tasks.contains_key(file_id)
    }

    /// Enqueue a file. Returns `true` if a new task was created; an existing
    /// task is only ever raised to a higher priority.
    pub fn push(&mut self, file_id: &str, priority: Priority, strategy: StrategyKind, now: u64) -> bool {
        if let Some(task) = self.tasks.get_mut(file_id) {
            if priority > task.priority {
                task.priority = priority;
                task.strategy = strategy;
            }
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.insert(
            file_id.to_string(),
            RecoveryTask {
                file_id: file_id.to_string(),
                priority,
                strategy,
                attempts: 0,
                enqueued_at: now,
                eligible_at: now,
                status: TaskStatus::Pending,
                forced: false,
                last_error: None,
                seq,
            },
        );
        true
    }

    /// Operator request: top priority, eligible immediately
    pub fn force(&mut self, file_id: &str, strategy: StrategyKind, now: u64) {
        self.push(file_id, Priority::Critical, strategy, now);
        if let Some(task) = self.tasks.get_mut(file_id) {
            task.priority = Priority::Critical;
            task.forced = true;
            if task.status == TaskStatus::Pending {
                task.eligible_at = task.eligible_at.min(now);
            }
        }
    }

    /// Set the priority of a pending, non-forced task to its recomputed tier
    pub fn reprioritize(&mut self, file_id: &str, priority: Priority, strategy: StrategyKind) {
        if let Some(task) = self.tasks.get_mut(file_id) {
            if task.status == TaskStatus::Pending && !task.forced {
                task.priority = priority;
                task.strategy = strategy;
            }
        }
    }

    /// Drop a pending task that is no longer needed
    pub fn discard_pending(&mut self, file_id: &str) -> bool {
        match self.tasks.get(file_id) {
            Some(task) if task.status == TaskStatus::Pending && !task.forced => {
                self.tasks.remove(file_id);
                true
            }
            _ => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::InFlight)
            .count()
    }

    /// Claim up to `limit` ready tasks at or above `min_priority`, in queue order
    pub fn take_ready(&mut self, now: u64, min_priority: Option<Priority>, limit: usize) -> Vec<RecoveryTask> {
        let mut ready: Vec<&mut RecoveryTask> = self
            .tasks
            .values_mut()
            .filter(|t| t.is_ready(now))
            .filter(|t| min_priority.map_or(true, |min| t.priority >= min))
            .collect();
        ready.sort_by_key(|t| t.order_key());

        ready
            .into_iter()
            .take(limit)
            .map(|task| {
                task.status = TaskStatus::InFlight;
                task.clone()
            })
            .collect()
    }

    /// Put an in-flight task back, eligible again at `eligible_at`
    pub fn retry(&mut self, file_id: &str, attempts: u32, eligible_at: u64, error: Option<String>) {
        if let Some(task) = self.tasks.get_mut(file_id) {
            task.status = TaskStatus::Pending;
            task.attempts = attempts;
            task.eligible_at = eligible_at;
            task.last_error = error;
        }
    }

    /// Remove a task whose work is finished, successfully or not
    pub fn finish(&mut self, file_id: &str) -> Option<RecoveryTask> {
        self.tasks.remove(file_id)
    }

    /// All tasks in dispatch order
    pub fn snapshot(&self) -> Vec<RecoveryTask> {
        let mut tasks: Vec<RecoveryTask> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.order_key());
        tasks
    }
}
