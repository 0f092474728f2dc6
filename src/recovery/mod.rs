//! Priority-driven recovery
//!
//! Files that lost replicas are queued by urgency and repaired by one of three
//! strategies, with exponential backoff between failed attempts.

pub mod backoff;
pub mod history;
pub mod priority;
pub mod queue;
pub mod scheduler;
pub mod strategy;

pub use backoff::RetryPolicy;
pub use history::{RecoveryHistory, RecoveryHistoryEntry, RecoveryStats};
pub use priority::Priority;
pub use queue::{RecoveryQueue, RecoveryTask, TaskStatus};
pub use scheduler::{Clock, Lane, QueueEntry, QueueSummary, RecoveryScheduler, SchedulerStats};
pub use strategy::{RecoveryOutcome, RecoveryPlan, StrategyKind};
