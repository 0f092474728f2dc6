//! Recovery history and statistics
//!
//! A bounded log of finished recovery attempts. Statistics are computed from
//! this log alone.

use crate::recovery::priority::Priority;
use crate::recovery::strategy::StrategyKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryHistoryEntry {
    pub file_id: String,
    pub filename: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub strategy: StrategyKind,
    pub priority: Priority,
    pub success: bool,
    pub elapsed_ms: u64,
    pub attempts: u32,
    pub bytes_transferred: u64,
    pub error: Option<String>,
}

/// Fixed-capacity history, oldest entries evicted first
#[derive(Debug)]
pub struct RecoveryHistory {
    entries: VecDeque<(u64, RecoveryHistoryEntry)>,
    limit: usize,
    next_seq: u64,
}

impl RecoveryHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
            next_seq: 0,
        }
    }

    /// Rebuild from persisted `(seq, entry)` pairs, oldest first
    pub fn restore(limit: usize, persisted: Vec<(u64, RecoveryHistoryEntry)>) -> Self {
        let mut history = Self::new(limit);
        for (seq, entry) in persisted {
            history.next_seq = history.next_seq.max(seq + 1);
            history.entries.push_back((seq, entry));
        }
        while history.entries.len() > limit {
            history.entries.pop_front();
        }
        history
    }

    /// Append an entry. Returns its sequence number and the sequence numbers
    /// evicted to stay within the limit.
    pub fn push(&mut self, entry: RecoveryHistoryEntry) -> (u64, Vec<u64>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back((seq, entry));

        let mut evicted = Vec::new();
        while self.entries.len() > self.limit {
            if let Some((old, _)) = self.entries.pop_front() {
                evicted.push(old);
            }
        }
        (seq, evicted)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<RecoveryHistoryEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries
            .iter()
            .skip(skip)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn stats(&self) -> RecoveryStats {
        RecoveryStats::from_entries(self.entries.iter().map(|(_, e)| e))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub total_recoveries: usize,
    pub successful_recoveries: usize,
    pub failed_recoveries: usize,
    /// Percentage of successful recoveries
    pub success_rate: f64,
    /// Mean duration of successful recoveries
    pub average_recovery_ms: f64,
    /// Successful recoveries at HIGH or CRITICAL
    pub critical_recoveries: usize,
    pub bytes_recovered: u64,
    pub last_recovery: Option<DateTime<Utc>>,
}

impl RecoveryStats {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a RecoveryHistoryEntry>) -> Self {
        let mut stats = RecoveryStats::default();
        let mut success_ms = 0u64;
        for entry in entries {
            stats.total_recoveries += 1;
            if entry.success {
                stats.successful_recoveries += 1;
                stats.bytes_recovered += entry.bytes_transferred;
                success_ms += entry.elapsed_ms;
                if entry.priority.is_urgent() {
                    stats.critical_recoveries += 1;
                }
            } else {
                stats.failed_recoveries += 1;
            }
            stats.last_recovery = stats.last_recovery.max(Some(entry.timestamp));
        }
        if stats.total_recoveries > 0 {
            stats.success_rate =
                stats.successful_recoveries as f64 / stats.total_recoveries as f64 * 100.0;
        }
        if stats.successful_recoveries > 0 {
            stats.average_recovery_ms = success_ms as f64 / stats.successful_recoveries as f64;
        }
        stats
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry(file_id: &str, success: bool, priority: Priority, elapsed_ms: u64) -> RecoveryHistoryEntry {
        RecoveryHistoryEntry {
            file_id: file_id.to_string(),
            filename: format!("{}.bin", file_id),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
            strategy: StrategyKind::CreateReplica,
            priority,
            success,
            elapsed_ms,
            attempts: 1,
            bytes_transferred: if success { 100 } else { 0 },
            error: (!success).then(|| "transfer failed".to_string()),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = RecoveryHistory::new(3);
        let mut evicted = Vec::new();
        for i in 0..5 {
            let (_, gone) = history.push(entry(&format!("f{}", i), true, Priority::Normal, 10));
            evicted.extend(gone);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(evicted, vec![0, 1]);
        let recent: Vec<_> = history.recent(2).into_iter().map(|e| e.file_id).collect();
        assert_eq!(recent, vec!["f3", "f4"]);
    }

    #[test]
    fn test_stats_from_history() {
        let mut history = RecoveryHistory::new(10);
        history.push(entry("a", true, Priority::Critical, 100));
        history.push(entry("b", true, Priority::Normal, 300));
        history.push(entry("c", false, Priority::High, 50));
        history.push(entry("d", false, Priority::High, 50));

        let stats = history.stats();
        assert_eq!(stats.total_recoveries, 4);
        assert_eq!(stats.successful_recoveries, 2);
        assert_eq!(stats.failed_recoveries, 2);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.average_recovery_ms, 200.0);
        assert_eq!(stats.critical_recoveries, 1);
        assert_eq!(stats.bytes_recovered, 200);
    }

    #[test]
    fn test_empty_stats() {
        let stats = RecoveryHistory::new(10).stats();
        assert_eq!(stats.total_recoveries, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(stats.last_recovery.is_none());
    }

    #[test]
    fn test_restore_continues_sequence() {
        let persisted = vec![(4, entry("a", true, Priority::Normal, 1)), (7, entry("b", true, Priority::Normal, 1))];
        let mut history = RecoveryHistory::restore(10, persisted);
        let (seq, _) = history.push(entry("c", true, Priority::Normal, 1));
        assert_eq!(seq, 8);
        assert_eq!(history.len(), 3);
    }
}
