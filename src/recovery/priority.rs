//! Priority tiers
//!
//! Priority is a pure function of a file's replica counts, so the queue can
//! always be rebuilt from the metadata store.

use crate::coordinator::metadata::ReplicaHealth;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Healthy or optimisation candidate
    Normal,
    /// Corrupted replica present
    Medium,
    /// One active replica left
    High,
    /// No active replica left
    Critical,
}

impl Priority {
    pub fn value(self) -> u8 {
        match self {
            Priority::Normal => 5,
            Priority::Medium => 12,
            Priority::High => 15,
            Priority::Critical => 20,
        }
    }

    /// Tasks at this tier are picked up by the fast-path loop
    pub fn is_urgent(self) -> bool {
        self >= Priority::High
    }

    pub fn for_health(health: &ReplicaHealth) -> Self {
        match health.active {
            0 => Priority::Critical,
            1 => Priority::High,
            _ if health.corrupted > 0 => Priority::Medium,
            _ => Priority::Normal,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(active: usize, corrupted: usize) -> ReplicaHealth {
        ReplicaHealth {
            desired: 3,
            active,
            corrupted,
            total: active + corrupted,
        }
    }

    #[test]
    fn test_priority_tiers() {
        assert_eq!(Priority::for_health(&health(0, 0)), Priority::Critical);
        assert_eq!(Priority::for_health(&health(0, 2)), Priority::Critical);
        assert_eq!(Priority::for_health(&health(1, 1)), Priority::High);
        assert_eq!(Priority::for_health(&health(2, 1)), Priority::Medium);
        assert_eq!(Priority::for_health(&health(3, 0)), Priority::Normal);
        assert_eq!(Priority::Critical.value(), 20);
        assert_eq!(Priority::Normal.value(), 5);
    }

    #[test]
    fn test_priority_is_monotonic() {
        for corrupted in 0..5 {
            let none = Priority::for_health(&health(0, corrupted)).value();
            let one = Priority::for_health(&health(1, corrupted)).value();
            let corrupted_only = Priority::for_health(&health(2, corrupted.max(1))).value();
            let healthy = Priority::for_health(&health(3, 0)).value();
            assert!(none >= one);
            assert!(one >= corrupted_only);
            assert!(corrupted_only >= healthy);
        }
    }

    #[test]
    fn test_urgency_threshold() {
        assert!(Priority::Critical.is_urgent());
        assert!(Priority::High.is_urgent());
        assert!(!Priority::Medium.is_urgent());
    }
}
