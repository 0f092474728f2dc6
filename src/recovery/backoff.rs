//! Retry policy for failed recovery tasks

use crate::common::RecoveryConfig;
use std::time::Duration;

/// Exponential backoff: `base * 2^attempts`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Failed attempts after which a task stops retrying
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before retrying a task that has already failed `attempts` times
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..6).map(|a| policy.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![300, 600, 1200, 2400, 3600, 3600]);
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(40).as_secs(), 3600);
        assert_eq!(policy.delay(u32::MAX).as_secs(), 3600);
    }

    #[test]
    fn test_attempt_cap() {
        let unbounded = RetryPolicy::default();
        assert!(!unbounded.is_exhausted(1_000));

        let capped = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        assert!(!capped.is_exhausted(2));
        assert!(capped.is_exhausted(3));
    }
}
