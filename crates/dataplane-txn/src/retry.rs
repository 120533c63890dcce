//! Retry policy for the transaction coordinator.
//!
//! A policy bounds the number of full version-read/open/commit cycles and
//! decides how long to wait between them.

use std::time::Duration;

use dataplane_common::{BackoffKind, TransactionConfig};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// `initial * multiplier^(n-1)`, capped at `max`.
    Exponential {
        /// Delay after the first failed attempt.
        initial: Duration,
        /// Growth factor per attempt.
        multiplier: u32,
        /// Cap.
        max: Duration,
    },
}

/// Bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, Backoff::Fixed(delay))
    }

    /// Exponential backoff between attempts.
    pub fn exponential(max_attempts: u32, initial: Duration, multiplier: u32, max: Duration) -> Self {
        Self::new(
            max_attempts,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            },
        )
    }

    /// Builds the policy described by a transaction config section.
    pub fn from_config(config: &TransactionConfig) -> Self {
        match config.backoff {
            BackoffKind::Fixed => Self::fixed(config.max_attempts, config.retry_delay()),
            BackoffKind::Exponential => Self::exponential(
                config.max_attempts,
                config.retry_delay(),
                config.backoff_multiplier,
                config.max_retry_delay(),
            ),
        }
    }

    /// Maximum number of full cycles, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The backoff schedule.
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Returns true if another attempt may follow attempt number `attempt`
    /// (1-based).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = attempt.saturating_sub(1);
                match multiplier.checked_pow(exponent) {
                    Some(factor) => initial.saturating_mul(factor).min(max),
                    None => max,
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TransactionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixed_policy() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(100));
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(100));

        assert!(policy.allows_retry_after(1));
        assert!(policy.allows_retry_after(2));
        assert!(!policy.allows_retry_after(3));
    }

    #[test]
    fn test_exponential_policy_caps() {
        let policy = RetryPolicy::exponential(
            10,
            Duration::from_millis(100),
            2,
            Duration::from_millis(500),
        );
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        // factor overflows u32
        assert_eq!(policy.delay_after(40), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::fixed(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.allows_retry_after(1));
    }

    #[test]
    fn test_from_config() {
        let config = TransactionConfig {
            max_attempts: 4,
            retry_delay_ms: 20,
            backoff: BackoffKind::Exponential,
            backoff_multiplier: 3,
            max_retry_delay_ms: 1_000,
            ..TransactionConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_after(3), Duration::from_millis(180));

        let default = RetryPolicy::default();
        assert_eq!(default.max_attempts(), 5);
        assert_eq!(default.backoff(), Backoff::Fixed(Duration::from_secs(1)));
    }
}
