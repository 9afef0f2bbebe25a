//! Bounded retry policy for step operators.
//!
//! A step gets `1 + retry_attempts` tries (the budget is snapshotted onto the
//! instance from its definition). Backoff between tries is exponential:
//! 500 ms base, doubling per attempt, capped at 30 s.

use std::time::Duration;

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional tries after the first failure.
    pub retry_attempts: u32,
}

impl RetryPolicy {
    pub fn new(retry_attempts: u32) -> Self {
        Self { retry_attempts }
    }

    /// Whether the (1-based) failed attempt should be retried.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.retry_attempts
    }

    /// Delay before re-running after the (1-based) failed attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = Duration::from_millis(BASE_DELAY_MS.saturating_mul(1 << exponent));
        delay.min(MAX_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_never_retries() {
        let policy = RetryPolicy::new(0);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn budget_of_two_allows_three_tries() {
        let policy = RetryPolicy::new(2);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10);
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(10), MAX_DELAY);
    }
}
