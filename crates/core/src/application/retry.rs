// Retry policy for failed delivery attempts

use std::time::Duration;
use tracing::warn;

use crate::application::classify::ErrorClass;

/// Retry decision result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the job for another attempt after the given delay
    Retry(Duration),
    /// Route the job to the dead-letter queue
    DeadLetter,
}

/// Decides retry versus dead-letter for a failed attempt.
///
/// The delay is a fixed pause, not exponential: retries exist to absorb
/// startup races and short outages, and `max_retries` bounds the total
/// attempt count so they are never unbounded.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Decide the fate of attempt number `attempt` (1-based) that failed
    /// with the given classification.
    pub fn decide(&self, attempt: u32, class: ErrorClass) -> RetryDecision {
        match class {
            ErrorClass::NonRetryable => RetryDecision::DeadLetter,
            ErrorClass::Retryable if attempt >= self.max_retries => {
                warn!(
                    attempt = attempt,
                    max_retries = self.max_retries,
                    "Retry budget exhausted"
                );
                RetryDecision::DeadLetter
            }
            ErrorClass::Retryable => RetryDecision::Retry(self.retry_delay),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES, Self::DEFAULT_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_within_budget_retries_with_fixed_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        assert_eq!(
            policy.decide(1, ErrorClass::Retryable),
            RetryDecision::Retry(Duration::from_secs(5))
        );
        assert_eq!(
            policy.decide(2, ErrorClass::Retryable),
            RetryDecision::Retry(Duration::from_secs(5))
        );
    }

    #[test]
    fn final_attempt_dead_letters() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        assert_eq!(policy.decide(3, ErrorClass::Retryable), RetryDecision::DeadLetter);
        assert_eq!(policy.decide(4, ErrorClass::Retryable), RetryDecision::DeadLetter);
    }

    #[test]
    fn non_retryable_dead_letters_on_first_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, ErrorClass::NonRetryable),
            RetryDecision::DeadLetter
        );
    }

    #[test]
    fn attempt_budget_is_at_least_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_retries(), 1);
        assert_eq!(policy.decide(1, ErrorClass::Retryable), RetryDecision::DeadLetter);
    }
}
