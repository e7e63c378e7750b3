//! Bounded retry with exponential backoff and failure classification.

use std::time::Duration;

use crate::core::types::ErrorClass;

/// Retry parameters for the execution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retrying `attempt` (1-indexed):
    /// `min(base_delay * 2^(attempt-1), max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.max_delay)
    }
}

/// Map a raised failure onto an [`ErrorClass`] using substring heuristics on
/// the rendered error chain. `BudgetExceeded` is always fatal to the caller;
/// every other class is retryable.
pub fn classify_failure(err: &anyhow::Error) -> ErrorClass {
    let text = format!("{err:#}").to_lowercase();
    if text.contains("429") || text.contains("rate") {
        ErrorClass::RateLimited
    } else if text.contains("timeout") || text.contains("connection") {
        ErrorClass::NetworkError
    } else if text.contains("policy") || text.contains("permission") {
        ErrorClass::PolicyBlocked
    } else if text.contains("budget") {
        ErrorClass::BudgetExceeded
    } else if text.contains("validation") {
        ErrorClass::ValidationError
    } else {
        ErrorClass::ToolError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let expected_secs = [1, 2, 4, 8, 8, 8, 8, 8, 8, 8];
        for (i, secs) in expected_secs.iter().enumerate() {
            let attempt = (i + 1) as u32;
            assert_eq!(
                policy.delay_for(attempt),
                Duration::from_secs(*secs),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn delay_is_monotonically_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "attempt {attempt} regressed");
            previous = delay;
        }
    }

    #[test]
    fn large_attempts_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
    }

    #[test]
    fn classification_uses_substring_heuristics() {
        let cases = [
            ("HTTP 429 from upstream", ErrorClass::RateLimited),
            ("rate limit reached", ErrorClass::RateLimited),
            ("read timeout", ErrorClass::NetworkError),
            ("connection refused", ErrorClass::NetworkError),
            ("policy violation: missing permissions", ErrorClass::PolicyBlocked),
            ("model budget exceeded", ErrorClass::BudgetExceeded),
            ("validation parsing failed", ErrorClass::ValidationError),
            ("something else entirely", ErrorClass::ToolError),
        ];
        for (message, expected) in cases {
            assert_eq!(
                classify_failure(&anyhow!("{message}")),
                expected,
                "{message}"
            );
        }
    }

    #[test]
    fn classification_sees_the_whole_error_chain() {
        let err = anyhow!("connection reset by peer").context("call browser backend");
        assert_eq!(classify_failure(&err), ErrorClass::NetworkError);
    }
}
