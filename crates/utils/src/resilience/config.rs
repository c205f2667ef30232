//! Configuration for retry behavior.

use super::types::RetryOn;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strata_core::Error;

/// Default maximum number of retry attempts
const DEFAULT_MAX_RETRIES: usize = 3;

/// Default base delay for exponential backoff (100ms)
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default maximum delay for exponential backoff (10s)
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Default jitter factor (0.1 = 10% randomization)
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Configuration for retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Jitter factor for randomization (0.0 to 1.0)
    pub jitter_factor: f64,
    /// Whether to retry on specific error types
    #[serde(skip, default = "default_retry_on")]
    pub retry_on: RetryOn,
}

fn default_retry_on() -> RetryOn {
    RetryOn::Transient
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            retry_on: RetryOn::Transient,
        }
    }
}

impl RetryConfig {
    /// Retry config for channel authentication: a handful of attempts, re-login in between
    pub fn for_authentication() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(3),
            jitter_factor: 0.2,
            retry_on: RetryOn::Unauthenticated,
        }
    }

    /// Same backoff, different classification
    pub fn retrying_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Check if an error should be retried
    pub fn should_retry(&self, error: &Error) -> bool {
        match &self.retry_on {
            RetryOn::All => true,
            RetryOn::Unauthenticated => error.is_unauthenticated(),
            RetryOn::Transient => error.is_retryable(),
            RetryOn::Custom(predicate) => predicate(error),
        }
    }

    /// Calculate delay for a given attempt with exponential backoff and jitter
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX).min(16);
        let exponential_delay = self.base_delay.saturating_mul(2u32.saturating_pow(exponent));
        let capped_delay = exponential_delay.min(self.max_delay);

        // Add jitter to prevent thundering herd
        if self.jitter_factor > 0.0 {
            let jitter_range = capped_delay.as_millis() as f64 * self.jitter_factor;
            let normalized = (fastrand::f64() - 0.5) * 2.0;
            let jitter = normalized * jitter_range;
            let final_millis = (capped_delay.as_millis() as f64 + jitter).max(0.0) as u64;
            Duration::from_millis(final_millis)
        } else {
            capped_delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_calculate_delay_with_jitter() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_factor: 0.5,
            ..Default::default()
        };

        let mut delays = Vec::new();
        for _ in 0..20 {
            delays.push(config.calculate_delay(2));
        }

        let unique_delays: HashSet<_> = delays.iter().collect();
        assert!(unique_delays.len() > 1);

        // All should be within expected range (400ms +- 50%)
        for delay in delays {
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(600));
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(config.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(10), Duration::from_millis(250));
    }

    #[test]
    fn test_authentication_policy_classification() {
        let config = RetryConfig::for_authentication();
        assert!(config.should_retry(&Error::unauthenticated("w1:29999", "expired ticket")));
        assert!(!config.should_retry(&Error::transport("w1:29999", "connect", "refused")));
    }
}
