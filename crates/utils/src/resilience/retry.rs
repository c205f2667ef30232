//! Retry loop with exponential backoff.

use super::config::RetryConfig;
use std::future::Future;
use strata_core::{Error, Result};
use tokio::time::sleep;

/// Execute an operation with retry logic.
///
/// Errors the policy does not classify as retryable are returned immediately; once
/// the attempts are exhausted the last error is returned.
pub async fn retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt < config.max_retries && config.should_retry(&error) {
                    let delay = config.calculate_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = config.max_retries + 1,
                        ?delay,
                        %error,
                        "operation failed, retrying"
                    );
                    sleep(delay).await;
                    last_error = Some(error);
                } else {
                    return Err(error);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::configuration("retry loop ended unexpectedly")))
}
