//! Retry classification types.

use std::sync::Arc;
use strata_core::Error;

/// Which errors should trigger a retry
#[derive(Clone)]
pub enum RetryOn {
    /// Retry on all errors
    All,
    /// Retry only on authentication failures
    Unauthenticated,
    /// Retry on errors the error itself marks as retryable
    Transient,
    /// Custom retry predicate
    Custom(Arc<dyn Fn(&Error) -> bool + Send + Sync>),
}

impl std::fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryOn::All => write!(f, "RetryOn::All"),
            RetryOn::Unauthenticated => write!(f, "RetryOn::Unauthenticated"),
            RetryOn::Transient => write!(f, "RetryOn::Transient"),
            RetryOn::Custom(_) => write!(f, "RetryOn::Custom(<predicate>)"),
        }
    }
}
