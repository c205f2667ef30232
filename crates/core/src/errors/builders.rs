//! Builder methods for creating errors with context

use super::types::{Error, StatusCode};
use crate::types::BlockId;
use std::path::PathBuf;
use std::time::Duration;

impl Error {
    /// Create an authentication error
    #[must_use]
    pub fn unauthenticated(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Unauthenticated {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    #[must_use]
    pub fn transport(
        endpoint: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Transport {
            endpoint: endpoint.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a deadline exceeded status error
    #[must_use]
    pub fn deadline_exceeded(operation: impl Into<String>, deadline: Duration) -> Self {
        Error::DeadlineExceeded {
            operation: operation.into(),
            deadline,
        }
    }

    /// Create a conflict error for a block
    #[must_use]
    pub fn conflict(
        block_id: BlockId,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Conflict {
            block_id,
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a capacity error
    #[must_use]
    pub fn capacity(
        requested_bytes: u64,
        available_bytes: u64,
        location: impl Into<String>,
    ) -> Self {
        Error::Capacity {
            requested_bytes,
            available_bytes,
            location: location.into(),
        }
    }

    /// Create a not found error
    #[must_use]
    pub fn not_found(block_id: BlockId, message: impl Into<String>) -> Self {
        Error::NotFound {
            block_id,
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an unimplemented error
    #[must_use]
    pub fn unimplemented(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Unimplemented {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a file system error with context
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Create an under-storage error
    #[must_use]
    pub fn under_storage(
        path: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::UnderStorage {
            path: path.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a cancellation error
    #[must_use]
    pub fn cancelled(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Cancelled {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Error::Serialization {
            message: message.into(),
        }
    }

    /// Status code this error is reported with on the wire
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::Unauthenticated,
            Error::Transport { .. } => StatusCode::Unavailable,
            Error::DeadlineExceeded { .. } | Error::Timeout { .. } => StatusCode::DeadlineExceeded,
            Error::Conflict { .. } => StatusCode::FailedPrecondition,
            Error::Capacity { .. } => StatusCode::ResourceExhausted,
            Error::NotFound { .. } => StatusCode::NotFound,
            Error::InvalidArgument { .. } | Error::Configuration { .. } => {
                StatusCode::InvalidArgument
            }
            Error::Unimplemented { .. } => StatusCode::Unimplemented,
            Error::Cancelled { .. } => StatusCode::Cancelled,
            Error::FileSystem { .. }
            | Error::UnderStorage { .. }
            | Error::Serialization { .. } => StatusCode::Internal,
        }
    }

    /// Whether the error is an authentication failure
    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Error::Unauthenticated { .. })
    }

    /// Whether the error is a block conflict
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Whether a caller may reasonably retry the failed operation
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status(),
            StatusCode::Unavailable | StatusCode::DeadlineExceeded | StatusCode::ResourceExhausted
        )
    }
}
