//! Core error type definitions

use std::path::PathBuf;
use std::time::Duration;

use crate::types::BlockId;

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for strata operations using thiserror
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Credentials were rejected while building a channel; retryable after re-login
    Unauthenticated { endpoint: String, message: String },

    /// Channel construction or RPC failure, never retried by this layer
    Transport {
        endpoint: String,
        operation: String,
        message: String,
    },

    /// A unary call exceeded its configured deadline
    DeadlineExceeded {
        operation: String,
        deadline: Duration,
    },

    /// Concurrent writer, or mutation of a block that is in use
    Conflict {
        block_id: BlockId,
        operation: String,
        message: String,
    },

    /// Local storage could not satisfy an allocation
    Capacity {
        requested_bytes: u64,
        available_bytes: u64,
        location: String,
    },

    /// Block is neither cached nor readable from under-storage
    NotFound { block_id: BlockId, message: String },

    /// Caller supplied an argument outside the accepted domain
    InvalidArgument { message: String },

    /// Operation is not offered by the active store strategy
    Unimplemented { operation: String, message: String },

    /// File system operations
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Under-storage read failures
    UnderStorage {
        path: String,
        operation: String,
        message: String,
    },

    /// Configuration errors
    Configuration { message: String },

    /// Caller-imposed wait bound exceeded
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// A stream or task ended before completing
    Cancelled { operation: String, message: String },

    /// Wire message encoding/decoding failures
    Serialization { message: String },
}

/// Status codes surfaced across the wire contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum StatusCode {
    Ok,
    Cancelled,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    FailedPrecondition,
    Unimplemented,
    Internal,
    Unavailable,
    Unauthenticated,
}
