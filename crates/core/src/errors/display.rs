//! Display implementations for error types

use super::types::Error;
use std::fmt;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Unauthenticated { endpoint, message } => {
                write!(f, "authentication with '{endpoint}' failed: {message}")
            }
            Error::Transport {
                endpoint,
                operation,
                message,
            } => {
                write!(f, "transport error during {operation} with '{endpoint}': {message}")
            }
            Error::DeadlineExceeded {
                operation,
                deadline,
            } => {
                write!(f, "{operation} exceeded its deadline of {deadline:?}")
            }
            Error::Conflict {
                block_id,
                operation,
                message,
            } => {
                write!(f, "cannot {operation} block {block_id}: {message}")
            }
            Error::Capacity {
                requested_bytes,
                available_bytes,
                location,
            } => write!(
                f,
                "not enough space in {location}: requested {requested_bytes} bytes, only {available_bytes} bytes available"
            ),
            Error::NotFound { block_id, message } => {
                write!(f, "block {block_id} not found: {message}")
            }
            Error::InvalidArgument { message } => {
                write!(f, "invalid argument: {message}")
            }
            Error::Unimplemented { operation, message } => {
                write!(f, "{operation} is not supported: {message}")
            }
            Error::FileSystem {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "file system error during {} on '{}': {}",
                    operation,
                    path.display(),
                    source
                )
            }
            Error::UnderStorage {
                path,
                operation,
                message,
            } => {
                write!(f, "under-storage {operation} on '{path}' failed: {message}")
            }
            Error::Configuration { message } => {
                write!(f, "configuration error: {message}")
            }
            Error::Timeout {
                operation,
                duration,
            } => {
                write!(f, "{operation} timed out after {duration:?}")
            }
            Error::Cancelled { operation, message } => {
                write!(f, "{operation} was cancelled: {message}")
            }
            Error::Serialization { message } => {
                write!(f, "serialization error: {message}")
            }
        }
    }
}
