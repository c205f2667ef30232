//! Error types and result extensions for strata operations

mod builders;
mod conversions;
mod display;
mod extensions;
mod types;

pub use extensions::*;
pub use types::{Error, Result, StatusCode};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::unauthenticated("w1:29999", "expired").status(),
            StatusCode::Unauthenticated
        );
        assert_eq!(
            Error::conflict(7, "remove", "open for reading").status(),
            StatusCode::FailedPrecondition
        );
        assert_eq!(
            Error::deadline_exceeded("remove_block", Duration::from_secs(1)).status(),
            StatusCode::DeadlineExceeded
        );
        assert_eq!(Error::capacity(10, 5, "MEM").status(), StatusCode::ResourceExhausted);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::transport("w1", "connect", "refused").is_retryable());
        assert!(!Error::conflict(1, "write", "busy").is_retryable());
        assert!(!Error::unauthenticated("w1", "bad token").is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::conflict(42, "create writer", "block is already being written");
        assert_eq!(
            err.to_string(),
            "cannot create writer block 42: block is already being written"
        );
    }

    #[test]
    fn test_context_extension() {
        let result: std::result::Result<(), Error> = Err(Error::configuration("pool_max is 0"));
        let err = result.context("validating client config").unwrap_err();
        assert!(err.to_string().contains("validating client config"));
    }
}
