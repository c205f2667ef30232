//! Resilience patterns for transient failures.
//!
//! - [`types`] - retry classification (`RetryOn`)
//! - [`config`] - backoff configuration (`RetryConfig`)
//! - [`retry`] - the retry loop
//!
//! ```rust,no_run
//! use strata_utils::resilience::{retry, RetryConfig};
//!
//! # async fn example() -> strata_core::Result<String> {
//! let config = RetryConfig::for_authentication();
//! retry(&config, || async {
//!     // Your operation here
//!     Ok("connected".to_string())
//! })
//! .await
//! # }
//! ```

pub mod config;
pub mod retry;
pub mod types;

pub use config::RetryConfig;
pub use retry::retry;
pub use types::RetryOn;
