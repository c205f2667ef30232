//! Shared utilities for the strata data path.
//!
//! - [`resilience`] - retry with exponential backoff
//! - [`tracing`] - subscriber setup and span helpers

pub mod resilience;
pub mod tracing;
