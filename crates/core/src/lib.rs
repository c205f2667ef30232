//! Core domain types, errors, and the wire contract shared by strata workers and
//! clients.
//!
//! ## Key Components
//!
//! - **`errors`**: the `Error` enum and `Result` alias covering authentication,
//!   transport, conflict, capacity and storage failures, plus status-code mapping.
//! - **`types`**: block and session identifiers, creation and under-storage options,
//!   worker addresses.
//! - **`proto`** / **`rpc`**: messages and the `BlockWorkerStub` service trait that
//!   connect a client to a worker's storage engine.
//! - **`leak`**: optional process-wide detection of resources dropped unclosed.

pub mod constants;
pub mod errors;
pub mod leak;
pub mod proto;
pub mod rpc;
pub mod types;

pub use self::{
    constants::*,
    errors::{Error, Result, ResultExt, StatusCode},
    types::*,
};
