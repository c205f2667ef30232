//! Core domain types shared by workers and clients.
//!
//! - **`block`**: block and session identifiers, creation and under-storage options
//! - **`address`**: worker endpoint identity

pub mod address;
pub mod block;

pub use address::*;
pub use block::*;
