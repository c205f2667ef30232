//! Worker endpoint identity

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Network address of a block worker; the key of the client pool registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerNetAddress {
    pub host: String,
    pub rpc_port: u16,
    pub data_port: u16,
}

impl WorkerNetAddress {
    pub fn new(host: impl Into<String>, rpc_port: u16, data_port: u16) -> Self {
        Self {
            host: host.into(),
            rpc_port,
            data_port,
        }
    }

    /// Endpoint used for both streaming and rpc channels
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.rpc_port)
    }
}

impl Display for WorkerNetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.rpc_port)
    }
}
