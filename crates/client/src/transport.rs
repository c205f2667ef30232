//! What the client needs from the wire: channels to a worker and the identity used
//! to open them.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use strata_core::rpc::BlockWorkerStub;
use strata_core::{Result, WorkerNetAddress};

/// Channel class; streaming channels are never shared at the transport level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkGroup {
    Rpc,
    Streaming,
}

impl fmt::Display for NetworkGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkGroup::Rpc => write!(f, "rpc"),
            NetworkGroup::Streaming => write!(f, "streaming"),
        }
    }
}

/// Login state of the process user
#[async_trait]
pub trait UserState: Send + Sync {
    fn subject(&self) -> String;

    /// Refresh credentials after the worker rejected them
    async fn relogin(&self) -> Result<()>;
}

/// User whose credentials never expire
#[derive(Debug, Clone)]
pub struct StaticUser {
    subject: String,
}

impl StaticUser {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl UserState for StaticUser {
    fn subject(&self) -> String {
        self.subject.clone()
    }

    async fn relogin(&self) -> Result<()> {
        Ok(())
    }
}

/// An open connection to one worker
pub trait Channel: Send + Sync {
    fn is_shutdown(&self) -> bool;

    fn is_healthy(&self) -> bool;

    /// Stop the channel; shutting down twice is not an error
    fn shutdown(&self) -> Result<()>;

    fn stub(&self) -> Arc<dyn BlockWorkerStub>;
}

/// Opens channels to workers
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        address: &WorkerNetAddress,
        group: NetworkGroup,
        subject: &str,
    ) -> Result<Arc<dyn Channel>>;
}

/// Everything needed to open another channel like the one it built
#[derive(Clone)]
pub struct ChannelBuilder {
    address: WorkerNetAddress,
    group: NetworkGroup,
    subject: String,
    transport: Arc<dyn Transport>,
}

impl ChannelBuilder {
    pub fn new(address: WorkerNetAddress, transport: Arc<dyn Transport>) -> Self {
        Self {
            address,
            group: NetworkGroup::Rpc,
            subject: String::new(),
            transport,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_network_group(mut self, group: NetworkGroup) -> Self {
        self.group = group;
        self
    }

    pub fn address(&self) -> &WorkerNetAddress {
        &self.address
    }

    pub fn network_group(&self) -> NetworkGroup {
        self.group
    }

    pub async fn build(&self) -> Result<Arc<dyn Channel>> {
        let channel = self
            .transport
            .connect(&self.address, self.group, &self.subject)
            .await?;
        tracing::trace!(worker = %self.address, group = %self.group, "channel built");
        Ok(channel)
    }
}

impl fmt::Debug for ChannelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBuilder")
            .field("address", &self.address)
            .field("group", &self.group)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}
