//! Client side of the strata block data path
//!
//! - **`worker_client`**: a session with one block worker over a streaming and an
//!   rpc channel, with login retry and downgrade to a [`DummyChannelHandle`]
//! - **`pool`**: bounded, blocking pools of those sessions, one per worker
//! - **`context`**: the registry of pools shared by a process
//! - **`io`**: block out/in streams and a multi-block file writer that keep pool
//!   checkouts short
//! - **`transport`**: the channel contract a wire implementation provides

pub mod config;
pub mod context;
pub mod io;
pub mod pool;
pub mod transport;
pub mod worker_client;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use context::ClientContext;
pub use io::{BlockInStream, BlockOutStream, FileWriter, OutStreamOptions, WrittenFile};
pub use pool::{BlockWorkerClientPool, PooledWorkerClient};
pub use transport::{Channel, ChannelBuilder, NetworkGroup, StaticUser, Transport, UserState};
pub use worker_client::{BlockWorkerClient, DummyChannelHandle};
