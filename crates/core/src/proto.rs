//! Messages of the block worker wire contract.
//!
//! Every message derives serde so a call-site marshaller can take over encoding
//! of the data-heavy streams.

use crate::errors::StatusCode;
use crate::types::{BlockId, OpenUfsBlockOptions};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Control message of a write stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequestCommand {
    pub block_id: BlockId,
    /// Offset the sender believes it is writing at
    pub offset: u64,
    /// Ask the worker to acknowledge everything received so far
    pub flush: bool,
    pub medium_type: Option<String>,
    pub space_to_reserve: u64,
    pub pin_on_create: bool,
}

/// One message on the write stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteRequest {
    Command(WriteRequestCommand),
    Chunk(Bytes),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    /// Bytes durably appended to the block
    pub offset: u64,
}

/// Opens (first message) or acknowledges (`offset_received`) a read stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub block_id: BlockId,
    pub offset: u64,
    pub length: u64,
    pub chunk_size: u64,
    pub position_short: bool,
    pub open_ufs_block_options: Option<OpenUfsBlockOptions>,
    pub offset_received: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub chunk: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLocalBlockRequest {
    pub block_id: BlockId,
    pub medium_type: Option<String>,
    pub space_to_reserve: u64,
    pub only_reserve_space: bool,
    pub cleanup_on_failure: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLocalBlockResponse {
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLocalBlockRequest {
    pub block_id: BlockId,
    pub promote: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLocalBlockResponse {
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveBlockRequest {
    pub block_id: BlockId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveBlockResponse {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveBlockRequest {
    pub block_id: BlockId,
    pub medium_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveBlockResponse {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearMetricsRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearMetricsResponse {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeWorkerRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeWorkerResponse {}

/// Asks a worker to pull a block into its cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRequest {
    pub block_id: BlockId,
    pub block_size: u64,
    pub open_ufs_block_options: OpenUfsBlockOptions,
    pub source_host: String,
    pub source_port: u16,
    /// Fire-and-forget: failures are logged, never returned
    pub is_async: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheResponse {}

/// A block to be loaded from under-storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBlock {
    pub block_id: BlockId,
    pub length: u64,
    pub ufs_path: String,
    pub mount_id: u64,
    pub offset_in_file: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub blocks: Vec<LoadBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Success,
    PartialFailure,
    Failure,
}

/// Outcome of loading one block that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStatus {
    pub block_id: BlockId,
    pub code: StatusCode,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResponse {
    pub status: TaskStatus,
    pub block_statuses: Vec<BlockStatus>,
}
