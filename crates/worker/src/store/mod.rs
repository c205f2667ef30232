//! Block stores: where committed blocks and their temporary predecessors live.
//!
//! Two layouts share one contract. [`MonoBlockStore`] keeps a block as one file in a
//! tiered directory; [`PagedBlockStore`] splits it into fixed-size pages that can be
//! cached from under-storage one at a time and evicted independently.

mod mono;
mod paged;

pub use mono::MonoBlockStore;
pub use paged::{page_ranges, PageId, PageRange, PagedBlockStore};

use crate::config::BlockStoreType;
use crate::io::{BlockReader, BlockWriter};
use async_trait::async_trait;
use std::path::PathBuf;
use strata_core::{
    BlockId, BlockStoreLocation, CreateBlockOptions, OpenUfsBlockOptions, Result, SessionId,
};

/// Session that owns blocks written while caching from under-storage
pub const UFS_CACHE_SESSION_ID: SessionId = u64::MAX - 1;

/// What a store knows about a committed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    pub block_id: BlockId,
    pub length: u64,
    pub location: BlockStoreLocation,
    pub pinned: bool,
}

#[async_trait]
pub trait BlockStore: Send + Sync {
    fn store_type(&self) -> BlockStoreType;

    /// Allocate a temporary block owned by `session_id` in tier `tier`
    /// (or the tier named by `options.medium_type`)
    async fn create_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        tier: usize,
        options: &CreateBlockOptions,
    ) -> Result<BlockStoreLocation>;

    /// Exclusive writer over a temporary block the session created
    async fn create_block_writer(
        &self,
        session_id: SessionId,
        block_id: BlockId,
    ) -> Result<Box<dyn BlockWriter>>;

    /// Reader positioned at `offset`: local when the block is present, otherwise
    /// served from under-storage when `ufs_options` allows it
    async fn create_block_reader(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        offset: u64,
        position_short: bool,
        ufs_options: Option<&OpenUfsBlockOptions>,
    ) -> Result<Box<dyn BlockReader>>;

    /// Publish a temporary block to readers
    async fn commit_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        pin_on_create: bool,
    ) -> Result<()>;

    /// Discard a temporary block and its reservation
    async fn abort_block(&self, session_id: SessionId, block_id: BlockId) -> Result<()>;

    async fn remove_block(&self, session_id: SessionId, block_id: BlockId) -> Result<()>;

    async fn move_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        medium_type: &str,
    ) -> Result<()>;

    fn has_block(&self, block_id: BlockId) -> bool;

    fn block_meta(&self, block_id: BlockId) -> Option<BlockMeta>;

    /// File backing a block for short-circuit access: the session's temporary
    /// block, else the committed one
    fn local_block_path(&self, session_id: SessionId, block_id: BlockId) -> Option<PathBuf>;

    /// Abort every temporary block of a session
    async fn cleanup_session(&self, session_id: SessionId) -> Result<()>;

    fn committed_blocks(&self) -> Vec<BlockId>;
}

#[cfg(test)]
mod tests;
