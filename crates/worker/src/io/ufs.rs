//! Pass-through reader: serves a block straight from under-storage, caches nothing

use super::{clamp_range, closed_error, BlockReader};
use crate::fallback::{FallbackPermit, UfsFallback};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use strata_core::leak::{self, LeakTracker};
use strata_core::{BlockId, OpenUfsBlockOptions, Result};

pub struct UfsBlockReader {
    block_id: BlockId,
    options: OpenUfsBlockOptions,
    fallback: Arc<UfsFallback>,
    position: u64,
    permit: Option<FallbackPermit>,
    tracker: Option<LeakTracker>,
}

impl UfsBlockReader {
    /// The reader owns `permit` until it is closed
    pub fn new(
        block_id: BlockId,
        options: OpenUfsBlockOptions,
        fallback: Arc<UfsFallback>,
        offset: u64,
        permit: FallbackPermit,
    ) -> Self {
        let position = offset.min(options.block_size);
        Self {
            block_id,
            tracker: leak::track(
                "block reader",
                format!("under-storage block {block_id} at {}", options.ufs_path),
            ),
            options,
            fallback,
            position,
            permit: Some(permit),
        }
    }
}

#[async_trait]
impl BlockReader for UfsBlockReader {
    fn block_id(&self) -> BlockId {
        self.block_id
    }

    fn length(&self) -> u64 {
        self.options.block_size
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, position: u64) {
        self.position = position.min(self.options.block_size);
    }

    fn is_closed(&self) -> bool {
        self.permit.is_none()
    }

    async fn read(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        if self.permit.is_none() {
            return Err(closed_error(self.block_id, "read block"));
        }
        let len = clamp_range(self.block_id, self.options.block_size, offset, len)?;
        self.fallback.read(&self.options, offset, len).await
    }

    async fn close(&mut self) -> Result<()> {
        self.permit = None;
        if let Some(tracker) = self.tracker.take() {
            tracker.close();
        }
        Ok(())
    }
}
