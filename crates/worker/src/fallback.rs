//! Under-storage fallback reads and their per-block concurrency cap.

use crate::ufs::UfsManager;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use strata_core::{BlockId, Error, OpenUfsBlockOptions, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
struct BlockLimit {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

type LimitTable = Arc<DashMap<BlockId, BlockLimit>>;

/// Shared by every store on a worker; one semaphore per block with fallback readers
pub struct UfsFallback {
    ufs: Arc<UfsManager>,
    limits: LimitTable,
}

impl UfsFallback {
    pub fn new(ufs: Arc<UfsManager>) -> Self {
        Self {
            ufs,
            limits: Arc::new(DashMap::new()),
        }
    }

    pub fn ufs(&self) -> &Arc<UfsManager> {
        &self.ufs
    }

    /// Wait for a fallback slot on `block_id`.
    ///
    /// The first reader of a block fixes its limit; later readers queue FIFO behind it.
    pub async fn acquire(
        &self,
        block_id: BlockId,
        options: &OpenUfsBlockOptions,
    ) -> Result<FallbackPermit> {
        let semaphore = {
            let entry = self.limits.entry(block_id).or_insert_with(|| {
                let limit = options.concurrency_limit();
                BlockLimit {
                    semaphore: Arc::new(Semaphore::new(limit)),
                    limit,
                }
            });
            Arc::clone(&entry.semaphore)
        };

        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                return Err(Error::cancelled("acquire fallback permit", e.to_string()));
            }
        };
        tracing::trace!(block_id, "fallback permit acquired");

        Ok(FallbackPermit {
            block_id,
            permit: Some(permit),
            semaphore,
            limits: Arc::clone(&self.limits),
        })
    }

    /// Fallback readers currently holding a slot on `block_id`
    pub fn in_flight(&self, block_id: BlockId) -> usize {
        self.limits
            .get(&block_id)
            .map(|l| l.limit.saturating_sub(l.semaphore.available_permits()))
            .unwrap_or(0)
    }

    /// Read `[offset, offset + len)` of the block, clamped to the block size
    pub async fn read(
        &self,
        options: &OpenUfsBlockOptions,
        offset: u64,
        len: u64,
    ) -> Result<Bytes> {
        if offset >= options.block_size {
            return Ok(Bytes::new());
        }
        let len = len.min(options.block_size - offset);
        let ufs = self.ufs.get(options.mount_id)?;
        ufs.read_range(&options.ufs_path, options.offset_in_file + offset, len)
            .await
    }
}

/// A held fallback slot; dropping it wakes one waiter
pub struct FallbackPermit {
    block_id: BlockId,
    permit: Option<OwnedSemaphorePermit>,
    semaphore: Arc<Semaphore>,
    limits: LimitTable,
}

impl FallbackPermit {
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }
}

impl Drop for FallbackPermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        // The table and this permit are the last owners: nobody waits on the block.
        let semaphore = &self.semaphore;
        self.limits.remove_if(&self.block_id, |_, limit| {
            Arc::ptr_eq(&limit.semaphore, semaphore) && Arc::strong_count(semaphore) == 2
        });
    }
}
