//! Per-block reader/writer locks.
//!
//! Readers share a block; writers, commit, remove, move and eviction need it alone
//! and fail with a conflict instead of waiting. A block's entry lives only while a
//! guard holds it or a reader waits on it.

use dashmap::DashMap;
use std::sync::Arc;
use strata_core::{BlockId, Error, Result};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type LockTable = DashMap<BlockId, Arc<RwLock<()>>>;

pub type BlockReadGuard = BlockLockGuard<OwnedRwLockReadGuard<()>>;
pub type BlockWriteGuard = BlockLockGuard<OwnedRwLockWriteGuard<()>>;

/// Holds a block lock and drops the block's table entry once nobody else uses it
#[derive(Debug)]
pub struct BlockLockGuard<G> {
    guard: Option<G>,
    block_id: BlockId,
    table: Arc<LockTable>,
}

impl<G> Drop for BlockLockGuard<G> {
    fn drop(&mut self) {
        // The guard owns a clone of the lock, release it before counting
        drop(self.guard.take());
        self.table
            .remove_if(&self.block_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Default)]
pub struct BlockLockManager {
    table: Arc<LockTable>,
}

impl BlockLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, block_id: BlockId) -> Arc<RwLock<()>> {
        Arc::clone(self.table.entry(block_id).or_default().value())
    }

    fn wrap<G>(&self, block_id: BlockId, guard: G) -> BlockLockGuard<G> {
        BlockLockGuard {
            guard: Some(guard),
            block_id,
            table: Arc::clone(&self.table),
        }
    }

    /// Shared access; waits only for short exclusive sections
    pub async fn read(&self, block_id: BlockId) -> BlockReadGuard {
        let guard = self.lock_for(block_id).read_owned().await;
        self.wrap(block_id, guard)
    }

    /// Exclusive access, or a conflict naming the attempted operation
    pub fn try_write(&self, block_id: BlockId, operation: &str) -> Result<BlockWriteGuard> {
        match self.lock_for(block_id).try_write_owned() {
            Ok(guard) => Ok(self.wrap(block_id, guard)),
            Err(_) => Err(Error::conflict(
                block_id,
                operation,
                "block is open by a reader or writer",
            )),
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.table.len()
    }
}
