//! One contiguous file per block, spread over tiered directories.
//!
//! Layout: `<dir>/.tmp_blocks/<session>/<block>` while temporary, `<dir>/<block>` once
//! committed.

use super::{BlockMeta, BlockStore, UFS_CACHE_SESSION_ID};
use crate::config::{BlockStoreType, WorkerConfig};
use crate::fallback::UfsFallback;
use crate::io::{
    BlockReader, BlockWriter, LocalFileBlockReader, LocalFileBlockWriter, UfsBlockReader,
};
use crate::lock::BlockLockManager;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{
    BlockId, BlockStoreLocation, CreateBlockOptions, Error, OpenUfsBlockOptions, Result,
    SessionId, TEMP_BLOCKS_DIR,
};
use tokio::fs;

struct StorageDir {
    tier_alias: String,
    dir_index: usize,
    path: PathBuf,
    capacity: u64,
    used: AtomicU64,
}

impl StorageDir {
    fn try_reserve(&self, bytes: u64) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= self.capacity)
            })
            .is_ok()
    }

    fn force_reserve(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::AcqRel);
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    fn available(&self) -> u64 {
        self.capacity
            .saturating_sub(self.used.load(Ordering::Acquire))
    }

    fn location(&self) -> BlockStoreLocation {
        BlockStoreLocation {
            tier_alias: self.tier_alias.clone(),
            dir_index: self.dir_index,
        }
    }

    fn temp_path(&self, session_id: SessionId, block_id: BlockId) -> PathBuf {
        self.path
            .join(TEMP_BLOCKS_DIR)
            .join(session_id.to_string())
            .join(block_id.to_string())
    }

    fn block_path(&self, block_id: BlockId) -> PathBuf {
        self.path.join(block_id.to_string())
    }
}

#[derive(Clone)]
struct TempBlock {
    session_id: SessionId,
    dir: Arc<StorageDir>,
    path: PathBuf,
    reserved: u64,
}

#[derive(Clone)]
struct CommittedBlock {
    dir: Arc<StorageDir>,
    path: PathBuf,
    length: u64,
    pinned: bool,
}

pub struct MonoBlockStore {
    tiers: Vec<Vec<Arc<StorageDir>>>,
    temp: DashMap<BlockId, TempBlock>,
    committed: DashMap<BlockId, CommittedBlock>,
    locks: BlockLockManager,
    fallback: Arc<UfsFallback>,
}

impl MonoBlockStore {
    /// Create the tier directories and an empty store over them
    pub async fn open(config: &WorkerConfig, fallback: Arc<UfsFallback>) -> Result<Self> {
        let mut tiers = Vec::with_capacity(config.tiers.len());
        for tier in &config.tiers {
            let mut dirs = Vec::with_capacity(tier.dirs.len());
            for (dir_index, dir) in tier.dirs.iter().enumerate() {
                if let Err(e) = fs::create_dir_all(&dir.path).await {
                    return Err(Error::file_system(&dir.path, "create tier directory", e));
                }
                dirs.push(Arc::new(StorageDir {
                    tier_alias: tier.alias.clone(),
                    dir_index,
                    path: dir.path.clone(),
                    capacity: dir.capacity_bytes,
                    used: AtomicU64::new(0),
                }));
            }
            tiers.push(dirs);
        }
        tracing::info!(tiers = tiers.len(), "mono block store opened");

        Ok(Self {
            tiers,
            temp: DashMap::new(),
            committed: DashMap::new(),
            locks: BlockLockManager::new(),
            fallback,
        })
    }

    fn tier_by_alias(&self, alias: &str) -> Option<&[Arc<StorageDir>]> {
        self.tiers
            .iter()
            .find(|dirs| dirs.first().is_some_and(|d| d.tier_alias == alias))
            .map(Vec::as_slice)
    }

    fn select_tier(&self, tier: usize, options: &CreateBlockOptions) -> Result<&[Arc<StorageDir>]> {
        match options.medium_type.as_deref() {
            Some(medium) => self.tier_by_alias(medium).ok_or_else(|| {
                Error::invalid_argument(format!("no tier with medium type {medium}"))
            }),
            None => self
                .tiers
                .get(tier)
                .map(Vec::as_slice)
                .ok_or_else(|| Error::invalid_argument(format!("no tier at ordinal {tier}"))),
        }
    }

    /// Claim the block id and reserve space without touching the disk
    fn register_temp(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        dirs: &[Arc<StorageDir>],
        initial_size: u64,
    ) -> Result<TempBlock> {
        match self.temp.entry(block_id) {
            Entry::Occupied(_) => Err(Error::conflict(
                block_id,
                "create block",
                "a temporary block with this id exists",
            )),
            Entry::Vacant(vacant) => {
                if self.committed.contains_key(&block_id) {
                    return Err(Error::conflict(block_id, "create block", "block is committed"));
                }
                let Some(dir) = dirs.iter().find(|d| d.try_reserve(initial_size)) else {
                    let available = dirs.iter().map(|d| d.available()).max().unwrap_or(0);
                    let alias = dirs.first().map(|d| d.tier_alias.as_str()).unwrap_or("");
                    return Err(Error::capacity(initial_size, available, alias));
                };
                let temp = TempBlock {
                    session_id,
                    dir: Arc::clone(dir),
                    path: dir.temp_path(session_id, block_id),
                    reserved: initial_size,
                };
                vacant.insert(temp.clone());
                Ok(temp)
            }
        }
    }

    fn temp_block(&self, session_id: SessionId, block_id: BlockId) -> Result<TempBlock> {
        match self.temp.get(&block_id) {
            Some(temp) if temp.session_id == session_id => Ok(temp.clone()),
            _ => Err(Error::not_found(
                block_id,
                format!("no temporary block for session {session_id}"),
            )),
        }
    }

    async fn open_local_reader(
        &self,
        block_id: BlockId,
        offset: u64,
    ) -> Result<Option<LocalFileBlockReader>> {
        if !self.committed.contains_key(&block_id) {
            return Ok(None);
        }
        let guard = self.locks.read(block_id).await;
        // Removed or moved while we waited for the lock
        let path = self.committed.get(&block_id).map(|b| b.path.clone());
        match path {
            Some(path) => Ok(Some(
                LocalFileBlockReader::open(block_id, &path, offset, guard).await?,
            )),
            None => Ok(None),
        }
    }

    /// Fetch the whole block from under-storage and commit it locally
    async fn cache_from_ufs(&self, block_id: BlockId, options: &OpenUfsBlockOptions) -> Result<()> {
        let data = self.fallback.read(options, 0, options.block_size).await?;
        let create = CreateBlockOptions::new(None, data.len() as u64);
        self.create_block(UFS_CACHE_SESSION_ID, block_id, 0, &create)
            .await?;

        let mut writer = match self
            .create_block_writer(UFS_CACHE_SESSION_ID, block_id)
            .await
        {
            Ok(writer) => writer,
            Err(e) => {
                self.abort_quietly(UFS_CACHE_SESSION_ID, block_id).await;
                return Err(e);
            }
        };
        let written = writer.append(data).await;
        let closed = writer.close().await;
        if let Err(e) = written.and(closed) {
            self.abort_quietly(UFS_CACHE_SESSION_ID, block_id).await;
            return Err(e);
        }

        if let Err(e) = self
            .commit_block(UFS_CACHE_SESSION_ID, block_id, false)
            .await
        {
            self.abort_quietly(UFS_CACHE_SESSION_ID, block_id).await;
            return Err(e);
        }
        tracing::debug!(block_id, "block cached from under-storage");
        Ok(())
    }

    async fn abort_quietly(&self, session_id: SessionId, block_id: BlockId) {
        if let Err(e) = self.abort_block(session_id, block_id).await {
            tracing::warn!(block_id, session_id, error = %e, "failed to abort temporary block");
        }
    }

    #[cfg(test)]
    pub(crate) fn lock_entries(&self) -> usize {
        self.locks.tracked()
    }

    async fn delete_temp(&self, block_id: BlockId, temp: &TempBlock) -> Result<()> {
        match fs::remove_file(&temp.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::file_system(&temp.path, "delete temporary block", e)),
        }
        self.temp.remove(&block_id);
        temp.dir.release(temp.reserved);
        Ok(())
    }
}

#[async_trait]
impl BlockStore for MonoBlockStore {
    fn store_type(&self) -> BlockStoreType {
        BlockStoreType::Mono
    }

    async fn create_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        tier: usize,
        options: &CreateBlockOptions,
    ) -> Result<BlockStoreLocation> {
        let dirs = self.select_tier(tier, options)?;
        let temp = self.register_temp(session_id, block_id, dirs, options.initial_size)?;

        let created = async {
            if let Some(parent) = temp.path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::File::create(&temp.path).await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(e) = created {
            self.temp.remove(&block_id);
            temp.dir.release(temp.reserved);
            return Err(Error::file_system(&temp.path, "create temporary block", e));
        }
        Ok(temp.dir.location())
    }

    async fn create_block_writer(
        &self,
        session_id: SessionId,
        block_id: BlockId,
    ) -> Result<Box<dyn BlockWriter>> {
        let temp = self.temp_block(session_id, block_id)?;
        let guard = self.locks.try_write(block_id, "open block writer")?;
        let writer = LocalFileBlockWriter::open(block_id, &temp.path, guard).await?;
        Ok(Box::new(writer))
    }

    async fn create_block_reader(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        offset: u64,
        position_short: bool,
        ufs_options: Option<&OpenUfsBlockOptions>,
    ) -> Result<Box<dyn BlockReader>> {
        if let Some(reader) = self.open_local_reader(block_id, offset).await? {
            return Ok(Box::new(reader));
        }
        let Some(options) = ufs_options.filter(|o| o.is_readable()) else {
            return Err(Error::not_found(block_id, "block is not stored on this worker"));
        };

        let permit = self.fallback.acquire(block_id, options).await?;
        // Another fallback reader may have cached it while we waited
        if let Some(reader) = self.open_local_reader(block_id, offset).await? {
            return Ok(Box::new(reader));
        }

        if !options.no_cache && !position_short {
            match self.cache_from_ufs(block_id, options).await {
                Ok(()) => {
                    if let Some(reader) = self.open_local_reader(block_id, offset).await? {
                        return Ok(Box::new(reader));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        block_id,
                        session_id,
                        error = %e,
                        "caching block from under-storage failed, reading through"
                    );
                }
            }
        }

        Ok(Box::new(UfsBlockReader::new(
            block_id,
            options.clone(),
            Arc::clone(&self.fallback),
            offset,
            permit,
        )))
    }

    async fn commit_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        pin_on_create: bool,
    ) -> Result<()> {
        let _guard = self.locks.try_write(block_id, "commit block")?;
        let temp = self.temp_block(session_id, block_id)?;
        let final_path = temp.dir.block_path(block_id);

        if let Err(e) = fs::rename(&temp.path, &final_path).await {
            return Err(Error::file_system(&temp.path, "publish block", e));
        }
        let length = match fs::metadata(&final_path).await {
            Ok(m) => m.len(),
            Err(e) => return Err(Error::file_system(&final_path, "stat committed block", e)),
        };
        if length > temp.reserved {
            temp.dir.force_reserve(length - temp.reserved);
        } else {
            temp.dir.release(temp.reserved - length);
        }

        self.committed.insert(
            block_id,
            CommittedBlock {
                dir: Arc::clone(&temp.dir),
                path: final_path,
                length,
                pinned: pin_on_create,
            },
        );
        self.temp.remove(&block_id);
        tracing::debug!(block_id, session_id, length, "block committed");
        Ok(())
    }

    async fn abort_block(&self, session_id: SessionId, block_id: BlockId) -> Result<()> {
        let _guard = self.locks.try_write(block_id, "abort block")?;
        let temp = self.temp_block(session_id, block_id)?;
        self.delete_temp(block_id, &temp).await
    }

    async fn remove_block(&self, session_id: SessionId, block_id: BlockId) -> Result<()> {
        let guard = self.locks.try_write(block_id, "remove block")?;
        let committed = self.committed.get(&block_id).map(|b| b.clone());
        match committed {
            Some(block) => {
                match fs::remove_file(&block.path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::file_system(&block.path, "remove block", e)),
                }
                self.committed.remove(&block_id);
                block.dir.release(block.length);
            }
            None => {
                let temp = self.temp.get(&block_id).map(|t| t.clone());
                match temp {
                    Some(temp) => self.delete_temp(block_id, &temp).await?,
                    None => return Err(Error::not_found(block_id, "nothing to remove")),
                }
            }
        }
        drop(guard);
        tracing::debug!(block_id, session_id, "block removed");
        Ok(())
    }

    async fn move_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        medium_type: &str,
    ) -> Result<()> {
        let _guard = self.locks.try_write(block_id, "move block")?;
        let Some(block) = self.committed.get(&block_id).map(|b| b.clone()) else {
            return Err(Error::not_found(block_id, "only committed blocks can be moved"));
        };
        let Some(dirs) = self.tier_by_alias(medium_type) else {
            return Err(Error::invalid_argument(format!(
                "no tier with medium type {medium_type}"
            )));
        };
        if block.dir.tier_alias == medium_type {
            return Ok(());
        }

        let Some(target) = dirs.iter().find(|d| d.try_reserve(block.length)) else {
            let available = dirs.iter().map(|d| d.available()).max().unwrap_or(0);
            return Err(Error::capacity(block.length, available, medium_type));
        };
        let destination = target.block_path(block_id);
        if fs::rename(&block.path, &destination).await.is_err() {
            // Tiers on different devices
            let copied = async {
                fs::copy(&block.path, &destination).await?;
                fs::remove_file(&block.path).await?;
                Ok::<(), std::io::Error>(())
            }
            .await;
            if let Err(e) = copied {
                let _ = fs::remove_file(&destination).await;
                target.release(block.length);
                return Err(Error::file_system(&destination, "move block", e));
            }
        }

        self.committed.insert(
            block_id,
            CommittedBlock {
                dir: Arc::clone(target),
                path: destination,
                ..block.clone()
            },
        );
        block.dir.release(block.length);
        tracing::debug!(block_id, session_id, to = medium_type, "block moved");
        Ok(())
    }

    fn has_block(&self, block_id: BlockId) -> bool {
        self.committed.contains_key(&block_id)
    }

    fn block_meta(&self, block_id: BlockId) -> Option<BlockMeta> {
        self.committed.get(&block_id).map(|b| BlockMeta {
            block_id,
            length: b.length,
            location: b.dir.location(),
            pinned: b.pinned,
        })
    }

    fn local_block_path(&self, session_id: SessionId, block_id: BlockId) -> Option<PathBuf> {
        if let Some(temp) = self.temp.get(&block_id) {
            if temp.session_id == session_id {
                return Some(temp.path.clone());
            }
        }
        self.committed.get(&block_id).map(|b| b.path.clone())
    }

    async fn cleanup_session(&self, session_id: SessionId) -> Result<()> {
        let blocks: Vec<BlockId> = self
            .temp
            .iter()
            .filter(|t| t.session_id == session_id)
            .map(|t| *t.key())
            .collect();
        let mut first_error = None;
        for block_id in blocks {
            if let Err(e) = self.abort_block(session_id, block_id).await {
                tracing::warn!(block_id, session_id, error = %e, "session cleanup could not abort block");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn committed_blocks(&self) -> Vec<BlockId> {
        self.committed.iter().map(|b| *b.key()).collect()
    }
}
