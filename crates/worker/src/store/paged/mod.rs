//! Fixed-size pages, cached and evicted independently.
//!
//! Layout: `<root>/.tmp/<block>/<page>` while temporary, `<root>/<block>/<page>` once
//! committed or admitted from under-storage. Only pages admitted from under-storage
//! are tracked by the evictor; written blocks stay until removed.

mod page;
mod reader;
mod writer;

pub use page::{page_count, page_length, page_ranges, PageId, PageRange};
pub use reader::PagedBlockReader;
pub use writer::PagedBlockWriter;

use super::{BlockMeta, BlockStore};
use crate::config::{BlockStoreType, WorkerConfig};
use crate::eviction::{EvictionPolicy, LruPolicy};
use crate::fallback::UfsFallback;
use crate::io::{BlockReader, BlockWriter};
use crate::lock::BlockLockManager;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{
    BlockId, BlockStoreLocation, CreateBlockOptions, Error, OpenUfsBlockOptions, Result,
    SessionId, TEMP_PAGES_DIR,
};
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageSource {
    Written,
    UnderStorage,
}

#[derive(Debug, Clone)]
struct PagedBlock {
    length: u64,
    source: PageSource,
    pinned: bool,
}

#[derive(Debug, Clone)]
struct TempPagedBlock {
    session_id: SessionId,
    reserved: u64,
    written: u64,
}

pub(crate) struct PagedStoreInner {
    root: PathBuf,
    page_size: u64,
    capacity: u64,
    medium: String,
    used: AtomicU64,
    blocks: DashMap<BlockId, PagedBlock>,
    temp: DashMap<BlockId, TempPagedBlock>,
    pages: DashMap<PageId, u64>,
    admitting: DashMap<PageId, ()>,
    evictor: Box<dyn EvictionPolicy>,
    locks: BlockLockManager,
    fallback: Arc<UfsFallback>,
}

impl PagedStoreInner {
    fn temp_dir(&self, block_id: BlockId) -> PathBuf {
        self.root.join(TEMP_PAGES_DIR).join(block_id.to_string())
    }

    fn block_dir(&self, block_id: BlockId) -> PathBuf {
        self.root.join(block_id.to_string())
    }

    fn page_path(&self, page: PageId) -> PathBuf {
        self.block_dir(page.block_id)
            .join(page.page_index.to_string())
    }

    fn location(&self) -> BlockStoreLocation {
        BlockStoreLocation {
            tier_alias: self.medium.clone(),
            dir_index: 0,
        }
    }

    fn try_add_used(&self, bytes: u64) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= self.capacity)
            })
            .is_ok()
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    /// Reserve `bytes`, evicting cached pages until they fit
    async fn reserve(&self, bytes: u64) -> Result<()> {
        loop {
            if self.try_add_used(bytes) {
                return Ok(());
            }
            if !self.evict_one().await {
                let available = self
                    .capacity
                    .saturating_sub(self.used.load(Ordering::Acquire));
                return Err(Error::capacity(
                    bytes,
                    available,
                    self.root.display().to_string(),
                ));
            }
        }
    }

    /// Evict the least recently used page whose block nobody holds
    async fn evict_one(&self) -> bool {
        for page in self.evictor.eviction_candidates() {
            let Ok(_guard) = self.locks.try_write(page.block_id, "evict page") else {
                continue;
            };
            self.evictor.on_remove(page);
            let Some((_, size)) = self.pages.remove(&page) else {
                continue;
            };

            let path = self.page_path(page);
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete evicted page");
                }
            }
            self.release(size);

            let block_id = page.block_id;
            if !self.pages.iter().any(|p| p.key().block_id == block_id) {
                self.blocks
                    .remove_if(&block_id, |_, b| b.source == PageSource::UnderStorage);
                let _ = fs::remove_dir(self.block_dir(block_id)).await;
            }
            tracing::debug!(block_id, page_index = page.page_index, size, "page evicted");
            return true;
        }
        false
    }

    /// Grow a temporary block's reservation to cover `written` bytes
    async fn ensure_reserved(&self, block_id: BlockId, written: u64) -> Result<()> {
        let missing = match self.temp.get_mut(&block_id) {
            Some(mut temp) => {
                temp.written = written;
                written.saturating_sub(temp.reserved)
            }
            None => return Err(Error::not_found(block_id, "temporary block was discarded")),
        };
        if missing > 0 {
            self.reserve(missing).await?;
            match self.temp.get_mut(&block_id) {
                Some(mut temp) => temp.reserved += missing,
                None => self.release(missing),
            }
        }
        Ok(())
    }

    fn truncate_written(&self, block_id: BlockId, written: u64) {
        if let Some(mut temp) = self.temp.get_mut(&block_id) {
            temp.written = written;
        }
    }

    fn is_resident(&self, block_id: BlockId, length: u64) -> bool {
        (0..page_count(length, self.page_size))
            .all(|i| self.pages.contains_key(&PageId::new(block_id, i)))
    }

    /// Forget every resident page of a block, returning the bytes released
    fn purge_pages(&self, block_id: BlockId) -> u64 {
        let resident: Vec<PageId> = self
            .pages
            .iter()
            .map(|p| *p.key())
            .filter(|p| p.block_id == block_id)
            .collect();
        let mut released = 0;
        for page in resident {
            if let Some((_, size)) = self.pages.remove(&page) {
                self.evictor.on_remove(page);
                self.release(size);
                released += size;
            }
        }
        released
    }

    async fn read_resident_page(&self, page: PageId) -> Result<Option<Bytes>> {
        if !self.pages.contains_key(&page) {
            return Ok(None);
        }
        let path = self.page_path(page);
        match fs::read(&path).await {
            Ok(data) => {
                self.evictor.on_access(page);
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::file_system(path, "read page", e)),
        }
    }

    /// Best effort: a page that cannot be admitted is still served to the reader
    async fn admit_page(&self, page: PageId, data: Bytes, block_length: u64) {
        if self.pages.contains_key(&page) || self.temp.contains_key(&page.block_id) {
            return;
        }
        if self.admitting.insert(page, ()).is_some() {
            return;
        }

        let size = data.len() as u64;
        let admitted = async {
            self.reserve(size).await?;
            let written = async {
                fs::create_dir_all(self.block_dir(page.block_id)).await?;
                fs::write(self.page_path(page), &data).await?;
                Ok::<(), std::io::Error>(())
            }
            .await;
            if let Err(e) = written {
                self.release(size);
                return Err(Error::file_system(self.page_path(page), "admit page", e));
            }
            Ok::<(), Error>(())
        }
        .await;

        match admitted {
            Ok(()) => {
                self.blocks.entry(page.block_id).or_insert(PagedBlock {
                    length: block_length,
                    source: PageSource::UnderStorage,
                    pinned: false,
                });
                self.pages.insert(page, size);
                self.evictor.on_insert(page, size);
                tracing::trace!(block_id = page.block_id, page_index = page.page_index, "page admitted");
            }
            Err(e) => {
                tracing::warn!(
                    block_id = page.block_id,
                    page_index = page.page_index,
                    error = %e,
                    "page not admitted into cache"
                );
            }
        }
        self.admitting.remove(&page);
    }

    fn temp_block(&self, session_id: SessionId, block_id: BlockId) -> Result<TempPagedBlock> {
        match self.temp.get(&block_id) {
            Some(temp) if temp.session_id == session_id => Ok(temp.clone()),
            _ => Err(Error::not_found(
                block_id,
                format!("no temporary block for session {session_id}"),
            )),
        }
    }

    async fn delete_temp(&self, block_id: BlockId, temp: &TempPagedBlock) -> Result<()> {
        let dir = self.temp_dir(block_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::file_system(dir, "delete temporary pages", e)),
        }
        self.temp.remove(&block_id);
        self.release(temp.reserved);
        Ok(())
    }
}

pub struct PagedBlockStore {
    inner: Arc<PagedStoreInner>,
}

impl PagedBlockStore {
    /// Open the page store; temporary pages left by a previous run are discarded
    pub async fn open(config: &WorkerConfig, fallback: Arc<UfsFallback>) -> Result<Self> {
        let root = config.page_store_dir.clone();
        let temp_root = root.join(TEMP_PAGES_DIR);
        match fs::remove_dir_all(&temp_root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::file_system(temp_root, "clear temporary pages", e)),
        }
        if let Err(e) = fs::create_dir_all(&temp_root).await {
            return Err(Error::file_system(temp_root, "create page store", e));
        }
        tracing::info!(
            root = %root.display(),
            page_size = config.page_size,
            capacity = config.page_store_capacity_bytes,
            "paged block store opened"
        );

        Ok(Self {
            inner: Arc::new(PagedStoreInner {
                root,
                page_size: config.page_size,
                capacity: config.page_store_capacity_bytes,
                medium: config.page_store_medium.clone(),
                used: AtomicU64::new(0),
                blocks: DashMap::new(),
                temp: DashMap::new(),
                pages: DashMap::new(),
                admitting: DashMap::new(),
                evictor: Box::new(LruPolicy::new()),
                locks: BlockLockManager::new(),
                fallback,
            }),
        })
    }

    pub fn page_size(&self) -> u64 {
        self.inner.page_size
    }

    /// Bytes reserved by temporary blocks and held by resident pages
    pub fn used_bytes(&self) -> u64 {
        self.inner.used.load(Ordering::Acquire)
    }

    pub fn is_page_cached(&self, page: PageId) -> bool {
        self.inner.pages.contains_key(&page)
    }

    #[cfg(test)]
    pub(crate) fn lock_entries(&self) -> usize {
        self.inner.locks.tracked()
    }
}

#[async_trait]
impl BlockStore for PagedBlockStore {
    fn store_type(&self) -> BlockStoreType {
        BlockStoreType::Paged
    }

    async fn create_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        _tier: usize,
        options: &CreateBlockOptions,
    ) -> Result<BlockStoreLocation> {
        let inner = &self.inner;
        match inner.temp.entry(block_id) {
            Entry::Occupied(_) => {
                return Err(Error::conflict(
                    block_id,
                    "create block",
                    "a temporary block with this id exists",
                ));
            }
            Entry::Vacant(vacant) => {
                if inner.blocks.contains_key(&block_id) {
                    return Err(Error::conflict(block_id, "create block", "block is stored"));
                }
                vacant.insert(TempPagedBlock {
                    session_id,
                    reserved: 0,
                    written: 0,
                });
            }
        }

        if let Err(e) = inner.reserve(options.initial_size).await {
            inner.temp.remove(&block_id);
            return Err(e);
        }
        if let Some(mut temp) = inner.temp.get_mut(&block_id) {
            temp.reserved = options.initial_size;
        }

        let dir = inner.temp_dir(block_id);
        if let Err(e) = fs::create_dir_all(&dir).await {
            inner.temp.remove(&block_id);
            inner.release(options.initial_size);
            return Err(Error::file_system(dir, "create temporary pages", e));
        }
        Ok(inner.location())
    }

    async fn create_block_writer(
        &self,
        session_id: SessionId,
        block_id: BlockId,
    ) -> Result<Box<dyn BlockWriter>> {
        let temp = self.inner.temp_block(session_id, block_id)?;
        let guard = self.inner.locks.try_write(block_id, "open block writer")?;
        let writer =
            PagedBlockWriter::open(Arc::clone(&self.inner), block_id, temp.written, guard).await?;
        Ok(Box::new(writer))
    }

    async fn create_block_reader(
        &self,
        _session_id: SessionId,
        block_id: BlockId,
        offset: u64,
        _position_short: bool,
        ufs_options: Option<&OpenUfsBlockOptions>,
    ) -> Result<Box<dyn BlockReader>> {
        let ufs = ufs_options.filter(|o| o.is_readable()).cloned();
        // Only stored blocks are locked; anything else is served from under-storage
        let guard = if self.inner.blocks.contains_key(&block_id) {
            Some(self.inner.locks.read(block_id).await)
        } else {
            None
        };
        let meta = self.inner.blocks.get(&block_id).map(|b| b.clone());

        let (length, ufs) = match (meta, ufs) {
            (Some(meta), _) if meta.source == PageSource::Written => (meta.length, None),
            (_, Some(options)) => (options.block_size, Some(options)),
            (Some(meta), None) if self.inner.is_resident(block_id, meta.length) => {
                (meta.length, None)
            }
            _ => {
                return Err(Error::not_found(block_id, "block is not stored on this worker"));
            }
        };
        if offset > length {
            return Err(Error::invalid_argument(format!(
                "offset {offset} is past the end of block {block_id} ({length} bytes)"
            )));
        }

        Ok(Box::new(PagedBlockReader::new(
            Arc::clone(&self.inner),
            block_id,
            length,
            offset,
            ufs,
            guard,
        )))
    }

    async fn commit_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        pin_on_create: bool,
    ) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.locks.try_write(block_id, "commit block")?;
        let temp = inner.temp_block(session_id, block_id)?;
        let length = temp.written;

        let destination = inner.block_dir(block_id);
        if inner.purge_pages(block_id) > 0 || fs::metadata(&destination).await.is_ok() {
            if let Err(e) = fs::remove_dir_all(&destination).await {
                return Err(Error::file_system(destination, "replace cached pages", e));
            }
        }
        let source = inner.temp_dir(block_id);
        if let Err(e) = fs::rename(&source, &destination).await {
            return Err(Error::file_system(source, "publish pages", e));
        }

        for page_index in 0..page_count(length, inner.page_size) {
            inner.pages.insert(
                PageId::new(block_id, page_index),
                page_length(length, inner.page_size, page_index),
            );
        }
        if length > temp.reserved {
            inner.used.fetch_add(length - temp.reserved, Ordering::AcqRel);
        } else {
            inner.release(temp.reserved - length);
        }
        inner.blocks.insert(
            block_id,
            PagedBlock {
                length,
                source: PageSource::Written,
                pinned: pin_on_create,
            },
        );
        inner.temp.remove(&block_id);
        tracing::debug!(block_id, session_id, length, "paged block committed");
        Ok(())
    }

    async fn abort_block(&self, session_id: SessionId, block_id: BlockId) -> Result<()> {
        let _guard = self.inner.locks.try_write(block_id, "abort block")?;
        let temp = self.inner.temp_block(session_id, block_id)?;
        self.inner.delete_temp(block_id, &temp).await
    }

    async fn remove_block(&self, session_id: SessionId, block_id: BlockId) -> Result<()> {
        let inner = &self.inner;
        let guard = inner.locks.try_write(block_id, "remove block")?;
        if inner.blocks.contains_key(&block_id) {
            let dir = inner.block_dir(block_id);
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::file_system(dir, "remove block", e)),
            }
            inner.purge_pages(block_id);
            inner.blocks.remove(&block_id);
        } else {
            let temp = inner.temp.get(&block_id).map(|t| t.clone());
            match temp {
                Some(temp) => inner.delete_temp(block_id, &temp).await?,
                None => return Err(Error::not_found(block_id, "nothing to remove")),
            }
        }
        drop(guard);
        tracing::debug!(block_id, session_id, "paged block removed");
        Ok(())
    }

    async fn move_block(
        &self,
        _session_id: SessionId,
        block_id: BlockId,
        medium_type: &str,
    ) -> Result<()> {
        let _guard = self.inner.locks.try_write(block_id, "move block")?;
        if !self.inner.blocks.contains_key(&block_id) {
            return Err(Error::not_found(block_id, "only stored blocks can be moved"));
        }
        if medium_type == self.inner.medium {
            return Ok(());
        }
        Err(Error::unimplemented(
            "move block",
            format!(
                "paged store keeps every block on {}",
                self.inner.medium
            ),
        ))
    }

    fn has_block(&self, block_id: BlockId) -> bool {
        match self.inner.blocks.get(&block_id).map(|b| b.clone()) {
            Some(meta) if meta.source == PageSource::Written => true,
            Some(meta) => self.inner.is_resident(block_id, meta.length),
            None => false,
        }
    }

    fn block_meta(&self, block_id: BlockId) -> Option<BlockMeta> {
        self.inner.blocks.get(&block_id).map(|b| BlockMeta {
            block_id,
            length: b.length,
            location: self.inner.location(),
            pinned: b.pinned,
        })
    }

    fn local_block_path(&self, _session_id: SessionId, _block_id: BlockId) -> Option<PathBuf> {
        None
    }

    async fn cleanup_session(&self, session_id: SessionId) -> Result<()> {
        let blocks: Vec<BlockId> = self
            .inner
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
        self.inner.blocks.iter().map(|b| *b.key()).collect()
    }
}
