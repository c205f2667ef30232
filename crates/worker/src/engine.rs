//! Block storage engine: the worker-facing façade over the active block store.

use crate::config::{BlockStoreType, WorkerConfig};
use crate::fallback::UfsFallback;
use crate::io::{BlockReader, BlockWriter};
use crate::metrics::WorkerMetrics;
use crate::store::{
    BlockMeta, BlockStore, MonoBlockStore, PagedBlockStore, UFS_CACHE_SESSION_ID,
};
use crate::ufs::UfsManager;
use bytes::BytesMut;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::proto::{
    BlockStatus, CacheRequest, LoadBlock, LoadRequest, LoadResponse, TaskStatus,
};
use strata_core::{
    BlockId, BlockStoreLocation, CreateBlockOptions, Error, OpenUfsBlockOptions, Result,
    ResultExt, SessionId, DEFAULT_CHUNK_SIZE,
};
use strata_utils::tracing::block_span;
use tracing::Instrument;

/// Blocks of one load request cached at the same time
const LOAD_CONCURRENCY: usize = 4;

pub struct BlockStorageEngine {
    config: WorkerConfig,
    store: Arc<dyn BlockStore>,
    ufs: Arc<UfsManager>,
    fallback: Arc<UfsFallback>,
    next_session_id: AtomicU64,
    metrics: WorkerMetrics,
}

impl BlockStorageEngine {
    /// Validate `config` and open the store it selects
    pub async fn new(config: WorkerConfig, ufs: Arc<UfsManager>) -> Result<Self> {
        config.validate().context("invalid worker configuration")?;
        let fallback = Arc::new(UfsFallback::new(Arc::clone(&ufs)));
        let store: Arc<dyn BlockStore> = match config.store_type {
            BlockStoreType::Mono => {
                Arc::new(MonoBlockStore::open(&config, Arc::clone(&fallback)).await?)
            }
            BlockStoreType::Paged => {
                Arc::new(PagedBlockStore::open(&config, Arc::clone(&fallback)).await?)
            }
        };
        tracing::info!(store_type = ?config.store_type, "block storage engine started");

        Ok(Self {
            next_session_id: AtomicU64::new(config.session_id_base),
            config,
            store,
            ufs,
            fallback,
            metrics: WorkerMetrics::new(),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store_type(&self) -> BlockStoreType {
        self.store.store_type()
    }

    pub fn ufs_manager(&self) -> &Arc<UfsManager> {
        &self.ufs
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    /// Fallback readers currently holding a slot on `block_id`
    pub fn ufs_readers_in_flight(&self, block_id: BlockId) -> usize {
        self.fallback.in_flight(block_id)
    }

    pub fn new_session_id(&self) -> SessionId {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.metrics.record_error();
            tracing::debug!(error = %e, status = ?e.status(), "block operation failed");
        }
        result
    }

    pub async fn create_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        tier: usize,
        options: &CreateBlockOptions,
    ) -> Result<BlockStoreLocation> {
        let result = self
            .store
            .create_block(session_id, block_id, tier, options)
            .instrument(block_span("create_block", block_id))
            .await;
        if result.is_ok() {
            self.metrics.record_created();
        }
        self.observe(result)
    }

    pub async fn create_block_writer(
        &self,
        session_id: SessionId,
        block_id: BlockId,
    ) -> Result<Box<dyn BlockWriter>> {
        let result = self
            .store
            .create_block_writer(session_id, block_id)
            .instrument(block_span("create_block_writer", block_id))
            .await;
        self.observe(result)
    }

    /// Reader over a block; an unset fallback concurrency takes the worker default
    pub async fn create_block_reader(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        offset: u64,
        position_short: bool,
        ufs_options: Option<&OpenUfsBlockOptions>,
    ) -> Result<Box<dyn BlockReader>> {
        let ufs_options = ufs_options.map(|options| self.with_default_concurrency(options));
        let local = self.store.has_block(block_id);
        let result = self
            .store
            .create_block_reader(
                session_id,
                block_id,
                offset,
                position_short,
                ufs_options.as_ref(),
            )
            .instrument(block_span("create_block_reader", block_id))
            .await;
        if result.is_ok() {
            self.metrics.record_read(local);
        }
        self.observe(result)
    }

    fn with_default_concurrency(&self, options: &OpenUfsBlockOptions) -> OpenUfsBlockOptions {
        let mut options = options.clone();
        if options.max_ufs_read_concurrency == 0 {
            options.max_ufs_read_concurrency = self.config.default_max_ufs_read_concurrency;
        }
        options
    }

    pub async fn commit_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        pin_on_create: bool,
    ) -> Result<()> {
        let result = self
            .store
            .commit_block(session_id, block_id, pin_on_create)
            .instrument(block_span("commit_block", block_id))
            .await;
        if result.is_ok() {
            self.metrics.record_committed();
        }
        self.observe(result)
    }

    pub async fn abort_block(&self, session_id: SessionId, block_id: BlockId) -> Result<()> {
        let result = self
            .store
            .abort_block(session_id, block_id)
            .instrument(block_span("abort_block", block_id))
            .await;
        if result.is_ok() {
            self.metrics.record_aborted();
        }
        self.observe(result)
    }

    pub async fn remove_block(&self, session_id: SessionId, block_id: BlockId) -> Result<()> {
        let result = self
            .store
            .remove_block(session_id, block_id)
            .instrument(block_span("remove_block", block_id))
            .await;
        if result.is_ok() {
            self.metrics.record_removed();
        }
        self.observe(result)
    }

    pub async fn move_block(
        &self,
        session_id: SessionId,
        block_id: BlockId,
        medium_type: &str,
    ) -> Result<()> {
        let result = self
            .store
            .move_block(session_id, block_id, medium_type)
            .instrument(block_span("move_block", block_id))
            .await;
        if result.is_ok() {
            self.metrics.record_moved();
        }
        self.observe(result)
    }

    pub fn has_block(&self, block_id: BlockId) -> bool {
        self.store.has_block(block_id)
    }

    pub fn block_meta(&self, block_id: BlockId) -> Option<BlockMeta> {
        self.store.block_meta(block_id)
    }

    pub fn local_block_path(&self, session_id: SessionId, block_id: BlockId) -> Option<PathBuf> {
        self.store.local_block_path(session_id, block_id)
    }

    pub async fn cleanup_session(&self, session_id: SessionId) -> Result<()> {
        tracing::debug!(session_id, "cleaning up session");
        let result = self.store.cleanup_session(session_id).await;
        self.observe(result)
    }

    pub fn committed_blocks(&self) -> Vec<BlockId> {
        self.store.committed_blocks()
    }

    /// Pull a block from under-storage into the local store
    pub async fn cache_block(&self, request: &CacheRequest) -> Result<()> {
        let result = self
            .cache_from_ufs(request.block_id, &request.open_ufs_block_options, request.block_size)
            .instrument(block_span("cache_block", request.block_id))
            .await;
        self.metrics.record_cache_request(result.is_err());
        self.observe(result)
    }

    async fn cache_from_ufs(
        &self,
        block_id: BlockId,
        options: &OpenUfsBlockOptions,
        block_size: u64,
    ) -> Result<()> {
        if self.store.has_block(block_id) {
            return Ok(());
        }
        let mut options = self.with_default_concurrency(options);
        options.no_cache = false;
        if options.block_size == 0 {
            options.block_size = block_size;
        }
        if !options.is_readable() {
            return Err(Error::invalid_argument(format!(
                "block {block_id} has no readable under-storage location"
            )));
        }

        let mut reader = self
            .store
            .create_block_reader(UFS_CACHE_SESSION_ID, block_id, 0, false, Some(&options))
            .await?;
        // Reading every byte admits every page
        let mut buf = BytesMut::new();
        let mut drained = Ok(());
        loop {
            buf.clear();
            match reader.transfer_to(&mut buf, DEFAULT_CHUNK_SIZE as usize).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    drained = Err(e);
                    break;
                }
            }
        }
        let closed = reader.close().await;
        drained.and(closed)
    }

    /// Load a batch of blocks; failures are reported per block, in request order
    pub async fn load(&self, request: &LoadRequest) -> LoadResponse {
        let block_statuses: Vec<BlockStatus> = stream::iter(request.blocks.iter().cloned())
            .map(|block| async move { self.load_block(&block).await })
            .buffered(LOAD_CONCURRENCY)
            .filter_map(|status| async move { status })
            .collect()
            .await;

        let status = if block_statuses.is_empty() {
            TaskStatus::Success
        } else if block_statuses.len() == request.blocks.len() {
            TaskStatus::Failure
        } else {
            TaskStatus::PartialFailure
        };
        LoadResponse {
            status,
            block_statuses,
        }
    }

    async fn load_block(&self, block: &LoadBlock) -> Option<BlockStatus> {
        let options = OpenUfsBlockOptions {
            ufs_path: block.ufs_path.clone(),
            mount_id: block.mount_id,
            block_size: block.length,
            offset_in_file: block.offset_in_file,
            max_ufs_read_concurrency: 0,
            no_cache: false,
        };
        let result = self
            .cache_from_ufs(block.block_id, &options, block.length)
            .instrument(block_span("load_block", block.block_id))
            .await;
        let e = result.err()?;
        tracing::warn!(block_id = block.block_id, error = %e, "failed to load block");
        self.metrics.record_error();
        Some(BlockStatus {
            block_id: block.block_id,
            code: e.status(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        })
    }

    /// Remove every committed block; blocks in use are skipped and reported
    pub async fn free_worker(&self) -> Result<usize> {
        let mut removed = 0;
        let mut first_error = None;
        for block_id in self.store.committed_blocks() {
            match self.remove_block(UFS_CACHE_SESSION_ID, block_id).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(block_id, error = %e, "block kept while freeing worker");
                    first_error.get_or_insert(e);
                }
            }
        }
        tracing::info!(removed, "worker freed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    pub fn clear_metrics(&self) {
        self.metrics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfigBuilder;
    use crate::ufs::LocalUnderFileSystem;
    use bytes::Bytes;
    use strata_core::MEM_TIER;
    use tempfile::TempDir;

    async fn engine(temp_dir: &TempDir, store_type: BlockStoreType) -> BlockStorageEngine {
        let ufs_root = temp_dir.path().join("ufs");
        std::fs::create_dir_all(&ufs_root).unwrap();
        std::fs::write(ufs_root.join("file"), b"0123456789abcdef").unwrap();

        let manager = Arc::new(UfsManager::new());
        manager.add_mount(1, Arc::new(LocalUnderFileSystem::new(&ufs_root)));
        let config = WorkerConfigBuilder::new()
            .with_store_type(store_type)
            .with_single_dir(MEM_TIER, temp_dir.path().join("mem"), 1024)
            .with_page_size(4)
            .with_page_store(temp_dir.path().join("pages"), 1024)
            .with_session_id_base(100)
            .build()
            .unwrap();
        BlockStorageEngine::new(config, manager).await.unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_with_context() {
        let config = WorkerConfig {
            tiers: Vec::new(),
            ..WorkerConfig::default()
        };
        let err = BlockStorageEngine::new(config, Arc::new(UfsManager::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("invalid worker configuration"));
    }

    #[tokio::test]
    async fn test_session_ids_start_at_base() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, BlockStoreType::Mono).await;
        assert_eq!(engine.new_session_id(), 100);
        assert_eq!(engine.new_session_id(), 101);
    }

    #[tokio::test]
    async fn test_cache_block_admits_block() -> Result<()> {
        for store_type in [BlockStoreType::Mono, BlockStoreType::Paged] {
            let temp_dir = TempDir::new().unwrap();
            let engine = engine(&temp_dir, store_type).await;
            let request = CacheRequest {
                block_id: 5,
                block_size: 8,
                open_ufs_block_options: OpenUfsBlockOptions {
                    ufs_path: "/file".into(),
                    mount_id: 1,
                    offset_in_file: 8,
                    ..Default::default()
                },
                ..Default::default()
            };
            engine.cache_block(&request).await?;
            assert!(engine.has_block(5));

            let mut reader = engine.create_block_reader(1, 5, 0, false, None).await?;
            assert_eq!(&reader.read(0, 8).await?[..], b"89abcdef");
            reader.close().await?;
            assert_eq!(engine.metrics().snapshot().cache_requests, 1);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_load_reports_partial_failure() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, BlockStoreType::Mono).await;
        let request = LoadRequest {
            blocks: vec![
                LoadBlock {
                    block_id: 1,
                    length: 16,
                    ufs_path: "/file".into(),
                    mount_id: 1,
                    offset_in_file: 0,
                },
                LoadBlock {
                    block_id: 2,
                    length: 16,
                    ufs_path: "/file".into(),
                    mount_id: 42,
                    offset_in_file: 0,
                },
            ],
        };
        let response = engine.load(&request).await;
        assert_eq!(response.status, TaskStatus::PartialFailure);
        assert_eq!(response.block_statuses.len(), 1);
        assert_eq!(response.block_statuses[0].block_id, 2);
        assert!(engine.has_block(1));
    }

    #[tokio::test]
    async fn test_free_worker_and_clear_metrics() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, BlockStoreType::Mono).await;
        let session = engine.new_session_id();
        for block_id in [1, 2, 3] {
            engine
                .create_block(session, block_id, 0, &CreateBlockOptions::default())
                .await?;
            let mut writer = engine.create_block_writer(session, block_id).await?;
            writer.append(Bytes::from_static(b"abc")).await?;
            writer.close().await?;
            engine.commit_block(session, block_id, false).await?;
        }
        assert_eq!(engine.metrics().snapshot().blocks_committed, 3);

        assert_eq!(engine.free_worker().await?, 3);
        assert!(engine.committed_blocks().is_empty());

        engine.clear_metrics();
        assert_eq!(engine.metrics().snapshot().blocks_removed, 0);
        Ok(())
    }
}
