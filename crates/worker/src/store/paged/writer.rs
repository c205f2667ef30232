//! Writer that cuts a block into page files as bytes arrive

use super::PagedStoreInner;
use crate::io::{closed_error, BlockWriter};
use crate::lock::BlockWriteGuard;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::PathBuf;
use std::sync::Arc;
use strata_core::leak::{self, LeakTracker};
use strata_core::{BlockId, Error, Result};
use tokio::fs;

pub struct PagedBlockWriter {
    inner: Arc<PagedStoreInner>,
    block_id: BlockId,
    dir: PathBuf,
    /// Bytes of the page being filled
    buffer: BytesMut,
    page_index: u64,
    position: u64,
    guard: Option<BlockWriteGuard>,
    tracker: Option<LeakTracker>,
}

impl PagedBlockWriter {
    /// Resume a temporary block at `written`, reloading its partial last page
    pub(crate) async fn open(
        inner: Arc<PagedStoreInner>,
        block_id: BlockId,
        written: u64,
        guard: BlockWriteGuard,
    ) -> Result<Self> {
        let page_size = inner.page_size;
        let dir = inner.temp_dir(block_id);
        let page_index = written / page_size;
        let tail = (written % page_size) as usize;

        let mut buffer = BytesMut::new();
        if tail > 0 {
            let path = dir.join(page_index.to_string());
            match fs::read(&path).await {
                Ok(data) => buffer.extend_from_slice(&data[..tail.min(data.len())]),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::file_system(path, "reload partial page", e)),
            }
        }
        // A writer dropped without close never flushed its tail
        let position = page_index * page_size + buffer.len() as u64;
        if position != written {
            tracing::warn!(block_id, written, position, "unflushed bytes of temporary block lost");
            inner.truncate_written(block_id, position);
        }

        Ok(Self {
            dir,
            inner,
            block_id,
            buffer,
            page_index,
            position,
            guard: Some(guard),
            tracker: leak::track("block writer", format!("paged block {block_id}")),
        })
    }

    async fn write_page(&self, page_index: u64, data: &[u8]) -> Result<()> {
        let path = self.dir.join(page_index.to_string());
        match fs::write(&path, data).await {
            Ok(()) => Ok(()),
            Err(e) => Err(Error::file_system(path, "write page", e)),
        }
    }
}

#[async_trait]
impl BlockWriter for PagedBlockWriter {
    fn block_id(&self) -> BlockId {
        self.block_id
    }

    fn position(&self) -> u64 {
        self.position
    }

    async fn append(&mut self, data: Bytes) -> Result<u64> {
        if self.guard.is_none() {
            return Err(closed_error(self.block_id, "append to block"));
        }
        let new_position = self.position + data.len() as u64;
        self.inner
            .ensure_reserved(self.block_id, new_position)
            .await?;

        self.buffer.extend_from_slice(&data);
        let page_size = self.inner.page_size as usize;
        while self.buffer.len() >= page_size {
            let page = self.buffer.split_to(page_size).freeze();
            self.write_page(self.page_index, &page).await?;
            self.page_index += 1;
        }
        self.position = new_position;
        Ok(new_position)
    }

    async fn flush(&mut self) -> Result<()> {
        if self.guard.is_some() && !self.buffer.is_empty() {
            self.write_page(self.page_index, &self.buffer).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let result = self.flush().await;
        self.guard = None;
        if let Some(tracker) = self.tracker.take() {
            tracker.close();
        }
        result
    }
}
