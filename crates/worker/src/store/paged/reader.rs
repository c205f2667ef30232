//! Page-granular reader. Pages missing locally come from under-storage; the fallback
//! slot is taken on the first miss and held until close.

use super::page::{page_ranges, PageId};
use super::PagedStoreInner;
use crate::fallback::FallbackPermit;
use crate::io::{clamp_range, closed_error, BlockReader};
use crate::lock::BlockReadGuard;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use strata_core::leak::{self, LeakTracker};
use strata_core::{BlockId, Error, OpenUfsBlockOptions, Result};

pub struct PagedBlockReader {
    inner: Arc<PagedStoreInner>,
    block_id: BlockId,
    length: u64,
    position: u64,
    ufs: Option<OpenUfsBlockOptions>,
    permit: Option<FallbackPermit>,
    /// Held for stored blocks only
    _guard: Option<BlockReadGuard>,
    closed: bool,
    tracker: Option<LeakTracker>,
}

impl PagedBlockReader {
    pub(crate) fn new(
        inner: Arc<PagedStoreInner>,
        block_id: BlockId,
        length: u64,
        offset: u64,
        ufs: Option<OpenUfsBlockOptions>,
        guard: Option<BlockReadGuard>,
    ) -> Self {
        Self {
            inner,
            block_id,
            length,
            position: offset,
            ufs,
            permit: None,
            _guard: guard,
            closed: false,
            tracker: leak::track("block reader", format!("paged block {block_id}")),
        }
    }

    async fn load_page(&mut self, page_index: u64) -> Result<Bytes> {
        let page = PageId::new(self.block_id, page_index);
        if let Some(data) = self.inner.read_resident_page(page).await? {
            return Ok(data);
        }
        let Some(options) = self.ufs.as_ref() else {
            return Err(Error::not_found(
                self.block_id,
                format!("page {page_index} is not cached"),
            ));
        };

        if self.permit.is_none() {
            self.permit = Some(self.inner.fallback.acquire(self.block_id, options).await?);
        }
        let page_size = self.inner.page_size;
        let data = self
            .inner
            .fallback
            .read(options, page_index * page_size, page_size)
            .await?;
        if !options.no_cache {
            self.inner
                .admit_page(page, data.clone(), options.block_size)
                .await;
        }
        Ok(data)
    }
}

#[async_trait]
impl BlockReader for PagedBlockReader {
    fn block_id(&self) -> BlockId {
        self.block_id
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, position: u64) {
        self.position = position.min(self.length);
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn read(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        if self.closed {
            return Err(closed_error(self.block_id, "read block"));
        }
        let len = clamp_range(self.block_id, self.length, offset, len)?;
        let mut out = BytesMut::with_capacity(len as usize);

        for range in page_ranges(offset, len, self.inner.page_size) {
            let page = self.load_page(range.page_index).await?;
            let start = range.offset as usize;
            let end = ((range.offset + range.len) as usize).min(page.len());
            if start >= end {
                // Under-storage file ends inside this block
                break;
            }
            out.extend_from_slice(&page[start..end]);
            if end < (range.offset + range.len) as usize {
                break;
            }
        }
        Ok(out.freeze())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.permit = None;
        self._guard = None;
        if let Some(tracker) = self.tracker.take() {
            tracker.close();
        }
        Ok(())
    }
}
