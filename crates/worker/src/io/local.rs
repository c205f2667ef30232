//! Cursors over a block stored as one local file

use super::{clamp_range, closed_error, BlockReader, BlockWriter};
use crate::lock::{BlockReadGuard, BlockWriteGuard};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use strata_core::leak::{self, LeakTracker};
use strata_core::{BlockId, Error, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

pub struct LocalFileBlockReader {
    block_id: BlockId,
    path: PathBuf,
    file: Option<File>,
    length: u64,
    position: u64,
    _guard: Option<BlockReadGuard>,
    tracker: Option<LeakTracker>,
}

impl LocalFileBlockReader {
    /// Open a committed block file; `guard` keeps the block from being removed or moved
    pub async fn open(
        block_id: BlockId,
        path: &Path,
        offset: u64,
        guard: BlockReadGuard,
    ) -> Result<Self> {
        let file = match File::open(path).await {
            Ok(f) => f,
            Err(e) => return Err(Error::file_system(path, "open block for reading", e)),
        };
        let length = match file.metadata().await {
            Ok(m) => m.len(),
            Err(e) => return Err(Error::file_system(path, "stat block", e)),
        };
        if offset > length {
            return Err(Error::invalid_argument(format!(
                "offset {offset} is past the end of block {block_id} ({length} bytes)"
            )));
        }

        Ok(Self {
            block_id,
            path: path.to_path_buf(),
            file: Some(file),
            length,
            position: offset,
            _guard: Some(guard),
            tracker: leak::track("block reader", format!("local block {block_id}")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BlockReader for LocalFileBlockReader {
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
        self.file.is_none()
    }

    async fn read(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        let len = clamp_range(self.block_id, self.length, offset, len)?;
        let Some(file) = self.file.as_mut() else {
            return Err(closed_error(self.block_id, "read block"));
        };
        if len == 0 {
            return Ok(Bytes::new());
        }

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::file_system(&self.path, "seek block", e))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| Error::file_system(&self.path, "read block", e))?;
        Ok(Bytes::from(buf))
    }

    async fn close(&mut self) -> Result<()> {
        self.file = None;
        self._guard = None;
        if let Some(tracker) = self.tracker.take() {
            tracker.close();
        }
        Ok(())
    }
}

pub struct LocalFileBlockWriter {
    block_id: BlockId,
    path: PathBuf,
    file: Option<File>,
    position: u64,
    _guard: Option<BlockWriteGuard>,
    tracker: Option<LeakTracker>,
}

impl LocalFileBlockWriter {
    /// Open a temporary block file for appending
    pub async fn open(block_id: BlockId, path: &Path, guard: BlockWriteGuard) -> Result<Self> {
        let file = match OpenOptions::new().append(true).open(path).await {
            Ok(f) => f,
            Err(e) => return Err(Error::file_system(path, "open block for writing", e)),
        };
        let position = match file.metadata().await {
            Ok(m) => m.len(),
            Err(e) => return Err(Error::file_system(path, "stat block", e)),
        };

        Ok(Self {
            block_id,
            path: path.to_path_buf(),
            file: Some(file),
            position,
            _guard: Some(guard),
            tracker: leak::track("block writer", format!("local block {block_id}")),
        })
    }
}

#[async_trait]
impl BlockWriter for LocalFileBlockWriter {
    fn block_id(&self) -> BlockId {
        self.block_id
    }

    fn position(&self) -> u64 {
        self.position
    }

    async fn append(&mut self, data: Bytes) -> Result<u64> {
        let Some(file) = self.file.as_mut() else {
            return Err(closed_error(self.block_id, "append to block"));
        };
        file.write_all(&data)
            .await
            .map_err(|e| Error::file_system(&self.path, "append to block", e))?;
        self.position += data.len() as u64;
        Ok(self.position)
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()
                .await
                .map_err(|e| Error::file_system(&self.path, "flush block", e))?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let result = self.flush().await;
        self.file = None;
        self._guard = None;
        if let Some(tracker) = self.tracker.take() {
            tracker.close();
        }
        result
    }
}
