//! Block readers and writers handed out by the stores.
//!
//! Every cursor is opened by a store and closed exactly once by its owner. Closing
//! releases file handles, block locks and fallback permits; it never deletes data.
//! A cursor dropped without `close` is reported through the leak detector.

mod local;
mod ufs;

pub use local::{LocalFileBlockReader, LocalFileBlockWriter};
pub use ufs::UfsBlockReader;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use strata_core::{BlockId, Error, Result};

/// Random-access reader over one block
#[async_trait]
pub trait BlockReader: Send + Sync {
    fn block_id(&self) -> BlockId;

    /// Length of the block in bytes
    fn length(&self) -> u64;

    /// Cursor used by `transfer_to`
    fn position(&self) -> u64;

    fn seek(&mut self, position: u64);

    fn is_closed(&self) -> bool;

    /// Read `[offset, offset + len)`; short only at the end of the block.
    /// Does not move the cursor.
    async fn read(&mut self, offset: u64, len: u64) -> Result<Bytes>;

    /// Append up to `max` bytes from the cursor onto `buf`, advancing the cursor.
    /// Returns 0 at the end of the block.
    async fn transfer_to(&mut self, buf: &mut BytesMut, max: usize) -> Result<usize> {
        let position = self.position();
        let chunk = self.read(position, max as u64).await?;
        self.seek(position + chunk.len() as u64);
        buf.extend_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Release everything the reader holds; safe to call twice
    async fn close(&mut self) -> Result<()>;
}

/// Append-only writer over one temporary block
#[async_trait]
pub trait BlockWriter: Send + Sync {
    fn block_id(&self) -> BlockId;

    /// Bytes written so far
    fn position(&self) -> u64;

    /// Append `data`, returning the new position
    async fn append(&mut self, data: Bytes) -> Result<u64>;

    async fn flush(&mut self) -> Result<()>;

    /// Flush and release the block; the block stays temporary until committed
    async fn close(&mut self) -> Result<()>;
}

pub(crate) fn closed_error(block_id: BlockId, operation: &str) -> Error {
    Error::cancelled(operation, format!("block {block_id} cursor is closed"))
}

/// Clamp a read request to the block, rejecting offsets past its end
pub(crate) fn clamp_range(block_id: BlockId, length: u64, offset: u64, len: u64) -> Result<u64> {
    if offset > length {
        return Err(Error::invalid_argument(format!(
            "offset {offset} is past the end of block {block_id} ({length} bytes)"
        )));
    }
    Ok(len.min(length - offset))
}
