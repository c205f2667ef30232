use super::out_stream::{BlockOutStream, OutStreamOptions};
use crate::context::ClientContext;
use bytes::Bytes;
use std::sync::Arc;
use strata_core::{BlockId, Error, Result, WorkerNetAddress};

/// Blocks and length of a closed [`FileWriter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub blocks: Vec<BlockId>,
    pub length: u64,
}

/// Writes a byte stream as consecutive blocks of `block_size` to one worker.
///
/// Each block holds a pooled client only while its data is sent, so a file may
/// span more blocks than the pool has clients.
pub struct FileWriter {
    context: Arc<ClientContext>,
    address: WorkerNetAddress,
    block_size: u64,
    next_block_id: BlockId,
    options: OutStreamOptions,
    current: Option<BlockOutStream>,
    current_len: u64,
    blocks: Vec<BlockId>,
    length: u64,
}

impl FileWriter {
    pub fn create(
        context: Arc<ClientContext>,
        address: WorkerNetAddress,
        first_block_id: BlockId,
        block_size: u64,
        options: OutStreamOptions,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::invalid_argument("block size must be positive"));
        }
        Ok(Self {
            context,
            address,
            block_size,
            next_block_id: first_block_id,
            options,
            current: None,
            current_len: 0,
            blocks: Vec::new(),
            length: 0,
        })
    }

    /// Bytes accepted so far
    pub fn length(&self) -> u64 {
        self.length
    }

    pub async fn write(&mut self, mut data: Bytes) -> Result<()> {
        while !data.is_empty() {
            if self.current.is_none() {
                self.open_next_block().await?;
            }
            let room = (self.block_size - self.current_len).min(data.len() as u64) as usize;
            let chunk = data.split_to(room);
            if let Some(stream) = self.current.as_mut() {
                stream.write(chunk).await?;
            }

            self.current_len += room as u64;
            self.length += room as u64;
            if self.current_len == self.block_size {
                self.finish_block().await?;
            }
        }
        Ok(())
    }

    /// Commit the last block
    pub async fn close(mut self) -> Result<WrittenFile> {
        self.finish_block().await?;
        tracing::debug!(
            worker = %self.address,
            blocks = self.blocks.len(),
            length = self.length,
            "file written"
        );
        Ok(WrittenFile {
            blocks: std::mem::take(&mut self.blocks),
            length: self.length,
        })
    }

    /// Abandon the block being written; blocks already committed stay
    pub fn cancel(mut self) {
        if let Some(stream) = self.current.take() {
            stream.cancel();
        }
    }

    async fn open_next_block(&mut self) -> Result<()> {
        let block_id = self.next_block_id;
        let options = OutStreamOptions {
            space_to_reserve: self.block_size,
            ..self.options.clone()
        };
        let stream =
            BlockOutStream::create(&self.context, &self.address, block_id, &options).await?;
        self.next_block_id += 1;
        self.blocks.push(block_id);
        self.current_len = 0;
        self.current = Some(stream);
        Ok(())
    }

    async fn finish_block(&mut self) -> Result<()> {
        let Some(stream) = self.current.take() else {
            return Ok(());
        };
        let block_id = stream.block_id();
        let committed = stream.close().await?;
        if committed != self.current_len {
            return Err(Error::transport(
                self.address.endpoint(),
                "write block",
                format!(
                    "block {block_id} committed {committed} bytes, {} were sent",
                    self.current_len
                ),
            ));
        }
        self.current_len = 0;
        Ok(())
    }
}
