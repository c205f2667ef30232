use crate::context::ClientContext;
use crate::pool::PooledWorkerClient;
use bytes::Bytes;
use std::sync::Arc;
use strata_core::proto::{WriteRequest, WriteRequestCommand, WriteResponse};
use strata_core::rpc::{
    response_channel, DataMessageMarshaller, RequestSink, ResponseObserver, ResponseStream,
};
use strata_core::{BlockId, Error, Result, WorkerNetAddress};

/// How a block is created on the worker
#[derive(Clone, Default)]
pub struct OutStreamOptions {
    pub medium_type: Option<String>,
    pub space_to_reserve: u64,
    pub pin_on_create: bool,
    /// Encoding override for the write requests of the stream
    pub marshaller: Option<Arc<dyn DataMessageMarshaller<WriteRequest>>>,
}

impl std::fmt::Debug for OutStreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutStreamOptions")
            .field("medium_type", &self.medium_type)
            .field("space_to_reserve", &self.space_to_reserve)
            .field("pin_on_create", &self.pin_on_create)
            .field("marshaller", &self.marshaller.is_some())
            .finish()
    }
}

/// Writes one block to a worker.
///
/// The pooled client is held only while data flows. [`close`](Self::close) hands it
/// back to the pool before waiting for the worker to commit.
pub struct BlockOutStream {
    block_id: BlockId,
    address: WorkerNetAddress,
    // Dropped before `requests`, so an unclosed stream is abandoned instead of committed
    responses: ResponseStream<WriteResponse>,
    requests: RequestSink<WriteRequest>,
    client: PooledWorkerClient,
    written: u64,
}

impl BlockOutStream {
    pub async fn create(
        context: &ClientContext,
        address: &WorkerNetAddress,
        block_id: BlockId,
        options: &OutStreamOptions,
    ) -> Result<Self> {
        let client = context.acquire_block_worker_client(address).await?;
        let (sink, responses) = response_channel();
        let observer = match &options.marshaller {
            Some(marshaller) => ResponseObserver::new(sink).with_marshaller(Arc::clone(marshaller)),
            None => ResponseObserver::new(sink),
        };
        let requests = client.write_block(observer)?;

        let mut stream = Self {
            block_id,
            address: address.clone(),
            responses,
            requests,
            client,
            written: 0,
        };
        stream
            .send(WriteRequest::Command(WriteRequestCommand {
                block_id,
                offset: 0,
                flush: false,
                medium_type: options.medium_type.clone(),
                space_to_reserve: options.space_to_reserve,
                pin_on_create: options.pin_on_create,
            }))
            .await?;
        tracing::trace!(block_id, worker = %stream.address, "block out stream opened");
        Ok(stream)
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Bytes sent so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, data: Bytes) -> Result<()> {
        let len = data.len() as u64;
        self.send(WriteRequest::Chunk(data)).await?;
        self.written += len;
        Ok(())
    }

    /// Wait until the worker has persisted everything sent; returns its offset
    pub async fn flush(&mut self) -> Result<u64> {
        self.send(WriteRequest::Command(WriteRequestCommand {
            block_id: self.block_id,
            offset: self.written,
            flush: true,
            ..Default::default()
        }))
        .await?;
        match self.responses.recv().await {
            Some(Ok(response)) => Ok(response.offset),
            Some(Err(e)) => Err(e),
            None => Err(self.stream_ended("flush")),
        }
    }

    /// Release the client, end the stream and wait for the commit; returns the
    /// committed length
    pub async fn close(self) -> Result<u64> {
        let Self {
            block_id,
            address,
            mut responses,
            requests,
            client,
            written,
        } = self;

        let handle = client.downgrade_and_release().await;
        drop(requests);

        let mut committed = None;
        let mut failure = None;
        while let Some(response) = responses.recv().await {
            match response {
                Ok(response) => committed = Some(response.offset),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        match handle {
            Ok(handle) => {
                if let Err(e) = handle.close() {
                    tracing::warn!(block_id, worker = %address, error = %e, "failed to close channel handle");
                }
            }
            Err(e) => {
                tracing::warn!(block_id, worker = %address, error = %e, "could not downgrade worker client");
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        let length = committed.ok_or_else(|| {
            Error::cancelled("write block", format!("block {block_id} was not committed"))
        })?;
        tracing::debug!(block_id, worker = %address, length, written, "block committed");
        Ok(length)
    }

    /// Abandon the block; the worker aborts it
    pub fn cancel(self) {
        let Self {
            block_id,
            responses,
            requests,
            client,
            ..
        } = self;
        drop(responses);
        drop(requests);
        client.release();
        tracing::debug!(block_id, "block out stream cancelled");
    }

    async fn send(&mut self, request: WriteRequest) -> Result<()> {
        if self.requests.send(request).await.is_ok() {
            return Ok(());
        }
        // The worker ended the stream; prefer the error it reported
        match self.responses.recv().await {
            Some(Err(e)) => Err(e),
            _ => Err(self.stream_ended("write")),
        }
    }

    fn stream_ended(&self, operation: &str) -> Error {
        Error::transport(
            self.address.endpoint(),
            format!("{operation} block {}", self.block_id),
            "write stream ended unexpectedly",
        )
    }
}

impl std::fmt::Debug for BlockOutStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockOutStream")
            .field("block_id", &self.block_id)
            .field("address", &self.address)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}
