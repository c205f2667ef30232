//! Worker side of the block worker wire contract.
//!
//! Every stream call runs in its own task. A stream ends when the client drops its
//! request sink; a client that dropped its response stream first has abandoned the
//! call, and whatever the stream created is rolled back.

use crate::config::BlockStoreType;
use crate::engine::BlockStorageEngine;
use crate::io::{BlockReader, BlockWriter};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use strata_core::proto::{
    CacheRequest, CacheResponse, ClearMetricsRequest, ClearMetricsResponse,
    CreateLocalBlockRequest, CreateLocalBlockResponse, FreeWorkerRequest, FreeWorkerResponse,
    LoadRequest, LoadResponse, MoveBlockRequest, MoveBlockResponse, OpenLocalBlockRequest,
    OpenLocalBlockResponse, ReadRequest, ReadResponse, RemoveBlockRequest, RemoveBlockResponse,
    WriteRequest, WriteResponse,
};
use strata_core::rpc::{
    request_channel, BlockWorkerStub, CallOptions, DataMessageMarshaller, RequestSink,
    ResponseSink,
};
use strata_core::{BlockId, CreateBlockOptions, Error, Result, SessionId, DEFAULT_CHUNK_SIZE};
use tokio::sync::mpsc;

/// Serves the wire contract from a [`BlockStorageEngine`]
#[derive(Clone)]
pub struct BlockWorkerService {
    engine: Arc<BlockStorageEngine>,
}

impl BlockWorkerService {
    pub fn new(engine: Arc<BlockStorageEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<BlockStorageEngine> {
        &self.engine
    }

    fn spawn_stream<F>(&self, operation: &str, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
                Ok(())
            }
            Err(e) => Err(Error::cancelled(operation, e.to_string())),
        }
    }
}

fn transcode<T>(marshaller: &Option<Arc<dyn DataMessageMarshaller<T>>>, message: T) -> Result<T> {
    match marshaller {
        Some(marshaller) => marshaller.transcode(&message),
        None => Ok(message),
    }
}

/// Tier ordinal of a requested medium; the top tier when none is named
fn requested_tier(engine: &BlockStorageEngine, medium_type: Option<&str>) -> usize {
    medium_type
        .and_then(|medium| engine.config().tier_ordinal(medium))
        .unwrap_or(0)
}

struct OpenWrite {
    block_id: BlockId,
    writer: Box<dyn BlockWriter>,
    pin_on_create: bool,
}

async fn serve_write_stream(
    engine: Arc<BlockStorageEngine>,
    responses: ResponseSink<WriteResponse>,
    options: CallOptions<WriteRequest>,
    mut requests: mpsc::Receiver<WriteRequest>,
) {
    let session_id = engine.new_session_id();
    let mut open: Option<OpenWrite> = None;

    let received: Result<()> = async {
        while let Some(request) = requests.recv().await {
            match transcode(&options.marshaller, request)? {
                WriteRequest::Command(command) => {
                    if open.is_none() {
                        let create = CreateBlockOptions::new(
                            command.medium_type.clone(),
                            command.space_to_reserve,
                        );
                        let tier = requested_tier(&engine, command.medium_type.as_deref());
                        engine
                            .create_block(session_id, command.block_id, tier, &create)
                            .await?;
                        let writer = match engine
                            .create_block_writer(session_id, command.block_id)
                            .await
                        {
                            Ok(writer) => writer,
                            Err(e) => {
                                let _ = engine.abort_block(session_id, command.block_id).await;
                                return Err(e);
                            }
                        };
                        open = Some(OpenWrite {
                            block_id: command.block_id,
                            writer,
                            pin_on_create: command.pin_on_create,
                        });
                    }
                    if command.flush {
                        if let Some(open) = open.as_mut() {
                            open.writer.flush().await?;
                            let offset = open.writer.position();
                            if responses.send(Ok(WriteResponse { offset })).await.is_err() {
                                return Err(Error::cancelled("write block", "client went away"));
                            }
                        }
                    }
                }
                WriteRequest::Chunk(chunk) => {
                    let Some(open) = open.as_mut() else {
                        return Err(Error::invalid_argument(
                            "write stream sent data before the create command",
                        ));
                    };
                    open.writer.append(chunk).await?;
                }
            }
        }
        if responses.is_closed() {
            return Err(Error::cancelled("write block", "client abandoned the stream"));
        }
        Ok(())
    }
    .await;

    let Some(mut open) = open else {
        if let Err(e) = received {
            let _ = responses.send(Err(e)).await;
        }
        return;
    };

    let closed = open.writer.close().await;
    let finished = match received.and(closed) {
        Ok(()) => engine
            .commit_block(session_id, open.block_id, open.pin_on_create)
            .await
            .map(|()| open.writer.position()),
        Err(e) => Err(e),
    };
    match finished {
        Ok(offset) => {
            let _ = responses.send(Ok(WriteResponse { offset })).await;
        }
        Err(e) => {
            if let Err(abort_error) = engine.abort_block(session_id, open.block_id).await {
                tracing::warn!(block_id = open.block_id, error = %abort_error, "failed to abort block");
            }
            tracing::debug!(block_id = open.block_id, error = %e, "write stream failed");
            let _ = responses.send(Err(e)).await;
        }
    }
}

async fn serve_read_stream(
    engine: Arc<BlockStorageEngine>,
    responses: ResponseSink<ReadResponse>,
    options: CallOptions<ReadResponse>,
    mut requests: mpsc::Receiver<ReadRequest>,
) {
    let Some(request) = requests.recv().await else {
        return;
    };
    let session_id = engine.new_session_id();

    let served: Result<()> = async {
        let mut reader = engine
            .create_block_reader(
                session_id,
                request.block_id,
                request.offset,
                request.position_short,
                request.open_ufs_block_options.as_ref(),
            )
            .await?;
        let sent = send_chunks(reader.as_mut(), &request, &responses, &options).await;
        let closed = reader.close().await;
        sent.and(closed)
    }
    .await;

    if let Err(e) = served {
        tracing::debug!(block_id = request.block_id, error = %e, "read stream failed");
        let _ = responses.send(Err(e)).await;
    }
}

async fn send_chunks(
    reader: &mut dyn BlockReader,
    request: &ReadRequest,
    responses: &ResponseSink<ReadResponse>,
    options: &CallOptions<ReadResponse>,
) -> Result<()> {
    let chunk_size = if request.chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        request.chunk_size
    };
    let end = request
        .offset
        .saturating_add(request.length)
        .min(reader.length());

    let mut position = request.offset;
    while position < end {
        let chunk = reader.read(position, chunk_size.min(end - position)).await?;
        if chunk.is_empty() {
            break;
        }
        position += chunk.len() as u64;
        let response = transcode(&options.marshaller, ReadResponse { chunk })?;
        if responses.send(Ok(response)).await.is_err() {
            return Err(Error::cancelled("read block", "client went away"));
        }
    }
    Ok(())
}

async fn serve_create_local_block(
    engine: Arc<BlockStorageEngine>,
    responses: ResponseSink<CreateLocalBlockResponse>,
    mut requests: mpsc::Receiver<CreateLocalBlockRequest>,
) {
    let session_id = engine.new_session_id();
    let mut created: Option<(BlockId, bool)> = None;

    while let Some(request) = requests.recv().await {
        if created.is_none() {
            if let Err(e) = create_for_short_circuit(&engine, session_id, &request).await {
                let _ = responses.send(Err(e)).await;
                return;
            }
            created = Some((request.block_id, request.cleanup_on_failure));
        }
        let path = engine
            .local_block_path(session_id, request.block_id)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        if responses.send(Ok(CreateLocalBlockResponse { path })).await.is_err() {
            break;
        }
    }

    let Some((block_id, cleanup_on_failure)) = created else {
        return;
    };
    if responses.is_closed() {
        if cleanup_on_failure {
            let _ = engine.abort_block(session_id, block_id).await;
        }
        return;
    }
    if let Err(e) = engine.commit_block(session_id, block_id, false).await {
        if cleanup_on_failure {
            let _ = engine.abort_block(session_id, block_id).await;
        }
        let _ = responses.send(Err(e)).await;
    }
}

async fn create_for_short_circuit(
    engine: &BlockStorageEngine,
    session_id: SessionId,
    request: &CreateLocalBlockRequest,
) -> Result<()> {
    if engine.store_type() == BlockStoreType::Paged {
        return Err(Error::unimplemented(
            "create local block",
            "paged store has no block files",
        ));
    }
    let options = CreateBlockOptions::new(request.medium_type.clone(), request.space_to_reserve);
    let tier = requested_tier(engine, request.medium_type.as_deref());
    engine
        .create_block(session_id, request.block_id, tier, &options)
        .await
        .map(|_| ())
}

async fn serve_open_local_block(
    engine: Arc<BlockStorageEngine>,
    responses: ResponseSink<OpenLocalBlockResponse>,
    mut requests: mpsc::Receiver<OpenLocalBlockRequest>,
) {
    let Some(request) = requests.recv().await else {
        return;
    };
    if engine.store_type() == BlockStoreType::Paged {
        let _ = responses
            .send(Err(Error::unimplemented(
                "open local block",
                "paged store has no block files",
            )))
            .await;
        return;
    }
    let session_id = engine.new_session_id();

    // The reader pins the block until the client is done with the file
    let mut lease = match engine
        .create_block_reader(session_id, request.block_id, 0, false, None)
        .await
    {
        Ok(reader) => reader,
        Err(e) => {
            let _ = responses.send(Err(e)).await;
            return;
        }
    };
    if request.promote {
        tracing::debug!(block_id = request.block_id, "promote is not applied to open local blocks");
    }

    let path = engine
        .local_block_path(session_id, request.block_id)
        .map(|p| p.display().to_string());
    let sent = match path {
        Some(path) => responses.send(Ok(OpenLocalBlockResponse { path })).await,
        None => {
            responses
                .send(Err(Error::not_found(request.block_id, "block has no local file")))
                .await
        }
    };
    if sent.is_ok() {
        while requests.recv().await.is_some() {}
    }
    let _ = lease.close().await;
}

#[async_trait]
impl BlockWorkerStub for BlockWorkerService {
    fn write_block(
        &self,
        responses: ResponseSink<WriteResponse>,
        options: CallOptions<WriteRequest>,
    ) -> Result<RequestSink<WriteRequest>> {
        let (sink, requests) = request_channel();
        let engine = Arc::clone(&self.engine);
        self.spawn_stream(
            "write block",
            serve_write_stream(engine, responses, options, requests),
        )?;
        Ok(sink)
    }

    fn read_block(
        &self,
        responses: ResponseSink<ReadResponse>,
        options: CallOptions<ReadResponse>,
    ) -> Result<RequestSink<ReadRequest>> {
        let (sink, requests) = request_channel();
        let engine = Arc::clone(&self.engine);
        self.spawn_stream(
            "read block",
            serve_read_stream(engine, responses, options, requests),
        )?;
        Ok(sink)
    }

    fn create_local_block(
        &self,
        responses: ResponseSink<CreateLocalBlockResponse>,
    ) -> Result<RequestSink<CreateLocalBlockRequest>> {
        let (sink, requests) = request_channel();
        let engine = Arc::clone(&self.engine);
        self.spawn_stream(
            "create local block",
            serve_create_local_block(engine, responses, requests),
        )?;
        Ok(sink)
    }

    fn open_local_block(
        &self,
        responses: ResponseSink<OpenLocalBlockResponse>,
    ) -> Result<RequestSink<OpenLocalBlockRequest>> {
        let (sink, requests) = request_channel();
        let engine = Arc::clone(&self.engine);
        self.spawn_stream(
            "open local block",
            serve_open_local_block(engine, responses, requests),
        )?;
        Ok(sink)
    }

    async fn remove_block(&self, request: RemoveBlockRequest) -> Result<RemoveBlockResponse> {
        let session_id = self.engine.new_session_id();
        self.engine
            .remove_block(session_id, request.block_id)
            .await?;
        Ok(RemoveBlockResponse {})
    }

    async fn move_block(&self, request: MoveBlockRequest) -> Result<MoveBlockResponse> {
        let session_id = self.engine.new_session_id();
        self.engine
            .move_block(session_id, request.block_id, &request.medium_type)
            .await?;
        Ok(MoveBlockResponse {})
    }

    async fn clear_metrics(&self, _request: ClearMetricsRequest) -> Result<ClearMetricsResponse> {
        self.engine.clear_metrics();
        Ok(ClearMetricsResponse {})
    }

    async fn free_worker(&self, _request: FreeWorkerRequest) -> Result<FreeWorkerResponse> {
        self.engine.free_worker().await?;
        Ok(FreeWorkerResponse {})
    }

    async fn cache(&self, request: CacheRequest) -> Result<CacheResponse> {
        if request.is_async {
            let engine = Arc::clone(&self.engine);
            self.spawn_stream("cache block", async move {
                if let Err(e) = engine.cache_block(&request).await {
                    tracing::warn!(block_id = request.block_id, error = %e, "async cache failed");
                }
            })?;
            return Ok(CacheResponse {});
        }
        self.engine.cache_block(&request).await?;
        Ok(CacheResponse {})
    }

    async fn load(&self, request: LoadRequest) -> Result<LoadResponse> {
        Ok(self.engine.load(&request).await)
    }
}
