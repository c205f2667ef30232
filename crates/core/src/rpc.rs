//! Block worker RPC contract consumed by clients and served by workers.
//!
//! Streams are modelled as a pair of bounded `tokio::sync::mpsc` channels: the
//! caller hands in a [`ResponseSink`] and gets back a [`RequestSink`]. Dropping the
//! request sink completes the stream; sending an `Err` on a response sink fails it.

use crate::constants::STREAM_BUFFER_MESSAGES;
use crate::errors::Result;
use crate::proto::{
    CacheRequest, CacheResponse, ClearMetricsRequest, ClearMetricsResponse,
    CreateLocalBlockRequest, CreateLocalBlockResponse, FreeWorkerRequest, FreeWorkerResponse,
    LoadRequest, LoadResponse, MoveBlockRequest, MoveBlockResponse, OpenLocalBlockRequest,
    OpenLocalBlockResponse, ReadRequest, ReadResponse, RemoveBlockRequest, RemoveBlockResponse,
    WriteRequest, WriteResponse,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sending half of a stream's request direction
pub type RequestSink<T> = mpsc::Sender<T>;

/// Sending half of a stream's response direction
pub type ResponseSink<T> = mpsc::Sender<Result<T>>;

/// Receiving half of a stream's response direction
pub type ResponseStream<T> = mpsc::Receiver<Result<T>>;

/// Create a bounded response channel for a stream call
pub fn response_channel<T>() -> (ResponseSink<T>, ResponseStream<T>) {
    mpsc::channel(STREAM_BUFFER_MESSAGES)
}

/// Create a bounded request channel for a stream call
pub fn request_channel<T>() -> (RequestSink<T>, mpsc::Receiver<T>) {
    mpsc::channel(STREAM_BUFFER_MESSAGES)
}

/// Wire encoding strategy that replaces the default one for a single call
pub trait DataMessageMarshaller<T>: Send + Sync {
    fn serialize(&self, message: &T) -> Result<Bytes>;

    fn deserialize(&self, bytes: Bytes) -> Result<T>;

    /// Push a message through the encoding, as the transport does on the wire
    fn transcode(&self, message: &T) -> Result<T> {
        let bytes = self.serialize(message)?;
        self.deserialize(bytes)
    }
}

/// Per-call options of a streaming method
pub struct CallOptions<M> {
    /// Marshaller for the message type the call streams in bulk
    pub marshaller: Option<Arc<dyn DataMessageMarshaller<M>>>,
}

impl<M> Default for CallOptions<M> {
    fn default() -> Self {
        Self { marshaller: None }
    }
}

impl<M> Clone for CallOptions<M> {
    fn clone(&self) -> Self {
        Self {
            marshaller: self.marshaller.clone(),
        }
    }
}

impl<M> std::fmt::Debug for CallOptions<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("marshaller", &self.marshaller.is_some())
            .finish()
    }
}

/// Caller side of a data stream: where responses go, and an optional marshaller
/// override for the bulk message type `M`
pub struct ResponseObserver<R, M> {
    pub sink: ResponseSink<R>,
    pub marshaller: Option<Arc<dyn DataMessageMarshaller<M>>>,
}

impl<R, M> ResponseObserver<R, M> {
    pub fn new(sink: ResponseSink<R>) -> Self {
        Self {
            sink,
            marshaller: None,
        }
    }

    pub fn with_marshaller(mut self, marshaller: Arc<dyn DataMessageMarshaller<M>>) -> Self {
        self.marshaller = Some(marshaller);
        self
    }

    /// Split into the sink and the call options carrying the override, if any
    pub fn into_parts(self) -> (ResponseSink<R>, CallOptions<M>) {
        (
            self.sink,
            CallOptions {
                marshaller: self.marshaller,
            },
        )
    }
}

/// The block worker service surface
#[async_trait]
pub trait BlockWorkerStub: Send + Sync {
    fn write_block(
        &self,
        responses: ResponseSink<WriteResponse>,
        options: CallOptions<WriteRequest>,
    ) -> Result<RequestSink<WriteRequest>>;

    fn read_block(
        &self,
        responses: ResponseSink<ReadResponse>,
        options: CallOptions<ReadResponse>,
    ) -> Result<RequestSink<ReadRequest>>;

    fn create_local_block(
        &self,
        responses: ResponseSink<CreateLocalBlockResponse>,
    ) -> Result<RequestSink<CreateLocalBlockRequest>>;

    fn open_local_block(
        &self,
        responses: ResponseSink<OpenLocalBlockResponse>,
    ) -> Result<RequestSink<OpenLocalBlockRequest>>;

    async fn remove_block(&self, request: RemoveBlockRequest) -> Result<RemoveBlockResponse>;

    async fn move_block(&self, request: MoveBlockRequest) -> Result<MoveBlockResponse>;

    async fn clear_metrics(&self, request: ClearMetricsRequest) -> Result<ClearMetricsResponse>;

    async fn free_worker(&self, request: FreeWorkerRequest) -> Result<FreeWorkerResponse>;

    async fn cache(&self, request: CacheRequest) -> Result<CacheResponse>;

    async fn load(&self, request: LoadRequest) -> Result<LoadResponse>;
}
