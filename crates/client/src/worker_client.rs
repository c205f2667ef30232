//! Session object for one block worker.
//!
//! A [`BlockWorkerClient`] owns a streaming channel for block data and an rpc channel
//! for unary calls. Both are opened together and shut down together.

use crate::config::ClientConfig;
use crate::transport::{Channel, ChannelBuilder, NetworkGroup, Transport, UserState};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strata_core::leak::{self, LeakTracker};
use strata_core::proto::{
    CacheRequest, ClearMetricsRequest, ClearMetricsResponse, CreateLocalBlockRequest,
    CreateLocalBlockResponse, FreeWorkerRequest, LoadRequest, LoadResponse, MoveBlockRequest,
    MoveBlockResponse, OpenLocalBlockRequest, OpenLocalBlockResponse, ReadRequest, ReadResponse,
    RemoveBlockRequest, RemoveBlockResponse, WriteRequest, WriteResponse,
};
use strata_core::rpc::{RequestSink, ResponseObserver, ResponseSink};
use strata_core::{Error, Result, WorkerNetAddress};
use strata_utils::resilience::{retry, RetryOn};
use strata_utils::tracing::worker_call_span;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

struct Channels {
    streaming_builder: ChannelBuilder,
    streaming: Arc<dyn Channel>,
    rpc_builder: ChannelBuilder,
    rpc: Arc<dyn Channel>,
}

/// Client of one block worker
pub struct BlockWorkerClient {
    id: Uuid,
    address: WorkerNetAddress,
    streaming_builder: ChannelBuilder,
    streaming: Arc<dyn Channel>,
    rpc_builder: ChannelBuilder,
    rpc: Arc<dyn Channel>,
    rpc_timeout: Duration,
    tracker: Mutex<Option<LeakTracker>>,
}

impl BlockWorkerClient {
    /// Open both channels to `address`, logging in again while the worker rejects
    /// the user's credentials
    pub async fn connect(
        address: WorkerNetAddress,
        user_state: Arc<dyn UserState>,
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let retry_config = config
            .auth_retry
            .clone()
            .retrying_on(RetryOn::Unauthenticated);
        let endpoint = address.endpoint();

        let channels = {
            let address = &address;
            let user_state = user_state.as_ref();
            let transport = &transport;
            retry(&retry_config, || async move {
                open_channels(address, user_state, transport).await
            })
            .instrument(worker_call_span("connect", &endpoint))
            .await?
        };

        let id = Uuid::new_v4();
        tracing::debug!(client_id = %id, worker = %address, "worker client connected");
        Ok(Self {
            tracker: Mutex::new(leak::track(
                "block worker client",
                format!("{id} to {address}"),
            )),
            id,
            address,
            streaming_builder: channels.streaming_builder,
            streaming: channels.streaming,
            rpc_builder: channels.rpc_builder,
            rpc: channels.rpc,
            rpc_timeout: config.rpc_timeout(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> &WorkerNetAddress {
        &self.address
    }

    pub fn is_shutdown(&self) -> bool {
        self.streaming.is_shutdown() || self.rpc.is_shutdown()
    }

    pub fn is_healthy(&self) -> bool {
        !self.is_shutdown() && self.streaming.is_healthy() && self.rpc.is_healthy()
    }

    /// Open a write stream; a request marshaller on `observer` replaces the default
    /// encoding for this call
    pub fn write_block(
        &self,
        observer: ResponseObserver<WriteResponse, WriteRequest>,
    ) -> Result<RequestSink<WriteRequest>> {
        let (responses, options) = observer.into_parts();
        self.streaming.stub().write_block(responses, options)
    }

    /// Open a read stream; a response marshaller on `observer` replaces the default
    /// encoding for this call
    pub fn read_block(
        &self,
        observer: ResponseObserver<ReadResponse, ReadResponse>,
    ) -> Result<RequestSink<ReadRequest>> {
        let (responses, options) = observer.into_parts();
        self.streaming.stub().read_block(responses, options)
    }

    pub fn create_local_block(
        &self,
        responses: ResponseSink<CreateLocalBlockResponse>,
    ) -> Result<RequestSink<CreateLocalBlockRequest>> {
        self.streaming.stub().create_local_block(responses)
    }

    pub fn open_local_block(
        &self,
        responses: ResponseSink<OpenLocalBlockResponse>,
    ) -> Result<RequestSink<OpenLocalBlockRequest>> {
        self.streaming.stub().open_local_block(responses)
    }

    async fn unary<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.rpc_timeout, call)
            .instrument(worker_call_span(operation, &self.address.endpoint()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::deadline_exceeded(operation, self.rpc_timeout)),
        }
    }

    pub async fn remove_block(&self, request: RemoveBlockRequest) -> Result<RemoveBlockResponse> {
        let stub = self.rpc.stub();
        self.unary("remove_block", stub.remove_block(request)).await
    }

    pub async fn move_block(&self, request: MoveBlockRequest) -> Result<MoveBlockResponse> {
        let stub = self.rpc.stub();
        self.unary("move_block", stub.move_block(request)).await
    }

    pub async fn clear_metrics(
        &self,
        request: ClearMetricsRequest,
    ) -> Result<ClearMetricsResponse> {
        let stub = self.rpc.stub();
        self.unary("clear_metrics", stub.clear_metrics(request)).await
    }

    pub async fn free_worker(&self) -> Result<()> {
        let stub = self.rpc.stub();
        self.unary("free_worker", stub.free_worker(FreeWorkerRequest {}))
            .await
            .map(|_| ())
    }

    /// Ask the worker to cache a block; failures of async requests are only logged
    pub async fn cache(&self, request: CacheRequest) -> Result<()> {
        let is_async = request.is_async;
        let block_id = request.block_id;
        let stub = self.rpc.stub();
        match self.unary("cache", stub.cache(request)).await {
            Ok(_) => Ok(()),
            Err(e) if is_async => {
                tracing::warn!(
                    block_id,
                    worker = %self.address,
                    error = %e,
                    "error sending async cache request"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Start a load on the worker; the caller awaits the handle
    pub fn load(&self, request: LoadRequest) -> JoinHandle<Result<LoadResponse>> {
        let stub = self.rpc.stub();
        let span = worker_call_span("load", &self.address.endpoint());
        tokio::spawn(async move { stub.load(request).await }.instrument(span))
    }

    /// Shut down both channels, attempting the second even when the first fails
    pub fn close(&self) -> Result<()> {
        let streaming = self.streaming.shutdown();
        let rpc = self.rpc.shutdown();
        if let Some(tracker) = self.tracker.lock().take() {
            tracker.close();
            tracing::debug!(client_id = %self.id, worker = %self.address, "worker client closed");
        }
        streaming.and(rpc)
    }

    /// Build fresh channels that can outlive this client's pool checkout.
    ///
    /// Only reachable through [`crate::PooledWorkerClient::downgrade_and_release`],
    /// which consumes the checkout, so each checkout yields at most one handle.
    pub(crate) async fn downgrade(&self) -> Result<DummyChannelHandle> {
        let streaming = self.streaming_builder.build().await?;
        let rpc = match self.rpc_builder.build().await {
            Ok(rpc) => rpc,
            Err(e) => {
                shutdown_quietly(&streaming);
                return Err(e);
            }
        };
        tracing::trace!(client_id = %self.id, worker = %self.address, "worker client downgraded");
        Ok(DummyChannelHandle::new(self.address.clone(), streaming, rpc))
    }
}

impl std::fmt::Debug for BlockWorkerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockWorkerClient")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

async fn open_channels(
    address: &WorkerNetAddress,
    user_state: &dyn UserState,
    transport: &Arc<dyn Transport>,
) -> Result<Channels> {
    let subject = user_state.subject();
    let streaming_builder = ChannelBuilder::new(address.clone(), Arc::clone(transport))
        .with_subject(subject.clone())
        .with_network_group(NetworkGroup::Streaming);
    let rpc_builder = ChannelBuilder::new(address.clone(), Arc::clone(transport))
        .with_subject(subject)
        .with_network_group(NetworkGroup::Rpc);

    let streaming = match streaming_builder.build().await {
        Ok(channel) => channel,
        Err(e) => return Err(connect_failed(e, user_state, None).await),
    };
    let rpc = match rpc_builder.build().await {
        Ok(channel) => channel,
        Err(e) => return Err(connect_failed(e, user_state, Some(&streaming)).await),
    };
    Ok(Channels {
        streaming_builder,
        streaming,
        rpc_builder,
        rpc,
    })
}

/// Tear down what was built; credentials are refreshed before an auth retry
async fn connect_failed(
    error: Error,
    user_state: &dyn UserState,
    built: Option<&Arc<dyn Channel>>,
) -> Error {
    if let Some(channel) = built {
        shutdown_quietly(channel);
    }
    if !error.is_unauthenticated() {
        return error;
    }
    match user_state.relogin().await {
        Ok(()) => error,
        Err(relogin_error) => relogin_error,
    }
}

fn shutdown_quietly(channel: &Arc<dyn Channel>) {
    if let Err(e) = channel.shutdown() {
        tracing::debug!(error = %e, "failed to shut down channel");
    }
}

/// Keeps a downgraded client's connection alive until a transaction is finalised.
///
/// The handle can only be closed; closing shuts down both of its channels.
pub struct DummyChannelHandle {
    address: WorkerNetAddress,
    streaming: Arc<dyn Channel>,
    rpc: Arc<dyn Channel>,
    tracker: Option<LeakTracker>,
}

impl DummyChannelHandle {
    fn new(address: WorkerNetAddress, streaming: Arc<dyn Channel>, rpc: Arc<dyn Channel>) -> Self {
        let tracker = leak::track("dummy channel handle", address.to_string());
        Self {
            address,
            streaming,
            rpc,
            tracker,
        }
    }

    pub fn close(mut self) -> Result<()> {
        let streaming = self.streaming.shutdown();
        let rpc = self.rpc.shutdown();
        if let Some(tracker) = self.tracker.take() {
            tracker.close();
        }
        tracing::trace!(worker = %self.address, "dummy channel handle closed");
        streaming.and(rpc)
    }
}

impl std::fmt::Debug for DummyChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyChannelHandle")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
