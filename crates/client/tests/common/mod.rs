//! In-process worker and transport shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_client::{
    Channel, ClientConfig, ClientConfigBuilder, ClientContext, NetworkGroup, Transport, UserState,
};
use strata_core::proto::{
    CacheRequest, CacheResponse, ClearMetricsRequest, ClearMetricsResponse,
    CreateLocalBlockRequest, CreateLocalBlockResponse, FreeWorkerRequest, FreeWorkerResponse,
    LoadRequest, LoadResponse, MoveBlockRequest, MoveBlockResponse, OpenLocalBlockRequest,
    OpenLocalBlockResponse, ReadRequest, ReadResponse, RemoveBlockRequest, RemoveBlockResponse,
    WriteRequest, WriteResponse,
};
use strata_core::rpc::{
    BlockWorkerStub, CallOptions, DataMessageMarshaller, RequestSink, ResponseSink,
};
use strata_core::{Error, Result, WorkerNetAddress, MEM_TIER};
use strata_utils::resilience::RetryConfig;
use strata_worker::{
    BlockStorageEngine, BlockStoreType, BlockWorkerService, LocalUnderFileSystem, UfsManager,
    WorkerConfigBuilder,
};
use tempfile::TempDir;
use uuid::Uuid;

pub const UFS_MOUNT: u64 = 1;
pub const UFS_FILE: &str = "/data/file";
pub const UFS_CONTENT: &[u8] = b"0123456789abcdefghijklmnopqrstuv";

/// A worker with one memory tier and a local under-storage mount
pub struct Cluster {
    _temp_dir: TempDir,
    pub service: BlockWorkerService,
    pub transport: Arc<InProcessTransport>,
    pub user: Arc<TestUser>,
}

impl Cluster {
    pub async fn start(store_type: BlockStoreType) -> Self {
        strata_utils::tracing::init_for_tests();
        let temp_dir = TempDir::new().unwrap();
        let ufs_root = temp_dir.path().join("ufs");
        std::fs::create_dir_all(ufs_root.join("data")).unwrap();
        std::fs::write(ufs_root.join("data/file"), UFS_CONTENT).unwrap();

        let ufs = Arc::new(UfsManager::new());
        ufs.add_mount(UFS_MOUNT, Arc::new(LocalUnderFileSystem::new(&ufs_root)));
        let config = WorkerConfigBuilder::new()
            .with_store_type(store_type)
            .with_single_dir(MEM_TIER, temp_dir.path().join("mem"), 1 << 20)
            .with_page_size(4)
            .with_page_store(temp_dir.path().join("pages"), 1 << 20)
            .build()
            .unwrap();
        let engine = BlockStorageEngine::new(config, ufs).await.unwrap();
        let service = BlockWorkerService::new(Arc::new(engine));

        Self {
            _temp_dir: temp_dir,
            transport: Arc::new(InProcessTransport::new(service.clone())),
            service,
            user: Arc::new(TestUser::default()),
        }
    }

    pub fn engine(&self) -> &Arc<BlockStorageEngine> {
        self.service.engine()
    }

    pub fn address(&self) -> WorkerNetAddress {
        WorkerNetAddress::new("worker-0", 29999, 29998)
    }

    pub fn local_address(&self) -> WorkerNetAddress {
        WorkerNetAddress::new("localhost", 29999, 29998)
    }

    pub fn context(&self, config: ClientConfig) -> Arc<ClientContext> {
        ClientContext::new(config, self.user.clone(), self.transport.clone()).unwrap()
    }
}

pub fn fast_auth_retry(max_retries: usize) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter_factor: 0.0,
        ..RetryConfig::for_authentication()
    }
}

pub fn client_config(min: usize, max: usize) -> ClientConfig {
    ClientConfigBuilder::new()
        .with_pool_size(min, max)
        .with_short_circuit(false)
        .with_auth_retry(fast_auth_retry(3))
        .build()
        .unwrap()
}

/// User that counts re-logins
#[derive(Default)]
pub struct TestUser {
    relogins: AtomicUsize,
}

impl TestUser {
    pub fn relogins(&self) -> usize {
        self.relogins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserState for TestUser {
    fn subject(&self) -> String {
        "tester".to_string()
    }

    async fn relogin(&self) -> Result<()> {
        self.relogins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport whose channels call straight into a worker service, with
/// injectable connect failures and rpc latency
pub struct InProcessTransport {
    service: BlockWorkerService,
    channels: Mutex<Vec<Arc<InProcessChannel>>>,
    connect_attempts: AtomicUsize,
    auth_failures: AtomicUsize,
    transport_failure: Mutex<Option<NetworkGroup>>,
    rpc_delay: Mutex<Duration>,
}

impl InProcessTransport {
    pub fn new(service: BlockWorkerService) -> Self {
        Self {
            service,
            channels: Mutex::new(Vec::new()),
            connect_attempts: AtomicUsize::new(0),
            auth_failures: AtomicUsize::new(0),
            transport_failure: Mutex::new(None),
            rpc_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Reject the next `count` connects as unauthenticated
    pub fn fail_auth(&self, count: usize) {
        self.auth_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next connect of `group` with a transport error
    pub fn fail_transport(&self, group: NetworkGroup) {
        *self.transport_failure.lock() = Some(group);
    }

    pub fn set_rpc_delay(&self, delay: Duration) {
        *self.rpc_delay.lock() = delay;
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn channels_built(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn open_channels(&self) -> usize {
        self.channels
            .lock()
            .iter()
            .filter(|c| !c.is_shutdown())
            .count()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn connect(
        &self,
        address: &WorkerNetAddress,
        group: NetworkGroup,
        _subject: &str,
    ) -> Result<Arc<dyn Channel>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .auth_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(Error::unauthenticated(address.endpoint(), "token expired"));
        }
        {
            let mut failure = self.transport_failure.lock();
            if *failure == Some(group) {
                *failure = None;
                return Err(Error::transport(address.endpoint(), "connect", "connection refused"));
            }
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let channel = Arc::new(InProcessChannel {
            id: Uuid::new_v4(),
            group,
            shutdown: shutdown.clone(),
            stub: Arc::new(ChannelStub {
                service: self.service.clone(),
                shutdown,
                endpoint: address.endpoint(),
                rpc_delay: *self.rpc_delay.lock(),
            }),
        });
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }
}

pub struct InProcessChannel {
    pub id: Uuid,
    pub group: NetworkGroup,
    shutdown: Arc<AtomicBool>,
    stub: Arc<ChannelStub>,
}

impl Channel for InProcessChannel {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn is_healthy(&self) -> bool {
        !self.is_shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stub(&self) -> Arc<dyn BlockWorkerStub> {
        self.stub.clone()
    }
}

struct ChannelStub {
    service: BlockWorkerService,
    shutdown: Arc<AtomicBool>,
    endpoint: String,
    rpc_delay: Duration,
}

impl ChannelStub {
    fn check(&self, operation: &str) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::transport(&self.endpoint, operation, "channel is shut down"));
        }
        Ok(())
    }

    async fn unary_check(&self, operation: &str) -> Result<()> {
        self.check(operation)?;
        if !self.rpc_delay.is_zero() {
            tokio::time::sleep(self.rpc_delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl BlockWorkerStub for ChannelStub {
    fn write_block(
        &self,
        responses: ResponseSink<WriteResponse>,
        options: CallOptions<WriteRequest>,
    ) -> Result<RequestSink<WriteRequest>> {
        self.check("write_block")?;
        self.service.write_block(responses, options)
    }

    fn read_block(
        &self,
        responses: ResponseSink<ReadResponse>,
        options: CallOptions<ReadResponse>,
    ) -> Result<RequestSink<ReadRequest>> {
        self.check("read_block")?;
        self.service.read_block(responses, options)
    }

    fn create_local_block(
        &self,
        responses: ResponseSink<CreateLocalBlockResponse>,
    ) -> Result<RequestSink<CreateLocalBlockRequest>> {
        self.check("create_local_block")?;
        self.service.create_local_block(responses)
    }

    fn open_local_block(
        &self,
        responses: ResponseSink<OpenLocalBlockResponse>,
    ) -> Result<RequestSink<OpenLocalBlockRequest>> {
        self.check("open_local_block")?;
        self.service.open_local_block(responses)
    }

    async fn remove_block(&self, request: RemoveBlockRequest) -> Result<RemoveBlockResponse> {
        self.unary_check("remove_block").await?;
        self.service.remove_block(request).await
    }

    async fn move_block(&self, request: MoveBlockRequest) -> Result<MoveBlockResponse> {
        self.unary_check("move_block").await?;
        self.service.move_block(request).await
    }

    async fn clear_metrics(&self, request: ClearMetricsRequest) -> Result<ClearMetricsResponse> {
        self.unary_check("clear_metrics").await?;
        self.service.clear_metrics(request).await
    }

    async fn free_worker(&self, request: FreeWorkerRequest) -> Result<FreeWorkerResponse> {
        self.unary_check("free_worker").await?;
        self.service.free_worker(request).await
    }

    async fn cache(&self, request: CacheRequest) -> Result<CacheResponse> {
        self.unary_check("cache").await?;
        self.service.cache(request).await
    }

    async fn load(&self, request: LoadRequest) -> Result<LoadResponse> {
        self.unary_check("load").await?;
        self.service.load(request).await
    }
}

/// bincode marshaller that counts the messages it encodes
#[derive(Default)]
pub struct CountingBincode {
    encoded: AtomicUsize,
}

impl CountingBincode {
    pub fn encoded(&self) -> usize {
        self.encoded.load(Ordering::SeqCst)
    }
}

impl<T> DataMessageMarshaller<T> for CountingBincode
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, message: &T) -> Result<Bytes> {
        self.encoded.fetch_add(1, Ordering::SeqCst);
        bincode::serialize(message)
            .map(Bytes::from)
            .map_err(|e| Error::serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: Bytes) -> Result<T> {
        bincode::deserialize(&bytes).map_err(|e| Error::serialization(e.to_string()))
    }
}
