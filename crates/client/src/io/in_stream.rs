use crate::context::ClientContext;
use crate::pool::PooledWorkerClient;
use bytes::{Bytes, BytesMut};
use std::net::IpAddr;
use std::sync::Arc;
use strata_core::proto::{OpenLocalBlockRequest, ReadRequest, ReadResponse};
use strata_core::rpc::{response_channel, DataMessageMarshaller, ResponseObserver, ResponseStream};
use strata_core::{BlockId, Error, Result, StatusCode, WorkerNetAddress};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

enum Source {
    Remote(ResponseStream<ReadResponse>),
    Local(Bytes),
}

/// Reads one block from a worker, from its block file when the worker is on this
/// host and short-circuit reads are enabled, otherwise over a read stream.
///
/// The pooled client goes back to the pool as soon as the last chunk arrives.
pub struct BlockInStream {
    block_id: BlockId,
    source: Source,
    client: Option<PooledWorkerClient>,
    received: u64,
}

impl BlockInStream {
    pub async fn open(
        context: &ClientContext,
        address: &WorkerNetAddress,
        request: ReadRequest,
        marshaller: Option<Arc<dyn DataMessageMarshaller<ReadResponse>>>,
    ) -> Result<Self> {
        let client = context.acquire_block_worker_client(address).await?;
        let block_id = request.block_id;

        if context.config().short_circuit_enabled && is_local_host(&address.host) {
            let local = read_block_file(&client, &request).await;
            match local {
                Ok(data) => {
                    client.release();
                    tracing::trace!(block_id, "block read through short-circuit");
                    return Ok(Self {
                        block_id,
                        source: Source::Local(data),
                        client: None,
                        received: 0,
                    });
                }
                Err(e)
                    if matches!(e.status(), StatusCode::NotFound | StatusCode::Unimplemented) =>
                {
                    tracing::debug!(block_id, error = %e, "short-circuit read unavailable");
                }
                Err(e) => return Err(e),
            }
        }

        let (sink, responses) = response_channel();
        let observer = match marshaller {
            Some(marshaller) => ResponseObserver::new(sink).with_marshaller(marshaller),
            None => ResponseObserver::new(sink),
        };
        let requests = client.read_block(observer)?;
        if requests.send(request).await.is_err() {
            return Err(Error::transport(
                address.endpoint(),
                format!("read block {block_id}"),
                "read stream closed by worker",
            ));
        }

        Ok(Self {
            block_id,
            source: Source::Remote(responses),
            client: Some(client),
            received: 0,
        })
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Whether the block is read from the worker's block file
    pub fn is_short_circuit(&self) -> bool {
        matches!(self.source, Source::Local(_))
    }

    /// Bytes handed out so far
    pub fn received(&self) -> u64 {
        self.received
    }

    /// The next chunk of the block, `None` once it is exhausted
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let next = match &mut self.source {
            Source::Local(data) if data.is_empty() => None,
            Source::Local(data) => Some(Ok(std::mem::take(data))),
            Source::Remote(responses) => responses
                .recv()
                .await
                .map(|response| response.map(|r| r.chunk)),
        };
        match next {
            Some(Ok(chunk)) => {
                self.received += chunk.len() as u64;
                Ok(Some(chunk))
            }
            Some(Err(e)) => {
                self.release_client();
                Err(e)
            }
            None => {
                self.release_client();
                Ok(None)
            }
        }
    }

    /// Collect the rest of the block
    pub async fn read_to_end(mut self) -> Result<Bytes> {
        let mut data = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data.freeze())
    }

    fn release_client(&mut self) {
        if let Some(client) = self.client.take() {
            client.release();
        }
    }
}

impl std::fmt::Debug for BlockInStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockInStream")
            .field("block_id", &self.block_id)
            .field("received", &self.received)
            .field("short_circuit", &self.is_short_circuit())
            .finish()
    }
}

fn is_local_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Read the requested range straight from the worker's block file, holding the
/// worker's lease on the block meanwhile
async fn read_block_file(client: &PooledWorkerClient, request: &ReadRequest) -> Result<Bytes> {
    let (sink, mut responses) = response_channel();
    let requests = client.open_local_block(sink)?;
    let opened = OpenLocalBlockRequest {
        block_id: request.block_id,
        promote: false,
    };
    if requests.send(opened).await.is_err() {
        return Err(Error::transport(
            client.address().endpoint(),
            "open local block",
            "stream closed by worker",
        ));
    }
    let path = match responses.recv().await {
        Some(Ok(response)) => response.path,
        Some(Err(e)) => return Err(e),
        None => {
            return Err(Error::transport(
                client.address().endpoint(),
                "open local block",
                "stream ended without a path",
            ))
        }
    };

    let data = read_range(&path, request.offset, request.length).await;
    drop(requests);
    while responses.recv().await.is_some() {}
    data
}

async fn read_range(path: &str, offset: u64, length: u64) -> Result<Bytes> {
    let read = async {
        let mut file = tokio::fs::File::open(path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut data = Vec::new();
        file.take(length).read_to_end(&mut data).await?;
        Ok::<_, std::io::Error>(data)
    };
    read.await
        .map(Bytes::from)
        .map_err(|e| Error::file_system(path, "read local block", e))
}
