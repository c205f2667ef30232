//! Bounded pool of clients to one block worker.
//!
//! At most `pool_max` clients exist per worker, idle and checked out together.
//! [`BlockWorkerClientPool::acquire`] waits, in arrival order, for a slot and never
//! times out on its own. A caller that must hold on to a worker connection past one
//! block's data transfer uses [`BlockWorkerClientPool::downgrade_and_release`], which
//! frees the slot at once and leaves it with a [`DummyChannelHandle`].

use crate::config::ClientConfig;
use crate::transport::{Transport, UserState};
use crate::worker_client::{BlockWorkerClient, DummyChannelHandle};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::{Error, Result, WorkerNetAddress};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct IdleClient {
    client: BlockWorkerClient,
    since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleClient>,
    checked_out: usize,
    closed: bool,
}

/// Clients of one worker
pub struct BlockWorkerClientPool {
    address: WorkerNetAddress,
    user_state: Arc<dyn UserState>,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

impl BlockWorkerClientPool {
    pub fn new(
        address: WorkerNetAddress,
        user_state: Arc<dyn UserState>,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.pool_max)),
            address,
            user_state,
            transport,
            config,
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn address(&self) -> &WorkerNetAddress {
        &self.address
    }

    pub fn max(&self) -> usize {
        self.config.pool_max
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn checked_out(&self) -> usize {
        self.state.lock().checked_out
    }

    /// Check out a client, waiting for a slot for as long as it takes
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledWorkerClient> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::cancelled("acquire worker client", "pool is closed"))?;

        let client = match self.take_idle() {
            Some(client) => client,
            None => {
                BlockWorkerClient::connect(
                    self.address.clone(),
                    Arc::clone(&self.user_state),
                    Arc::clone(&self.transport),
                    &self.config,
                )
                .await?
            }
        };
        self.state.lock().checked_out += 1;
        tracing::trace!(worker = %self.address, client_id = %client.id(), "worker client acquired");

        Ok(PooledWorkerClient {
            client: Some(client),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// [`acquire`](Self::acquire) bounded by a caller-chosen wait
    pub async fn acquire_timeout(self: &Arc<Self>, wait: Duration) -> Result<PooledWorkerClient> {
        tokio::time::timeout(wait, self.acquire())
            .await
            .map_err(|_| Error::timeout("acquire worker client", wait))?
    }

    /// Open clients until `pool_min` exist; returns how many were opened
    pub async fn prewarm(self: &Arc<Self>) -> Result<usize> {
        let mut opened = 0;
        loop {
            {
                let state = self.state.lock();
                if state.closed || state.idle.len() + state.checked_out >= self.config.pool_min {
                    break;
                }
            }
            let _permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| Error::cancelled("prewarm worker clients", "pool is closed"))?;
            let client = BlockWorkerClient::connect(
                self.address.clone(),
                Arc::clone(&self.user_state),
                Arc::clone(&self.transport),
                &self.config,
            )
            .await?;
            self.state.lock().idle.push_back(IdleClient {
                client,
                since: Instant::now(),
            });
            opened += 1;
        }
        Ok(opened)
    }

    /// Downgrade `client` and return it to the pool in one step.
    ///
    /// The slot is free when this returns, whether or not the downgrade succeeded
    /// and however long the handle lives.
    pub async fn downgrade_and_release(
        &self,
        mut client: PooledWorkerClient,
    ) -> Result<DummyChannelHandle> {
        let handle = client.downgrade().await;
        if let Some(inner) = client.client.take() {
            self.release_client(inner);
        }
        handle
    }

    /// Close every idle client and fail waiters; clients still out are closed when
    /// they come back
    pub fn close(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.permits.close();
        for IdleClient { client, .. } in idle {
            close_quietly(&client);
        }
        tracing::debug!(worker = %self.address, "worker client pool closed");
    }

    fn take_idle(&self) -> Option<BlockWorkerClient> {
        loop {
            let candidate = self.state.lock().idle.pop_back()?;
            if candidate.client.is_healthy() {
                return Some(candidate.client);
            }
            tracing::debug!(worker = %self.address, "discarding unhealthy idle client");
            close_quietly(&candidate.client);
        }
    }

    fn release_client(&self, client: BlockWorkerClient) {
        let mut discarded = Vec::new();
        {
            let mut state = self.state.lock();
            state.checked_out = state.checked_out.saturating_sub(1);
            if state.closed || !client.is_healthy() {
                discarded.push(client);
            } else {
                state.idle.push_back(IdleClient {
                    client,
                    since: Instant::now(),
                });
            }

            // Oldest idle clients sit at the front
            let threshold = self.config.idle_gc_threshold();
            while state.idle.len() > self.config.pool_min {
                match state.idle.front() {
                    Some(oldest) if oldest.since.elapsed() >= threshold => {
                        discarded.extend(state.idle.pop_front().map(|idle| idle.client));
                    }
                    _ => break,
                }
            }
        }
        for client in discarded {
            close_quietly(&client);
        }
    }
}

impl std::fmt::Debug for BlockWorkerClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BlockWorkerClientPool")
            .field("address", &self.address)
            .field("max", &self.config.pool_max)
            .field("idle", &state.idle.len())
            .field("checked_out", &state.checked_out)
            .finish()
    }
}

fn close_quietly(client: &BlockWorkerClient) {
    if let Err(e) = client.close() {
        tracing::warn!(client_id = %client.id(), error = %e, "failed to close worker client");
    }
}

/// A checked-out client; goes back to its pool when released or dropped
pub struct PooledWorkerClient {
    client: Option<BlockWorkerClient>,
    pool: Arc<BlockWorkerClientPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledWorkerClient {
    /// Return the client to its pool
    pub fn release(self) {
        drop(self);
    }

    /// See [`BlockWorkerClientPool::downgrade_and_release`]
    pub async fn downgrade_and_release(self) -> Result<DummyChannelHandle> {
        let pool = Arc::clone(&self.pool);
        pool.downgrade_and_release(self).await
    }
}

impl Deref for PooledWorkerClient {
    type Target = BlockWorkerClient;

    fn deref(&self) -> &Self::Target {
        match &self.client {
            Some(client) => client,
            None => unreachable!("pooled client is only emptied while being returned"),
        }
    }
}

impl Drop for PooledWorkerClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release_client(client);
        }
    }
}

impl std::fmt::Debug for PooledWorkerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledWorkerClient")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
