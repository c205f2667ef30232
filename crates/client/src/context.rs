//! Per-process registry of worker client pools

use crate::config::ClientConfig;
use crate::pool::{BlockWorkerClientPool, PooledWorkerClient};
use crate::transport::{Transport, UserState};
use dashmap::DashMap;
use std::sync::Arc;
use strata_core::{Result, ResultExt, WorkerNetAddress};

/// Shared client state: configuration, identity, transport and one pool per worker
pub struct ClientContext {
    config: ClientConfig,
    user_state: Arc<dyn UserState>,
    transport: Arc<dyn Transport>,
    pools: DashMap<WorkerNetAddress, Arc<BlockWorkerClientPool>>,
}

impl ClientContext {
    pub fn new(
        config: ClientConfig,
        user_state: Arc<dyn UserState>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        config.validate().context("invalid client configuration")?;
        Ok(Arc::new(Self {
            config,
            user_state,
            transport,
            pools: DashMap::new(),
        }))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The pool of `address`, created on first use
    pub fn pool(&self, address: &WorkerNetAddress) -> Arc<BlockWorkerClientPool> {
        if let Some(pool) = self.pools.get(address) {
            return Arc::clone(pool.value());
        }
        let pool = self.pools.entry(address.clone()).or_insert_with(|| {
            tracing::debug!(worker = %address, max = self.config.pool_max, "creating worker client pool");
            BlockWorkerClientPool::new(
                address.clone(),
                Arc::clone(&self.user_state),
                Arc::clone(&self.transport),
                self.config.clone(),
            )
        });
        Arc::clone(pool.value())
    }

    pub async fn acquire_block_worker_client(
        &self,
        address: &WorkerNetAddress,
    ) -> Result<PooledWorkerClient> {
        let pool = self.pool(address);
        pool.acquire().await
    }

    /// Close every pool; the next acquire of any worker starts a new pool
    pub fn close(&self) {
        let pools: Vec<_> = self.pools.iter().map(|p| Arc::clone(p.value())).collect();
        self.pools.clear();
        for pool in pools {
            pool.close();
        }
    }
}
