//! Client-side configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use strata_core::{Error, Result, DEFAULT_POOL_MAX, DEFAULT_POOL_MIN, DEFAULT_RPC_TIMEOUT_MS};
use strata_utils::resilience::RetryConfig;

const DEFAULT_IDLE_GC_THRESHOLD_MS: u64 = 120_000;

/// Settings shared by every worker client and pool of a [`crate::ClientContext`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Idle clients kept per worker regardless of age
    pub pool_min: usize,
    /// Hard ceiling on the clients of one worker, idle and checked out together
    pub pool_max: usize,
    /// Read same-host blocks straight from the worker's block files
    pub short_circuit_enabled: bool,
    /// Deadline of unary calls
    pub rpc_timeout_ms: u64,
    /// Idle time after which clients above `pool_min` are closed on release
    pub idle_gc_threshold_ms: u64,
    /// Backoff for re-authenticating while connecting
    pub auth_retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool_min: DEFAULT_POOL_MIN,
            pool_max: DEFAULT_POOL_MAX,
            short_circuit_enabled: true,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            idle_gc_threshold_ms: DEFAULT_IDLE_GC_THRESHOLD_MS,
            auth_retry: RetryConfig::for_authentication(),
        }
    }
}

impl ClientConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn idle_gc_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_gc_threshold_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_max == 0 {
            return Err(Error::configuration("pool_max must be at least 1"));
        }
        if self.pool_min > self.pool_max {
            return Err(Error::configuration(format!(
                "pool_min ({}) exceeds pool_max ({})",
                self.pool_min, self.pool_max
            )));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(Error::configuration("rpc_timeout_ms must be positive"));
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool_size(mut self, min: usize, max: usize) -> Self {
        self.config.pool_min = min;
        self.config.pool_max = max;
        self
    }

    pub fn with_short_circuit(mut self, enabled: bool) -> Self {
        self.config.short_circuit_enabled = enabled;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.config.rpc_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_idle_gc_threshold(mut self, threshold: Duration) -> Self {
        self.config.idle_gc_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_auth_retry(mut self, retry: RetryConfig) -> Self {
        self.config.auth_retry = retry;
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
