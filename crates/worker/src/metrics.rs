//! Worker block metrics
//!
//! Plain atomic counters; `clear_metrics` resets them all.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counters for block operations on one worker
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    blocks_created: AtomicU64,
    blocks_committed: AtomicU64,
    blocks_aborted: AtomicU64,
    blocks_removed: AtomicU64,
    blocks_moved: AtomicU64,
    local_reads: AtomicU64,
    ufs_reads: AtomicU64,
    cache_requests: AtomicU64,
    cache_failures: AtomicU64,
    errors: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of [`WorkerMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub blocks_created: u64,
    pub blocks_committed: u64,
    pub blocks_aborted: u64,
    pub blocks_removed: u64,
    pub blocks_moved: u64,
    pub local_reads: u64,
    pub ufs_reads: u64,
    pub cache_requests: u64,
    pub cache_failures: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                blocks_created: AtomicU64::new(0),
                blocks_committed: AtomicU64::new(0),
                blocks_aborted: AtomicU64::new(0),
                blocks_removed: AtomicU64::new(0),
                blocks_moved: AtomicU64::new(0),
                local_reads: AtomicU64::new(0),
                ufs_reads: AtomicU64::new(0),
                cache_requests: AtomicU64::new(0),
                cache_failures: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record_created(&self) {
        self.inner.blocks_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_committed(&self) {
        self.inner.blocks_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.inner.blocks_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removed(&self) {
        self.inner.blocks_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_moved(&self) {
        self.inner.blocks_moved.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a reader by where the block was found when it was opened
    pub fn record_read(&self, local: bool) {
        if local {
            self.inner.local_reads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.ufs_reads.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_request(&self, failed: bool) {
        self.inner.cache_requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.inner.cache_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            blocks_created: inner.blocks_created.load(Ordering::Relaxed),
            blocks_committed: inner.blocks_committed.load(Ordering::Relaxed),
            blocks_aborted: inner.blocks_aborted.load(Ordering::Relaxed),
            blocks_removed: inner.blocks_removed.load(Ordering::Relaxed),
            blocks_moved: inner.blocks_moved.load(Ordering::Relaxed),
            local_reads: inner.local_reads.load(Ordering::Relaxed),
            ufs_reads: inner.ufs_reads.load(Ordering::Relaxed),
            cache_requests: inner.cache_requests.load(Ordering::Relaxed),
            cache_failures: inner.cache_failures.load(Ordering::Relaxed),
            errors: inner.errors.load(Ordering::Relaxed),
            uptime_secs: inner.start_time.elapsed().as_secs(),
        }
    }

    /// Reset every counter
    pub fn clear(&self) {
        let inner = &self.inner;
        for counter in [
            &inner.blocks_created,
            &inner.blocks_committed,
            &inner.blocks_aborted,
            &inner.blocks_removed,
            &inner.blocks_moved,
            &inner.local_reads,
            &inner.ufs_reads,
            &inner.cache_requests,
            &inner.cache_failures,
            &inner.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
