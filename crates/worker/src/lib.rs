//! Block storage for strata workers
//!
//! A worker keeps block replicas in one of two layouts and serves them over the
//! block worker contract:
//! - **Mono**: one file per block, spread across tiered storage directories
//! - **Paged**: fixed-size pages under a single cache directory, admitted page by
//!   page and evicted least-recently-used
//!
//! Blocks missing locally are read through from under storage, with a per-block cap
//! on concurrent under-storage readers.

pub mod config;
pub mod engine;
pub mod eviction;
pub mod fallback;
pub mod io;
pub mod lock;
pub mod metrics;
pub mod service;
pub mod store;
pub mod ufs;

pub use config::{BlockStoreType, DirConfig, TierConfig, WorkerConfig, WorkerConfigBuilder};
pub use engine::BlockStorageEngine;
pub use io::{BlockReader, BlockWriter};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use service::BlockWorkerService;
pub use store::{BlockMeta, BlockStore, MonoBlockStore, PagedBlockStore, UFS_CACHE_SESSION_ID};
pub use ufs::{LocalUnderFileSystem, UfsManager, UnderFileSystem};
