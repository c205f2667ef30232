//! Eviction bookkeeping for pages admitted from under-storage.

mod lru;
mod traits;

pub use lru::LruPolicy;
pub use traits::EvictionPolicy;
