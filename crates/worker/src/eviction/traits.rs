//! Core eviction policy trait definition

use crate::store::PageId;

/// Eviction policy trait
pub trait EvictionPolicy: Send + Sync {
    /// Record access to a page
    fn on_access(&self, page: PageId);

    /// Record insertion of a page
    fn on_insert(&self, page: PageId, size: u64);

    /// Record removal of a page
    fn on_remove(&self, page: PageId);

    /// Pages in the order they should be evicted
    fn eviction_candidates(&self) -> Vec<PageId>;
}
