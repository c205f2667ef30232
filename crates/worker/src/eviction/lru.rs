//! LRU (Least Recently Used) eviction policy implementation

use super::traits::EvictionPolicy;
use crate::store::PageId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// LRU (Least Recently Used) eviction policy
#[derive(Default)]
pub struct LruPolicy {
    /// Access order tracking, least recent first
    access_order: Mutex<VecDeque<PageId>>,
    /// Size tracking
    sizes: DashMap<PageId, u64>,
}

impl LruPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionPolicy for LruPolicy {
    fn on_access(&self, page: PageId) {
        if !self.sizes.contains_key(&page) {
            return;
        }
        let mut order = self.access_order.lock();
        // Move to back (most recently used)
        order.retain(|p| *p != page);
        order.push_back(page);
    }

    fn on_insert(&self, page: PageId, size: u64) {
        self.sizes.insert(page, size);

        let mut order = self.access_order.lock();
        order.retain(|p| *p != page);
        order.push_back(page);
    }

    fn on_remove(&self, page: PageId) {
        self.sizes.remove(&page);
        self.access_order.lock().retain(|p| *p != page);
    }

    fn eviction_candidates(&self) -> Vec<PageId> {
        self.access_order.lock().iter().copied().collect()
    }
}
