//! Process-wide resource leak detection.
//!
//! A detector is optional: until [`install`] is called every [`track`] call returns
//! `None` and costs nothing. Owners keep the returned [`LeakTracker`] and call
//! [`LeakTracker::close`] when they are closed properly; a tracker that is dropped
//! while still open reports a leak as a warning.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static DETECTOR: Lazy<RwLock<Option<Arc<LeakDetector>>>> = Lazy::new(|| RwLock::new(None));

/// Install the process-wide detector, replacing any previous one
pub fn install(detector: Arc<LeakDetector>) {
    *DETECTOR.write() = Some(detector);
}

/// Remove the process-wide detector
pub fn uninstall() {
    *DETECTOR.write() = None;
}

/// The currently installed detector, if any
pub fn detector() -> Option<Arc<LeakDetector>> {
    DETECTOR.read().clone()
}

/// Register a resource with the installed detector
pub fn track(kind: &'static str, description: impl Into<String>) -> Option<LeakTracker> {
    detector().map(|detector| detector.track(kind, description))
}

#[derive(Debug)]
struct TrackedResource {
    kind: &'static str,
    description: String,
    opened_at: Instant,
}

/// Bookkeeping of open resources and leaks observed so far
#[derive(Debug, Default)]
pub struct LeakDetector {
    open: DashMap<u64, TrackedResource>,
    next_id: AtomicU64,
    leaked: AtomicU64,
}

impl LeakDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(
        self: &Arc<Self>,
        kind: &'static str,
        description: impl Into<String>,
    ) -> LeakTracker {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.open.insert(
            id,
            TrackedResource {
                kind,
                description: description.into(),
                opened_at: Instant::now(),
            },
        );
        LeakTracker {
            detector: Arc::clone(self),
            id,
            closed: false,
        }
    }

    /// Resources registered and not yet closed or dropped
    pub fn open_resources(&self) -> usize {
        self.open.len()
    }

    /// Resources dropped without being closed
    pub fn leaked(&self) -> u64 {
        self.leaked.load(Ordering::Acquire)
    }

    fn deregister(&self, id: u64, leaked: bool) {
        let Some((_, resource)) = self.open.remove(&id) else {
            return;
        };
        if leaked {
            self.leaked.fetch_add(1, Ordering::AcqRel);
            tracing::warn!(
                kind = resource.kind,
                resource = %resource.description,
                open_for = ?resource.opened_at.elapsed(),
                "resource was dropped without being closed"
            );
        }
    }
}

/// Registration of one resource; close it when the resource is closed
#[derive(Debug)]
pub struct LeakTracker {
    detector: Arc<LeakDetector>,
    id: u64,
    closed: bool,
}

impl LeakTracker {
    /// Deregister without reporting a leak
    pub fn close(mut self) {
        self.closed = true;
        self.detector.deregister(self.id, false);
    }
}

impl Drop for LeakTracker {
    fn drop(&mut self) {
        if !self.closed {
            self.detector.deregister(self.id, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_tracker_is_not_a_leak() {
        let detector = Arc::new(LeakDetector::new());
        let tracker = detector.track("block reader", "block 1");
        assert_eq!(detector.open_resources(), 1);
        tracker.close();
        assert_eq!(detector.open_resources(), 0);
        assert_eq!(detector.leaked(), 0);
    }

    #[test]
    fn test_dropped_tracker_is_reported() {
        let detector = Arc::new(LeakDetector::new());
        {
            let _tracker = detector.track("worker client", "w1:29999");
        }
        assert_eq!(detector.open_resources(), 0);
        assert_eq!(detector.leaked(), 1);
    }
}
