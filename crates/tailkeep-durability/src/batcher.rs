use tailkeep_core::{Range, RangeTracker};

use crate::StateManager;

/// Coalesces many small, adjacent `Range`s produced within a single
/// consumer iteration into one `enqueue` call, to amortize queue traffic.
///
/// Invalid or empty ranges passed to [`RangeBatcher::merge`] are ignored.
pub struct RangeBatcher {
    tracker: RangeTracker,
}

impl Default for RangeBatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeBatcher {
    pub fn new() -> Self {
        Self { tracker: RangeTracker::new(0) }
    }

    /// Fold `r` into the pending batch. No-op for an invalid range.
    pub fn merge(&mut self, r: Range) {
        self.tracker.insert(r);
    }

    /// `true` if no ranges have been merged since the last `done`.
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Enqueue the coalesced ranges on `manager` and reset the batch.
    ///
    /// A batch with no accumulated ranges enqueues nothing.
    pub fn done(&mut self, manager: &StateManager) {
        for r in self.tracker.ranges() {
            manager.enqueue(r);
        }
        self.tracker.clear();
    }
}
