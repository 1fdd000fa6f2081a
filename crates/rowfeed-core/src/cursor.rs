//! Row-id cursor for the arrival feed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-local cursor state for one poller.
///
/// `last_row_id` is the highest row id already emitted as an arrival. It never
/// decreases; zero means no baseline has been established yet.
#[derive(Debug)]
pub struct CursorState {
    last_row_id: AtomicU64,
    poll_interval: Duration,
}

impl CursorState {
    /// Create a cursor with no baseline.
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_baseline(poll_interval, 0)
    }

    /// Create a cursor resuming from a previously observed row id.
    pub fn with_baseline(poll_interval: Duration, last_row_id: u64) -> Self {
        Self {
            last_row_id: AtomicU64::new(last_row_id),
            poll_interval,
        }
    }

    /// Record `candidate_id` as the newest emitted row id.
    ///
    /// Returns `true` if the cursor moved. A candidate lower than the current
    /// value is ignored, so overlapping ticks cannot move the cursor back.
    pub fn advance(&self, candidate_id: u64) -> bool {
        let previous = self.last_row_id.fetch_max(candidate_id, Ordering::SeqCst);
        candidate_id > previous
    }

    /// Whether a row-id baseline exists.
    pub fn has_baseline(&self) -> bool {
        self.last_row_id() != 0
    }

    /// Get the last emitted row id.
    pub fn last_row_id(&self) -> u64 {
        self.last_row_id.load(Ordering::SeqCst)
    }

    /// Get the configured poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
