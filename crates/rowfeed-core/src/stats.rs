//! Poller counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::poller::TickReport;

/// Point-in-time view of [`PollerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Ticks that completed.
    pub ticks: u64,
    /// Ticks aborted by a source failure.
    pub failed_ticks: u64,
    /// Records returned by the source across both feeds.
    pub records_fetched: u64,
    /// Events handed to the subscriber.
    pub events_emitted: u64,
    /// Mutation rows dropped by classification or dedup.
    pub dropped: u64,
    /// Deliveries the subscriber rejected.
    pub delivery_failures: u64,
}

/// Lock-free counters shared by a poller and its observers.
#[derive(Debug, Default)]
pub struct PollerStats {
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    records_fetched: AtomicU64,
    events_emitted: AtomicU64,
    dropped: AtomicU64,
    delivery_failures: AtomicU64,
}

impl PollerStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed tick.
    pub fn record_tick(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.records_fetched
            .fetch_add(report.fetched as u64, Ordering::Relaxed);
        self.events_emitted
            .fetch_add(report.emitted() as u64, Ordering::Relaxed);
        self.dropped
            .fetch_add((report.dropped + report.duplicates) as u64, Ordering::Relaxed);
        self.delivery_failures
            .fetch_add(report.delivery_failures as u64, Ordering::Relaxed);
    }

    /// Record a tick aborted by a source failure.
    pub fn record_failure(&self) {
        self.failed_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivery failure observed after the tick returned.
    pub fn record_detached_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            records_fetched: self.records_fetched.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}
