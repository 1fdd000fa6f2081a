//! Scheduler configuration.

use std::time::Duration;

use rowfeed_core::PollerConfig;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks.
    pub poll_interval: Duration,

    /// How far before start-up the first tick's window begins.
    pub initial_lookback: Duration,

    /// Stop after this many consecutive failed ticks. None retries forever.
    pub max_consecutive_failures: Option<u32>,
}

impl SchedulerConfig {
    /// Create a configuration with the given poll interval.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            initial_lookback: Duration::ZERO,
            max_consecutive_failures: None,
        }
    }

    /// Derive a configuration from the poller's interval.
    pub fn for_poller(config: &PollerConfig) -> Self {
        Self::new(config.poll_interval)
    }

    /// Set the initial lookback.
    pub fn with_initial_lookback(mut self, lookback: Duration) -> Self {
        self.initial_lookback = lookback;
        self
    }

    /// Stop after `count` consecutive failures.
    pub fn with_max_consecutive_failures(mut self, count: u32) -> Self {
        self.max_consecutive_failures = Some(count.max(1));
        self
    }
}
