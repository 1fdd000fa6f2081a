//! Poller configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;
use crate::record::Direction;
use crate::window::PROPAGATION_LAG;

/// Default poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// How events of one batch are handed to the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Await each delivery before the next one. Events arrive in batch order.
    #[default]
    Sequential,
    /// Spawn each delivery without awaiting it. Order across records of the
    /// same batch is not guaranteed. Failures are logged and counted in
    /// [`PollerStats`](crate::PollerStats) but never reach the tick report.
    Detached,
}

/// Poller configuration. Read at construction, immutable afterwards.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Tick period of the caller's scheduler.
    pub poll_interval: Duration,

    /// Backward shift applied to time-bounded windows.
    pub propagation_lag: Duration,

    /// Which records to watch.
    pub direction: Direction,

    /// Whether the store supports mutation detection.
    pub mutation_detection: bool,

    /// Event delivery mode.
    pub delivery: DeliveryMode,

    /// Suppress repeated mutation events across overlapping windows.
    pub dedup_mutations: bool,

    /// Row id to resume from. Zero starts without a baseline.
    pub initial_row_id: u64,
}

impl PollerConfig {
    /// Create a configuration with the given poll interval.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            propagation_lag: PROPAGATION_LAG,
            direction: Direction::Incoming,
            mutation_detection: true,
            delivery: DeliveryMode::Sequential,
            dedup_mutations: true,
            initial_row_id: 0,
        }
    }

    /// Set the propagation lag.
    pub fn with_propagation_lag(mut self, lag: Duration) -> Self {
        self.propagation_lag = lag;
        self
    }

    /// Set the direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set whether mutation detection is supported.
    pub fn with_mutation_detection(mut self, supported: bool) -> Self {
        self.mutation_detection = supported;
        self
    }

    /// Set the delivery mode.
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Enable or disable mutation dedup.
    pub fn with_dedup_mutations(mut self, enabled: bool) -> Self {
        self.dedup_mutations = enabled;
        self
    }

    /// Resume from a previously observed row id.
    pub fn with_initial_row_id(mut self, row_id: u64) -> Self {
        self.initial_row_id = row_id;
        self
    }

    /// Check the configuration for invalid values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".to_string()));
        }
        Ok(())
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let settings: PollerSettings =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        let config = settings.into_config();
        config.validate()?;
        Ok(config)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_propagation_lag_ms() -> u64 {
    PROPAGATION_LAG.as_millis() as u64
}

fn default_true() -> bool {
    true
}

/// Serialized form of [`PollerConfig`], with durations in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollerSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_propagation_lag_ms")]
    pub propagation_lag_ms: u64,

    #[serde(default)]
    pub direction: Direction,

    #[serde(default = "default_true")]
    pub mutation_detection: bool,

    #[serde(default)]
    pub delivery: DeliveryMode,

    #[serde(default = "default_true")]
    pub dedup_mutations: bool,

    #[serde(default)]
    pub initial_row_id: u64,
}

impl PollerSettings {
    /// Convert settings to a poller configuration.
    pub fn into_config(self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            propagation_lag: Duration::from_millis(self.propagation_lag_ms),
            direction: self.direction,
            mutation_detection: self.mutation_detection,
            delivery: self.delivery,
            dedup_mutations: self.dedup_mutations,
            initial_row_id: self.initial_row_id,
        }
    }
}
