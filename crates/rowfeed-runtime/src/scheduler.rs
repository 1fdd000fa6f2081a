//! Interval scheduler for a [`ChangeFeedPoller`].
//!
//! Each tick covers `[last_check, now)`. `last_check` only moves forward after
//! a successful tick, so the window of a failed tick is covered again by the
//! next one. A tick in progress when shutdown is signalled runs to completion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use rowfeed_core::{ChangeFeedPoller, RecordSource, TickReport};

use crate::config::SchedulerConfig;
use crate::error::Error;

/// Drives a poller at a fixed interval.
pub struct TickScheduler<S> {
    poller: Arc<ChangeFeedPoller<S>>,
    config: SchedulerConfig,
    last_check: DateTime<Utc>,
    consecutive_failures: u32,
}

impl<S: RecordSource + 'static> TickScheduler<S> {
    /// Create a scheduler whose first window starts now minus the configured
    /// lookback.
    pub fn new(poller: Arc<ChangeFeedPoller<S>>, config: SchedulerConfig) -> Self {
        let now = Utc::now();
        let last_check = chrono::Duration::from_std(config.initial_lookback)
            .ok()
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .unwrap_or(now);

        Self {
            poller,
            config,
            last_check,
            consecutive_failures: 0,
        }
    }

    /// Start of the next tick's window.
    pub fn last_check(&self) -> DateTime<Utc> {
        self.last_check
    }

    /// Number of failed ticks since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run a single tick ending at `now`.
    pub async fn tick_once(&mut self, now: DateTime<Utc>) -> Result<TickReport, rowfeed_core::Error> {
        match self.poller.run_tick(self.last_check, now).await {
            Ok(report) => {
                self.last_check = now;
                self.consecutive_failures = 0;
                Ok(report)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    error = %e,
                    consecutive_failures = self.consecutive_failures,
                    after = %self.last_check,
                    "tick failed, window will be retried"
                );
                Err(e)
            }
        }
    }

    /// Tick every poll interval until a shutdown signal arrives.
    pub async fn run_until_shutdown(
        mut self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            after = %self.last_check,
            "change feed scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(last_row_id = self.poller.last_row_id(), "change feed scheduler stopped");
                    return Ok(());
                }
                _ = interval.tick() => {
                    let Err(e) = self.tick_once(Utc::now()).await else {
                        continue;
                    };
                    if let Some(max) = self.config.max_consecutive_failures {
                        if self.consecutive_failures >= max {
                            error!(error = %e, failures = max, "giving up on change feed");
                            return Err(Error::TooManyFailures {
                                count: self.consecutive_failures,
                                source: e,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Spawn the scheduler on the current runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(self.run_until_shutdown(shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }
}

/// Handle for a running scheduler task.
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<Result<(), Error>>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the scheduler to stop.
    pub async fn shutdown(self) -> Result<(), Error> {
        // The task may already have exited on its own.
        let _ = self.shutdown_tx.send(());
        self.task.await?
    }

    /// Whether the scheduler task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the scheduler to exit without signalling it.
    pub async fn join(self) -> Result<(), Error> {
        self.task.await?
    }
}
