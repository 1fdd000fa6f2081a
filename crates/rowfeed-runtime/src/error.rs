//! Scheduler error types.

use thiserror::Error;

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Too many ticks in a row failed; the scheduler stopped.
    #[error("stopped after {count} consecutive failed ticks: {source}")]
    TooManyFailures {
        count: u32,
        #[source]
        source: rowfeed_core::Error,
    },

    /// The scheduler task panicked or was aborted.
    #[error("scheduler task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
