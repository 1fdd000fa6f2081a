//! Scheduling for rowfeed pollers.
//!
//! [`TickScheduler`] calls [`rowfeed_core::ChangeFeedPoller::run_tick`] on a
//! tokio interval and owns the retry policy: a failed tick is logged and its
//! window is folded into the next one.

pub mod config;
pub mod error;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::Error;
pub use scheduler::{SchedulerHandle, TickScheduler};
