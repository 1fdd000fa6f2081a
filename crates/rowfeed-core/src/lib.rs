//! rowfeed core.
//!
//! A cursor-based change-feed poller for stores whose rows are appended with
//! a monotonic row id and may later be edited or retracted in place. Each
//! tick detects newly inserted rows and recently mutated rows, classifies
//! them and hands one [`ChangeEvent`] per qualifying row to a [`Subscriber`].
//!
//! Fetching rows ([`RecordSource`]) and scheduling ticks are left to the
//! caller; see the `rowfeed-sqlite` and `rowfeed-runtime` crates.

pub mod classifier;
pub mod config;
pub mod cursor;
pub mod dedup;
pub mod error;
pub mod poller;
pub mod record;
pub mod source;
pub mod stats;
pub mod window;

pub use classifier::ChangeClassifier;
pub use config::{DeliveryMode, PollerConfig, PollerSettings};
pub use cursor::CursorState;
pub use dedup::MutationLedger;
pub use error::{Error, Flow, SourceError, SubscriberError};
pub use poller::{ChangeFeedPoller, TickReport};
pub use record::{ChangeEvent, ChangeKind, Direction, RawRecord};
pub use source::{ChannelSubscriber, FnSubscriber, RecordSource, SharedSubscriber, Subscriber};
pub use stats::{PollerStats, StatsSnapshot};
pub use window::{OrderBy, PollWindow, Predicate, RecordFilter, PROPAGATION_LAG};
