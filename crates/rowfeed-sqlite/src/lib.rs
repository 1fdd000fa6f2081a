//! SQLite record source for rowfeed.
//!
//! [`SqliteRecordSource`] reads a message table (row id, creation and
//! mutation timestamps, authorship flag) and answers the arrival and mutation
//! queries of [`rowfeed_core::ChangeFeedPoller`]. Queries run on tokio's
//! blocking pool.

pub mod error;
pub mod source;
pub mod time;

pub use error::Error;
pub use source::{arrival_query, mutation_query, SqliteRecordSource, DEFAULT_TABLE};
pub use time::{from_store_time, to_store_time};
