//! Core error types.

use std::fmt;

use thiserror::Error;

/// Which half of a tick a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Newly inserted records.
    Arrivals,
    /// Records mutated in place (edited or retracted).
    Mutations,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flow::Arrivals => f.write_str("arrivals"),
            Flow::Mutations => f.write_str("mutations"),
        }
    }
}

/// Poller errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The record source could not be queried. The tick is aborted and the
    /// cursor is left as it was before the failing fetch.
    #[error("record source unavailable during {flow} fetch: {source}")]
    SourceUnavailable {
        flow: Flow,
        #[source]
        source: SourceError,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Get the flow that failed, if this is a source failure.
    pub fn flow(&self) -> Option<Flow> {
        match self {
            Error::SourceUnavailable { flow, .. } => Some(*flow),
            Error::Config(_) => None,
        }
    }
}

/// Errors reported by a [`RecordSource`](crate::source::RecordSource).
#[derive(Debug, Error)]
pub enum SourceError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The query was rejected or failed while running.
    #[error("query failed: {0}")]
    Query(String),

    /// A row could not be decoded into a record.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors reported by a [`Subscriber`](crate::source::Subscriber).
#[derive(Debug, Error)]
pub enum SubscriberError {
    /// The subscriber refused the event.
    #[error("event rejected: {0}")]
    Rejected(String),

    /// The subscriber is gone.
    #[error("subscriber closed")]
    Closed,
}
