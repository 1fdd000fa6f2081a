//! Record and event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row as returned by a record source.
///
/// Only the fields the poller reads are modelled here. `id` is assigned by the
/// store on insert and never reassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Monotonic row identifier.
    pub id: u64,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last edited, if ever.
    pub edited_at: Option<DateTime<Utc>>,
    /// When the row was retracted, if ever.
    pub retracted_at: Option<DateTime<Utc>>,
    /// When the row was delivered, if known.
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the row was read, if known.
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    /// Whether the row was authored locally.
    pub is_from_me: bool,
}

impl RawRecord {
    /// Create a record with no mutation timestamps.
    pub fn new(id: u64, created_at: DateTime<Utc>, is_from_me: bool) -> Self {
        Self {
            id,
            created_at,
            edited_at: None,
            retracted_at: None,
            delivered_at: None,
            read_at: None,
            is_from_me,
        }
    }

    /// Set the edit timestamp.
    pub fn with_edited_at(mut self, at: DateTime<Utc>) -> Self {
        self.edited_at = Some(at);
        self
    }

    /// Set the retraction timestamp.
    pub fn with_retracted_at(mut self, at: DateTime<Utc>) -> Self {
        self.retracted_at = Some(at);
        self
    }

    /// Set the delivery timestamp.
    pub fn with_delivered_at(mut self, at: DateTime<Utc>) -> Self {
        self.delivered_at = Some(at);
        self
    }

    /// Set the read timestamp.
    pub fn with_read_at(mut self, at: DateTime<Utc>) -> Self {
        self.read_at = Some(at);
        self
    }

    /// Latest of all the record's timestamps.
    pub fn last_touched(&self) -> DateTime<Utc> {
        [self.edited_at, self.retracted_at, self.delivered_at, self.read_at]
            .into_iter()
            .flatten()
            .fold(self.created_at, DateTime::max)
    }
}

/// The kind of change a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A record inserted since the last check.
    Arrived,
    /// A record whose content was edited.
    Edited,
    /// A record that was retracted (unsent).
    Retracted,
}

impl ChangeKind {
    /// Whether this kind comes from the mutation feed.
    pub fn is_mutation(&self) -> bool {
        matches!(self, ChangeKind::Edited | ChangeKind::Retracted)
    }
}

/// An event delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// The record it happened to.
    pub record: RawRecord,
}

impl ChangeEvent {
    /// Create a new change event.
    pub fn new(kind: ChangeKind, record: RawRecord) -> Self {
        Self { kind, record }
    }

    /// Timestamp of the change itself: creation for arrivals, the matching
    /// mutation timestamp otherwise.
    pub fn changed_at(&self) -> DateTime<Utc> {
        match self.kind {
            ChangeKind::Arrived => self.record.created_at,
            ChangeKind::Edited => self.record.edited_at.unwrap_or(self.record.created_at),
            ChangeKind::Retracted => self.record.retracted_at.unwrap_or(self.record.created_at),
        }
    }
}

/// Which records a poller watches, by authorship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Records authored by someone else (`is_from_me = false`).
    #[default]
    Incoming,
    /// Records authored locally (`is_from_me = true`).
    Outgoing,
}

impl Direction {
    /// The `is_from_me` value this direction selects.
    pub fn is_from_me(&self) -> bool {
        matches!(self, Direction::Outgoing)
    }
}
