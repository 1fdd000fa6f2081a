//! Poll windows and the record filters derived from them.
//!
//! Each tick builds two filters:
//! - the arrival filter, time-bounded until a row-id baseline exists and
//!   row-id-bounded afterwards;
//! - the mutation filter, always time-bounded, reaching back one extra poll
//!   interval so a mutation landing between ticks is still seen.
//!
//! Both start [`PROPAGATION_LAG`] before the caller's `after` to tolerate the
//! store's write-visibility delay.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::record::Direction;

/// Default backward shift applied to every time-bounded window.
pub const PROPAGATION_LAG: Duration = Duration::from_millis(15_000);

/// A condition a record source must apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// `is_from_me = <value>`
    IsFromMe(bool),
    /// `ROWID > <value>`
    RowIdGreaterThan(u64),
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::IsFromMe(value) => write!(f, "is_from_me = {}", value),
            Predicate::RowIdGreaterThan(id) => write!(f, "ROWID > {}", id),
        }
    }
}

/// Sort key for the arrival feed. Results are always descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    /// Newest creation time first.
    CreatedAtDesc,
    /// Highest row id first.
    RowIdDesc,
}

/// What a record source is asked to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    /// Lower time bound (inclusive). `None` means unbounded.
    pub after: Option<DateTime<Utc>>,
    /// Conditions every returned record must satisfy.
    pub predicates: Vec<Predicate>,
    /// Result ordering.
    pub order_by: OrderBy,
}

impl RecordFilter {
    /// Get the row-id floor, if the filter carries one.
    pub fn row_id_floor(&self) -> Option<u64> {
        self.predicates.iter().find_map(|p| match p {
            Predicate::RowIdGreaterThan(id) => Some(*id),
            _ => None,
        })
    }

    /// Get the required `is_from_me` value, if the filter carries one.
    pub fn is_from_me(&self) -> Option<bool> {
        self.predicates.iter().find_map(|p| match p {
            Predicate::IsFromMe(value) => Some(*value),
            _ => None,
        })
    }
}

/// The time range of one tick together with the filter it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollWindow {
    /// Caller-supplied start of the tick.
    pub after: DateTime<Utc>,
    /// Caller-supplied end of the tick.
    pub before: DateTime<Utc>,
    /// Filter to hand to the record source.
    pub filter: RecordFilter,
}

impl PollWindow {
    /// Build the arrival window.
    ///
    /// Without a baseline (`last_row_id == 0`) the filter starts at
    /// `after - lag` and orders by creation time. With a baseline the time
    /// bound is dropped in favour of `ROWID > last_row_id`, ordered by row id.
    pub fn for_arrivals(
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        last_row_id: u64,
        direction: Direction,
        lag: Duration,
    ) -> Self {
        let mut predicates = vec![Predicate::IsFromMe(direction.is_from_me())];

        let filter = if last_row_id == 0 {
            RecordFilter {
                after: Some(shift_back(after, lag)),
                predicates,
                order_by: OrderBy::CreatedAtDesc,
            }
        } else {
            predicates.push(Predicate::RowIdGreaterThan(last_row_id));
            RecordFilter {
                after: None,
                predicates,
                order_by: OrderBy::RowIdDesc,
            }
        };

        Self { after, before, filter }
    }

    /// Build the mutation window, or `None` when mutation detection is not
    /// supported and the flow must be skipped.
    pub fn for_mutations(
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        poll_interval: Duration,
        direction: Direction,
        lag: Duration,
        mutation_detection: bool,
    ) -> Option<Self> {
        if !mutation_detection {
            return None;
        }

        let start = shift_back(after, poll_interval.saturating_add(lag));
        Some(Self {
            after,
            before,
            filter: RecordFilter {
                after: Some(start),
                predicates: vec![Predicate::IsFromMe(direction.is_from_me())],
                order_by: OrderBy::CreatedAtDesc,
            },
        })
    }

    /// The effective lower bound handed to the source, if time-bounded.
    pub fn adjusted_after(&self) -> Option<DateTime<Utc>> {
        self.filter.after
    }
}

/// Shift a timestamp backward, saturating at the earliest representable time.
pub(crate) fn shift_back(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| at.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
