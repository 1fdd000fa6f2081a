//! Duplicate suppression for the mutation feed.
//!
//! The mutation window re-scans a trailing interval on every tick, so the same
//! edit or retraction is normally returned by two or more adjacent ticks. The
//! ledger remembers which `(row id, kind, mutation timestamp)` triples were
//! already delivered.
//!
//! The source matches a row while any of its timestamps is inside the window,
//! including delivery and read times. Each entry therefore lives until the
//! row's latest timestamp falls behind the window start, not its mutation
//! timestamp.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::record::{ChangeEvent, ChangeKind};

/// Outcome of offering a mutation event to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First sighting; deliver it.
    New,
    /// Already delivered on an earlier tick.
    Duplicate,
}

type LedgerKey = (u64, ChangeKind, DateTime<Utc>);

/// Set of mutation events already delivered.
#[derive(Debug, Default)]
pub struct MutationLedger {
    seen: Mutex<HashMap<LedgerKey, DateTime<Utc>>>,
}

impl MutationLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an event. Only [`Admission::New`] events are recorded.
    ///
    /// A repeat sighting refreshes the entry's expiry if the row was touched
    /// again since.
    pub fn admit(&self, event: &ChangeEvent) -> Admission {
        let touched = event.record.last_touched();
        let mut seen = self.seen.lock();
        match seen.entry(key(event)) {
            Entry::Occupied(mut entry) => {
                let expiry = entry.get_mut();
                *expiry = (*expiry).max(touched);
                Admission::Duplicate
            }
            Entry::Vacant(entry) => {
                entry.insert(touched);
                Admission::New
            }
        }
    }

    /// Forget entries whose row can no longer be returned by the source.
    pub fn prune(&self, window_start: DateTime<Utc>) -> usize {
        let mut seen = self.seen.lock();
        let before = seen.len();
        seen.retain(|_, touched| *touched >= window_start);
        before - seen.len()
    }

    /// Forget a delivered event so it may be delivered again.
    pub fn forget(&self, event: &ChangeEvent) {
        self.seen.lock().remove(&key(event));
    }

    /// Number of remembered events.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

fn key(event: &ChangeEvent) -> LedgerKey {
    (event.record.id, event.kind, event.changed_at())
}
