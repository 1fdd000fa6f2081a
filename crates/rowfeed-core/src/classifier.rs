//! Record classification.

use crate::record::{ChangeEvent, ChangeKind, RawRecord};

/// Turns raw records into change events.
///
/// The classifier makes no suppression decision for arrivals. For mutations
/// it drops records that carry neither an edit nor a retraction timestamp:
/// the mutation query matches on coarser timestamps (delivery, read) too, so
/// such rows are expected false positives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeClassifier;

impl ChangeClassifier {
    /// Create a new classifier.
    pub fn new() -> Self {
        Self
    }

    /// Classify a record from the arrival feed.
    pub fn classify_arrival(&self, record: RawRecord) -> ChangeEvent {
        ChangeEvent::new(ChangeKind::Arrived, record)
    }

    /// Classify a record from the mutation feed.
    ///
    /// A retraction wins over an edit when both are present.
    pub fn classify_mutation(&self, record: RawRecord) -> Option<ChangeEvent> {
        let kind = Self::mutation_kind(&record)?;
        Some(ChangeEvent::new(kind, record))
    }

    /// Get the mutation kind of a record without consuming it.
    pub fn mutation_kind(record: &RawRecord) -> Option<ChangeKind> {
        if record.retracted_at.is_some() {
            Some(ChangeKind::Retracted)
        } else if record.edited_at.is_some() {
            Some(ChangeKind::Edited)
        } else {
            None
        }
    }
}
