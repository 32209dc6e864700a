//! Sequence keys and the per-view sequence clock.
//!
//! Records are ordered by their sequence (a creation timestamp or a server
//! sequence number). Ties are broken by record id so the view has a total
//! order no matter how events were delivered.

use crate::{RecordId, Sequence};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Sort key of a record inside a view.
///
/// Ordering rules:
/// 1. Lower sequence first
/// 2. If sequences are equal, lexicographically lower id first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortKey {
    pub sequence: Sequence,
    pub id: RecordId,
}

impl SortKey {
    pub fn new(sequence: Sequence, id: impl Into<RecordId>) -> Self {
        Self {
            sequence,
            id: id.into(),
        }
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.sequence.cmp(&other.sequence) {
            Ordering::Equal => self.id.cmp(&other.id),
            other => other,
        }
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Local clock used to stamp optimistic records.
///
/// The clock observes every remote sequence it sees, so a tick always lands
/// after the newest confirmed record and pending writes sort at the tail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceClock {
    /// Highest sequence observed or issued so far
    pub counter: Sequence,
}

impl SequenceClock {
    /// Create a clock starting at zero.
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    /// Create a clock at a specific value.
    pub fn with_counter(counter: Sequence) -> Self {
        Self { counter }
    }

    /// Advance the clock and return the issued sequence.
    pub fn tick(&mut self) -> Sequence {
        self.counter = self.counter.saturating_add(1);
        self.counter
    }

    /// Move the clock forward to at least `sequence`.
    pub fn observe(&mut self, sequence: Sequence) {
        self.counter = self.counter.max(sequence);
    }
}
