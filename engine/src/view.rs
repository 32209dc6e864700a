//! Collection view - the local projection of one remote collection.
//!
//! The view combines an initial bulk read with a stream of change events and
//! optimistic local writes. It performs no IO: the caller feeds it the bulk
//! read result, the events, and the write requests, and reads back the
//! ordered records.
//!
//! Invariants, after every operation:
//! - records are sorted by `(sequence, id)` ascending
//! - no two records share an id
//! - every optimistic record in the view has a pending write, and every
//!   pending write has its optimistic record in the view

use crate::{
    error::Result,
    filter::Filter,
    reconcile::{PendingWrite, PendingWrites, Resolution, RollbackOutcome},
    record::Origin,
    snapshot::ViewSnapshot,
    ChangeEvent, CollectionName, CorrelationToken, Error, Record, RecordId, Sequence,
    SequenceClock,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Lifecycle phase of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Bulk read in flight; events are buffered
    Loading,
    /// Populated; events are applied as they arrive
    Ready,
    /// Terminal; everything is a no-op
    Closed,
}

/// Per-view behaviour switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewOptions {
    /// Payload field holding the correlation token of optimistic writes
    pub correlation_field: Option<String>,
    /// Boolean payload field tracking read state
    pub read_field: Option<String>,
}

impl ViewOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_field(mut self, field: impl Into<String>) -> Self {
        self.correlation_field = Some(field.into());
        self
    }

    pub fn with_read_field(mut self, field: impl Into<String>) -> Self {
        self.read_field = Some(field.into());
        self
    }
}

/// Why an event left the view untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The record does not match the view's filter
    Filtered,
    /// Delete of a record the view does not hold
    UnknownRecord,
    /// Redelivery of a record identical to the one held
    Unchanged,
    /// The view is closed
    Closed,
}

/// Result of applying one change event.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// A new record was added
    Inserted { id: RecordId },
    /// An existing record was replaced; `moved` when its position changed
    Replaced { id: RecordId, moved: bool },
    /// A record was removed
    Removed { id: RecordId },
    /// A pending optimistic record was replaced by its confirmed counterpart
    Confirmed { local_id: RecordId, id: RecordId },
    /// Held until the bulk read completes
    Buffered,
    /// Nothing changed
    Ignored(IgnoreReason),
}

impl ApplyOutcome {
    /// Whether the visible records changed.
    pub fn changed(&self) -> bool {
        !matches!(self, ApplyOutcome::Buffered | ApplyOutcome::Ignored(_))
    }
}

/// Result of seeding a view with a bulk read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedOutcome {
    /// Number of remote records installed
    pub loaded: usize,
    /// Optimistic writes confirmed by the bulk read, as `(local_id, id)`
    pub confirmed: Vec<(RecordId, RecordId)>,
    /// Outcomes of the events buffered during loading, in delivery order
    pub replayed: Vec<ApplyOutcome>,
}

/// The local, ordered, deduplicated projection of a remote collection.
#[derive(Debug, Clone)]
pub struct CollectionView {
    collection: CollectionName,
    filter: Filter,
    options: ViewOptions,
    phase: Phase,
    /// Sorted by `(sequence, id)`
    records: Vec<Record>,
    /// Sequence of every held record, for binary-search lookup
    index: HashMap<RecordId, Sequence>,
    clock: SequenceClock,
    pending: PendingWrites,
    /// Events received while loading, in delivery order
    buffer: Vec<ChangeEvent>,
    revision: u64,
}

fn cmp_entry(record: &Record, sequence: Sequence, id: &str) -> Ordering {
    record
        .sequence
        .cmp(&sequence)
        .then_with(|| record.id.as_str().cmp(id))
}

fn cmp_records(a: &Record, b: &Record) -> Ordering {
    cmp_entry(a, b.sequence, &b.id)
}

impl CollectionView {
    /// Create an empty view in the `Loading` phase.
    pub fn new(
        collection: impl Into<CollectionName>,
        filter: Filter,
        options: ViewOptions,
    ) -> Result<Self> {
        let collection = collection.into();
        if collection.trim().is_empty() {
            return Err(Error::InvalidCollection(collection));
        }

        Ok(Self {
            collection,
            filter,
            options,
            phase: Phase::Loading,
            records: Vec::new(),
            index: HashMap::new(),
            clock: SequenceClock::new(),
            pending: PendingWrites::new(),
            buffer: Vec::new(),
            revision: 0,
        })
    }

    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Counter bumped on every visible change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn clock(&self) -> &SequenceClock {
        &self.clock
    }

    /// Records in view order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Get a record by ID.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.position(id).map(|pos| &self.records[pos])
    }

    /// Number of events waiting for the bulk read.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Optimistic writes still waiting for their echo.
    pub fn pending_writes(&self) -> impl Iterator<Item = &PendingWrite> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// How a local id was resolved, if it was.
    pub fn resolution(&self, local_id: &str) -> Option<&Resolution> {
        self.pending.resolution(local_id)
    }

    /// Number of records whose read flag is not set.
    ///
    /// Always zero when the view tracks no read field.
    pub fn unread_count(&self) -> usize {
        match &self.options.read_field {
            Some(field) => self.records.iter().filter(|r| !r.flag(field)).count(),
            None => 0,
        }
    }

    /// Capture the current state as an immutable snapshot.
    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            collection: self.collection.clone(),
            phase: self.phase,
            revision: self.revision,
            records: self.records.clone().into(),
            pending: self.pending.len(),
            unread: self.unread_count(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Install the result of a bulk read and replay buffered events.
    ///
    /// Remote records not present in `records` are dropped. Pending
    /// optimistic records are kept unless the bulk read already contains
    /// their confirmed counterpart, or a remote record with the same id.
    pub fn seed(&mut self, records: Vec<Record>) -> SeedOutcome {
        if self.phase == Phase::Closed {
            return SeedOutcome::default();
        }

        let mut kept: Vec<Record> = std::mem::take(&mut self.records)
            .into_iter()
            .filter(|r| r.is_optimistic() && self.pending.is_pending(&r.id))
            .collect();

        // Later duplicates win
        let mut by_id: HashMap<RecordId, Record> = HashMap::with_capacity(records.len());
        for mut record in records {
            if !self.filter.matches(&record.payload) {
                continue;
            }
            record.origin = Origin::Remote;
            self.clock.observe(record.sequence);
            by_id.insert(record.id.clone(), record);
        }
        let mut remote: Vec<Record> = by_id.into_values().collect();
        remote.sort_by(cmp_records);

        let mut confirmed = Vec::new();
        for record in &remote {
            let Some(token) = self.token_of(record) else {
                continue;
            };
            if let Some(write) = self.pending.confirm(&token, &record.id) {
                kept.retain(|r| r.id != write.local_id);
                confirmed.push((write.local_id, record.id.clone()));
            }
        }
        for record in &remote {
            if self.pending.roll_back(&record.id).is_some() {
                kept.retain(|r| r.id != record.id);
            }
        }

        let loaded = remote.len();
        kept.extend(remote);
        kept.sort_by(cmp_records);
        self.records = kept;
        self.rebuild_index();
        self.phase = Phase::Ready;
        self.revision += 1;

        let replayed = self.drain_buffer();
        SeedOutcome {
            loaded,
            confirmed,
            replayed,
        }
    }

    /// Leave `Loading` without a bulk read result (the read failed).
    ///
    /// The view keeps whatever it held and replays buffered events.
    pub fn abort_load(&mut self) -> Vec<ApplyOutcome> {
        if self.phase != Phase::Loading {
            return Vec::new();
        }
        self.phase = Phase::Ready;
        self.revision += 1;
        self.drain_buffer()
    }

    /// Move a ready view back to `Loading` ahead of a fresh bulk read.
    ///
    /// Returns false if the view is not ready.
    pub fn begin_reload(&mut self) -> bool {
        if self.phase != Phase::Ready {
            return false;
        }
        self.phase = Phase::Loading;
        self.revision += 1;
        true
    }

    /// Close the view and discard its contents. Idempotent.
    ///
    /// Returns true on the first call.
    pub fn close(&mut self) -> bool {
        if self.phase == Phase::Closed {
            return false;
        }
        self.phase = Phase::Closed;
        self.records.clear();
        self.index.clear();
        self.buffer.clear();
        self.pending.clear();
        self.revision += 1;
        true
    }

    // ------------------------------------------------------------------
    // Change events
    // ------------------------------------------------------------------

    /// Apply one change event in delivery order.
    pub fn apply(&mut self, event: ChangeEvent) -> ApplyOutcome {
        match self.phase {
            Phase::Closed => ApplyOutcome::Ignored(IgnoreReason::Closed),
            Phase::Loading => {
                self.buffer.push(event);
                ApplyOutcome::Buffered
            }
            Phase::Ready => self.apply_live(event),
        }
    }

    fn drain_buffer(&mut self) -> Vec<ApplyOutcome> {
        std::mem::take(&mut self.buffer)
            .into_iter()
            .map(|event| self.apply_live(event))
            .collect()
    }

    fn apply_live(&mut self, event: ChangeEvent) -> ApplyOutcome {
        let outcome = match event {
            ChangeEvent::Inserted(record) => self.merge_remote(record, false),
            ChangeEvent::Updated(record) => self.merge_remote(record, true),
            ChangeEvent::Deleted { id } => match self.remove_entry(&id) {
                Some(_) => {
                    // An echo can only delete a local id through a buggy
                    // transport, but the pending entry must not outlive it.
                    self.pending.roll_back(&id);
                    ApplyOutcome::Removed { id }
                }
                None => ApplyOutcome::Ignored(IgnoreReason::UnknownRecord),
            },
        };
        if outcome.changed() {
            self.revision += 1;
        }
        outcome
    }

    fn merge_remote(&mut self, mut record: Record, is_update: bool) -> ApplyOutcome {
        record.origin = Origin::Remote;
        self.clock.observe(record.sequence);

        let echo = self
            .token_of(&record)
            .and_then(|token| self.pending.by_token(&token).cloned());

        if let Some(write) = echo {
            self.pending.confirm(&write.token, &record.id);
            self.remove_entry(&write.local_id);
            if self.filter.matches(&record.payload) {
                self.upsert(record.clone());
            } else {
                // The authoritative row no longer belongs here
                self.remove_entry(&record.id);
            }
            return ApplyOutcome::Confirmed {
                local_id: write.local_id,
                id: record.id,
            };
        }

        // A remote id equal to a pending local id takes the slot over
        let evicted = self.pending.roll_back(&record.id).is_some()
            && self.remove_entry(&record.id).is_some();

        if !self.filter.matches(&record.payload) {
            if evicted || (is_update && self.remove_entry(&record.id).is_some()) {
                return ApplyOutcome::Removed { id: record.id };
            }
            return ApplyOutcome::Ignored(IgnoreReason::Filtered);
        }

        if self.get(&record.id) == Some(&record) {
            return ApplyOutcome::Ignored(IgnoreReason::Unchanged);
        }

        let id = record.id.clone();
        match self.upsert(record) {
            None => ApplyOutcome::Inserted { id },
            Some(moved) => ApplyOutcome::Replaced { id, moved },
        }
    }

    // ------------------------------------------------------------------
    // Optimistic writes
    // ------------------------------------------------------------------

    /// Show a write immediately, before the server confirms it.
    ///
    /// The payload must carry a correlation token under the configured
    /// correlation field and match the view's filter. Returns the temporary
    /// local id, which never equals the id of a record held by the view.
    pub fn write_optimistic(&mut self, payload: serde_json::Value) -> Result<RecordId> {
        if self.phase == Phase::Closed {
            return Err(Error::ViewClosed(self.collection.clone()));
        }
        let field = self
            .options
            .correlation_field
            .clone()
            .ok_or_else(|| Error::CorrelationNotConfigured(self.collection.clone()))?;

        let candidate = Record::optimistic("", 0, payload);
        let token = candidate
            .field_str(&field)
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingCorrelationToken(field))?;

        if let Some(existing) = self.pending.by_token(&token) {
            return Err(Error::DuplicateCorrelationToken {
                token,
                local_id: existing.local_id.clone(),
            });
        }
        if !self.filter.matches(&candidate.payload) {
            return Err(Error::OutsideFilter(self.collection.clone()));
        }

        let mut local_id = self.pending.next_local_id();
        while self.index.contains_key(&local_id) {
            local_id = self.pending.next_local_id();
        }
        let sequence = self.clock.tick();
        let record = Record::optimistic(local_id.clone(), sequence, candidate.payload);

        self.insert_sorted(record);
        self.pending.track(PendingWrite {
            local_id: local_id.clone(),
            token,
            sequence,
        });
        self.revision += 1;

        Ok(local_id)
    }

    /// Remove a still-pending optimistic record.
    ///
    /// Rolling back an id that was confirmed, already rolled back, or never
    /// issued is a no-op.
    pub fn rollback(&mut self, local_id: &str) -> RollbackOutcome {
        if self.phase == Phase::Closed || self.pending.roll_back(local_id).is_none() {
            return RollbackOutcome::Noop;
        }
        match self.remove_entry(local_id) {
            Some(record) => {
                self.revision += 1;
                RollbackOutcome::RolledBack(record)
            }
            None => RollbackOutcome::Noop,
        }
    }

    // ------------------------------------------------------------------
    // Read state
    // ------------------------------------------------------------------

    /// Set the read flag on the given records.
    ///
    /// Returns the ids whose flag actually changed. Unknown ids, records
    /// already read and optimistic records (which have no remote row to
    /// update yet) are skipped.
    pub fn mark_read(&mut self, ids: &[RecordId]) -> Result<Vec<RecordId>> {
        let field = self.read_field()?;
        let mut changed = Vec::new();
        for id in ids {
            let Some(pos) = self.position(id) else {
                continue;
            };
            let record = &mut self.records[pos];
            if !record.is_optimistic() && !record.flag(&field) {
                record.set_field(&field, serde_json::Value::Bool(true));
                changed.push(id.clone());
            }
        }
        if !changed.is_empty() {
            self.revision += 1;
        }
        Ok(changed)
    }

    /// Set the read flag on every record in the view.
    pub fn mark_all_read(&mut self) -> Result<Vec<RecordId>> {
        let field = self.read_field()?;
        let unread: Vec<RecordId> = self
            .records
            .iter()
            .filter(|r| !r.is_optimistic() && !r.flag(&field))
            .map(|r| r.id.clone())
            .collect();
        self.mark_read(&unread)
    }

    fn read_field(&self) -> Result<String> {
        if self.phase == Phase::Closed {
            return Err(Error::ViewClosed(self.collection.clone()));
        }
        self.options
            .read_field
            .clone()
            .ok_or_else(|| Error::ReadFieldNotConfigured(self.collection.clone()))
    }

    // ------------------------------------------------------------------
    // Internal storage
    // ------------------------------------------------------------------

    fn token_of(&self, record: &Record) -> Option<CorrelationToken> {
        let field = self.options.correlation_field.as_deref()?;
        record.field_str(field).filter(|t| !t.is_empty())
    }

    fn position(&self, id: &str) -> Option<usize> {
        let sequence = *self.index.get(id)?;
        self.records
            .binary_search_by(|r| cmp_entry(r, sequence, id))
            .ok()
    }

    fn insert_sorted(&mut self, record: Record) {
        let pos = self
            .records
            .binary_search_by(|r| cmp_records(r, &record))
            .unwrap_or_else(|pos| pos);
        self.index.insert(record.id.clone(), record.sequence);
        self.records.insert(pos, record);
    }

    fn remove_entry(&mut self, id: &str) -> Option<Record> {
        let pos = self.position(id)?;
        self.index.remove(id);
        Some(self.records.remove(pos))
    }

    /// Insert or replace. Returns `None` for an insert, `Some(moved)` for a
    /// replacement.
    fn upsert(&mut self, record: Record) -> Option<bool> {
        let Some(pos) = self.position(&record.id) else {
            self.insert_sorted(record);
            return None;
        };
        if self.records[pos].sequence == record.sequence {
            self.records[pos] = record;
            return Some(false);
        }
        self.records.remove(pos);
        self.index.remove(&record.id);
        self.insert_sorted(record);
        Some(true)
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .records
            .iter()
            .map(|r| (r.id.clone(), r.sequence))
            .collect();
    }
}
