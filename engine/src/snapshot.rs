//! Immutable snapshots of a view.
//!
//! A snapshot is what a screen renders. It shares its records behind an
//! `Arc`, so handing a copy to every observer is cheap, and it serializes to
//! JSON for UI layers that live across an FFI or IPC boundary.

use crate::{error::Result, CollectionName, Error, Phase, Record};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A point-in-time copy of a collection view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    /// Collection the view projects
    pub collection: CollectionName,
    /// Lifecycle phase at capture time
    pub phase: Phase,
    /// View revision at capture time
    pub revision: u64,
    /// Records in view order
    pub records: Arc<[Record]>,
    /// Number of optimistic writes awaiting confirmation
    pub pending: usize,
    /// Number of unread records (zero without a read field)
    pub unread: usize,
}

impl ViewSnapshot {
    /// Snapshot of a view that has not loaded yet.
    pub fn loading(collection: impl Into<CollectionName>) -> Self {
        Self {
            collection: collection.into(),
            phase: Phase::Loading,
            revision: 0,
            records: Arc::from(Vec::new()),
            pending: 0,
            unread: 0,
        }
    }

    /// Snapshot published once a view is closed.
    pub fn closed(collection: impl Into<CollectionName>, revision: u64) -> Self {
        Self {
            phase: Phase::Closed,
            revision,
            ..Self::loading(collection)
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get a record by ID.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Record IDs in view order.
    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidRecord(e.to_string()))
    }
}
