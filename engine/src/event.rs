//! Change events delivered by a remote change stream.
//!
//! Events arrive in transport delivery order, which is not necessarily the
//! order of the records' sequences.

use crate::{Record, RecordId};
use serde::{Deserialize, Serialize};

/// An incremental change to a remote collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeEvent {
    Inserted(Record),
    Updated(Record),
    Deleted { id: RecordId },
}

impl ChangeEvent {
    /// Shorthand for a delete event.
    pub fn deleted(id: impl Into<RecordId>) -> Self {
        ChangeEvent::Deleted { id: id.into() }
    }

    /// Get the record ID this event targets.
    pub fn record_id(&self) -> &RecordId {
        match self {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => &record.id,
            ChangeEvent::Deleted { id } => id,
        }
    }

    /// Get the carried record, if any.
    pub fn record(&self) -> Option<&Record> {
        match self {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => Some(record),
            ChangeEvent::Deleted { .. } => None,
        }
    }

    /// Short name of the event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Inserted(_) => "inserted",
            ChangeEvent::Updated(_) => "updated",
            ChangeEvent::Deleted { .. } => "deleted",
        }
    }
}
