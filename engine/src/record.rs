//! Record types held by a collection view.

use crate::{sequence::SortKey, RecordId, Sequence};
use serde::{Deserialize, Serialize};

/// Origin of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    /// Confirmed by the remote store
    Remote,
    /// Written locally and waiting for the server echo
    OptimisticLocal,
}

/// One item of a synchronized collection (task, message, bid, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Identifier assigned by the remote store, or a temporary local id
    pub id: RecordId,
    /// Domain fields (JSON object)
    pub payload: serde_json::Value,
    /// Ordering key
    pub sequence: Sequence,
    /// Whether the record is confirmed or speculative
    pub origin: Origin,
}

impl Record {
    /// Create a confirmed record.
    pub fn remote(id: impl Into<RecordId>, sequence: Sequence, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
            sequence,
            origin: Origin::Remote,
        }
    }

    /// Create a speculative record for an optimistic write.
    pub fn optimistic(
        id: impl Into<RecordId>,
        sequence: Sequence,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            payload,
            sequence,
            origin: Origin::OptimisticLocal,
        }
    }

    /// Check if this record is still waiting for confirmation.
    pub fn is_optimistic(&self) -> bool {
        self.origin == Origin::OptimisticLocal
    }

    /// The key this record sorts by.
    pub fn sort_key(&self) -> SortKey {
        SortKey::new(self.sequence, self.id.clone())
    }

    /// Read a string-like field from the payload.
    ///
    /// Numbers are rendered as strings so integer tokens correlate too.
    pub fn field_str(&self, field: &str) -> Option<String> {
        match self.payload.get(field)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Whether a boolean payload field is set to `true`.
    pub fn flag(&self, field: &str) -> bool {
        self.payload
            .get(field)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Set a payload field, turning a non-object payload into an object.
    pub fn set_field(&mut self, field: &str, value: serde_json::Value) {
        if !self.payload.is_object() {
            self.payload = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.payload.as_object_mut() {
            map.insert(field.to_string(), value);
        }
    }
}
