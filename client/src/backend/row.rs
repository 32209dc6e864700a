//! Decoding of hosted-backend row changes into change events.
//!
//! The real-time service delivers one JSON message per row change:
//!
//! ```json
//! {
//!   "eventType": "INSERT",
//!   "table": "messages",
//!   "commit_timestamp": "2024-05-01T10:00:00Z",
//!   "new": { "id": 7, "content": "hi", "created_at": "2024-05-01T10:00:00Z" },
//!   "old": {}
//! }
//! ```

use chrono::{DateTime, NaiveDateTime};
use livefeed_engine::{ChangeEvent, Record, RecordId, Sequence};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SyncConfig;
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowEventType {
    Insert,
    Update,
    Delete,
}

/// One row-change message as delivered by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    #[serde(rename = "eventType")]
    pub event_type: RowEventType,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
    /// Row after the change; empty for deletes
    #[serde(default)]
    pub new: Value,
    /// Row before the change; carries at least the primary key for deletes
    #[serde(default)]
    pub old: Value,
}

/// Where the id and the ordering key live in a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMapping {
    pub id_field: String,
    pub sequence_field: String,
}

impl Default for RowMapping {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl RowMapping {
    pub fn new(id_field: impl Into<String>, sequence_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            sequence_field: sequence_field.into(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(&config.id_field, &config.sequence_field)
    }

    /// Turn a full row into a remote record. The whole row is the payload.
    pub fn record(&self, row: &Value) -> Result<Record, TransportError> {
        let id = self.id(row)?;
        let sequence = match row.get(&self.sequence_field) {
            Some(value) => parse_sequence(value)?,
            None => {
                return Err(TransportError::Decode(format!(
                    "row {} has no '{}' field",
                    id, self.sequence_field
                )))
            }
        };
        Ok(Record::remote(id, sequence, row.clone()))
    }

    /// Translate a row change into a change event.
    pub fn event(&self, change: &RowChange) -> Result<ChangeEvent, TransportError> {
        match change.event_type {
            RowEventType::Insert => Ok(ChangeEvent::Inserted(self.record(&change.new)?)),
            RowEventType::Update => Ok(ChangeEvent::Updated(self.record(&change.new)?)),
            RowEventType::Delete => Ok(ChangeEvent::deleted(self.id(&change.old)?)),
        }
    }

    /// Parse a raw row-change message.
    pub fn decode(&self, json: &str) -> Result<ChangeEvent, TransportError> {
        let change: RowChange =
            serde_json::from_str(json).map_err(|e| TransportError::Decode(e.to_string()))?;
        self.event(&change)
    }

    fn id(&self, row: &Value) -> Result<RecordId, TransportError> {
        match row.get(&self.id_field) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(TransportError::Decode(format!(
                "row has no usable '{}' field",
                self.id_field
            ))),
        }
    }
}

/// Read an ordering key: a non-negative integer or an RFC 3339 timestamp.
///
/// Timestamps become milliseconds since the epoch. Timestamps without an
/// offset are taken as UTC.
pub fn parse_sequence(value: &Value) -> Result<Sequence, TransportError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| TransportError::Decode(format!("invalid sequence number: {}", n))),
        Value::String(s) => {
            let millis = match DateTime::parse_from_rfc3339(s) {
                Ok(ts) => ts.timestamp_millis(),
                Err(_) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .map_err(|e| TransportError::Decode(format!("invalid timestamp {:?}: {}", s, e)))?
                    .and_utc()
                    .timestamp_millis(),
            };
            u64::try_from(millis)
                .map_err(|_| TransportError::Decode(format!("timestamp before epoch: {}", s)))
        }
        other => Err(TransportError::Decode(format!(
            "unsupported sequence value: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_insert_with_timestamp() {
        let mapping = RowMapping::default();
        let event = mapping
            .decode(
                r#"{
                    "eventType": "INSERT",
                    "table": "messages",
                    "new": {"id": 7, "content": "hi", "created_at": "2024-05-01T10:00:00.250Z"},
                    "old": {}
                }"#,
            )
            .unwrap();

        let record = event.record().unwrap();
        assert_eq!(event.kind(), "inserted");
        assert_eq!(record.id, "7");
        assert_eq!(record.sequence, 1_714_557_600_250);
        assert_eq!(record.payload["content"], "hi");
    }

    #[test]
    fn decodes_update_and_delete() {
        let mapping = RowMapping::new("uuid", "seq");
        let update = RowChange {
            event_type: RowEventType::Update,
            table: None,
            commit_timestamp: None,
            new: json!({"uuid": "a", "seq": 4, "read": true}),
            old: json!({"uuid": "a"}),
        };
        match mapping.event(&update).unwrap() {
            ChangeEvent::Updated(record) => {
                assert_eq!(record.id, "a");
                assert_eq!(record.sequence, 4);
            }
            other => panic!("expected update, got {:?}", other),
        }

        let delete = mapping
            .decode(r#"{"eventType": "DELETE", "old": {"uuid": "a"}}"#)
            .unwrap();
        assert_eq!(delete, ChangeEvent::deleted("a"));
    }

    #[test]
    fn naive_timestamps_are_utc() {
        assert_eq!(
            parse_sequence(&json!("1970-01-01T00:00:01.5")).unwrap(),
            1500
        );
        assert_eq!(parse_sequence(&json!("1970-01-01T01:00:00+01:00")).unwrap(), 0);
    }

    #[test]
    fn rejects_bad_rows() {
        let mapping = RowMapping::default();
        assert!(matches!(
            mapping.record(&json!({"created_at": 1})),
            Err(TransportError::Decode(_))
        ));
        assert!(matches!(
            mapping.record(&json!({"id": 1})),
            Err(TransportError::Decode(_))
        ));
        assert!(parse_sequence(&json!(-5)).is_err());
        assert!(parse_sequence(&json!("yesterday")).is_err());
        assert!(parse_sequence(&json!("1969-12-31T23:59:59Z")).is_err());
        assert!(mapping.decode(r#"{"eventType": "TRUNCATE"}"#).is_err());
    }
}
