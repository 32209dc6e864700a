//! Unified error handling for the synchronizer.
//!
//! Two kinds of failure reach the caller:
//! - [`SyncError`] is returned from a handle method that could not complete
//! - [`SyncCondition`] is pushed on the handle's condition stream when
//!   something goes wrong in the background (bulk read, stream, writes)
//!
//! Neither is fatal: both are scoped to one view, which stays usable.

use livefeed_engine::{CollectionName, RecordId};
use serde::Serialize;

/// Failure reported by a backend collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("rejected by backend: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("undecodable row: {0}")]
    Decode(String),
}

/// Error returned from synchronizer operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("engine error: {0}")]
    Engine(#[from] livefeed_engine::Error),

    #[error("bulk read of '{collection}' failed: {source}")]
    LoadFailed {
        collection: CollectionName,
        #[source]
        source: TransportError,
    },

    #[error("change stream unavailable: {0}")]
    StreamFailed(#[source] TransportError),

    #[error("remote write failed: {0}")]
    WriteFailed(#[source] TransportError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("view is closed")]
    Closed,
}

/// Condition delivered alongside the (possibly stale) view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncCondition {
    /// The initial bulk read (or a reload) failed; not retried automatically
    LoadFailed {
        collection: CollectionName,
        reason: String,
    },
    /// The change stream dropped or could not be attached
    StreamInterrupted {
        collection: CollectionName,
        reason: String,
    },
    /// A remote write issued through the handle failed
    WriteFailed {
        /// Temporary id of the rolled back optimistic record, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        local_id: Option<RecordId>,
        reason: String,
    },
    /// An optimistic write was not echoed in time and was rolled back
    ConfirmationTimedOut { local_id: RecordId },
}

/// Result type alias for synchronizer operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::LoadFailed {
            collection: "tasks".into(),
            source: TransportError::Unavailable("connection refused".into()),
        };
        assert_eq!(
            err.to_string(),
            "bulk read of 'tasks' failed: backend unavailable: connection refused"
        );

        let err: SyncError = livefeed_engine::Error::ViewClosed("tasks".into()).into();
        assert_eq!(err.to_string(), "engine error: view is closed: tasks");
    }

    #[test]
    fn condition_serialization() {
        let condition = SyncCondition::WriteFailed {
            local_id: None,
            reason: "unauthorized".into(),
        };
        let json = serde_json::to_string(&condition).unwrap();
        assert_eq!(json, r#"{"type":"write_failed","reason":"unauthorized"}"#);

        let condition = SyncCondition::ConfirmationTimedOut {
            local_id: "local-1".into(),
        };
        let json = serde_json::to_string(&condition).unwrap();
        assert_eq!(
            json,
            r#"{"type":"confirmation_timed_out","local_id":"local-1"}"#
        );
    }
}
