//! Error types for the livefeed engine.

use crate::{CollectionName, RecordId};
use thiserror::Error;

/// All possible errors from the livefeed engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("invalid collection identifier: {0:?}")]
    InvalidCollection(CollectionName),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    // Optimistic write errors
    #[error("view '{0}' has no correlation field configured")]
    CorrelationNotConfigured(CollectionName),

    #[error("payload is missing correlation token field '{0}'")]
    MissingCorrelationToken(String),

    #[error("correlation token already pending: {token} (local id {local_id})")]
    DuplicateCorrelationToken { token: String, local_id: RecordId },

    #[error("payload does not match the filter of view '{0}'")]
    OutsideFilter(CollectionName),

    #[error("view '{0}' has no read field configured")]
    ReadFieldNotConfigured(CollectionName),

    // State errors
    #[error("view is closed: {0}")]
    ViewClosed(CollectionName),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::InvalidCollection(String::new());
        assert_eq!(err.to_string(), "invalid collection identifier: \"\"");

        let err = Error::MissingCorrelationToken("client_token".into());
        assert_eq!(
            err.to_string(),
            "payload is missing correlation token field 'client_token'"
        );

        let err = Error::DuplicateCorrelationToken {
            token: "abc".into(),
            local_id: "local-1".into(),
        };
        assert_eq!(
            err.to_string(),
            "correlation token already pending: abc (local id local-1)"
        );
    }
}
