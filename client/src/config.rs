//! Configuration management for the synchronizer.

use std::env;
use std::time::Duration;

/// Default time an optimistic write waits for its echo.
const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 10_000;

/// Synchronizer configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long `submit` waits for the echo before rolling back
    pub confirm_timeout: Duration,
    /// Payload field carrying the correlation token of optimistic writes
    pub correlation_field: String,
    /// Payload field tracking read state, if the collections have one
    pub read_field: Option<String>,
    /// Row field holding the record id in backend row changes
    pub id_field: String,
    /// Row field holding the ordering key in backend row changes
    pub sequence_field: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            confirm_timeout: Duration::from_millis(DEFAULT_CONFIRM_TIMEOUT_MS),
            correlation_field: "client_token".to_string(),
            read_field: None,
            id_field: "id".to_string(),
            sequence_field: "created_at".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let confirm_timeout = match lookup("LIVEFEED_CONFIRM_TIMEOUT_MS") {
            Some(raw) => {
                let millis: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidConfirmTimeout(raw.clone()))?;
                if millis == 0 {
                    return Err(ConfigError::InvalidConfirmTimeout(raw));
                }
                Duration::from_millis(millis)
            }
            None => defaults.confirm_timeout,
        };

        let correlation_field = field(&lookup, "LIVEFEED_CORRELATION_FIELD")?
            .unwrap_or(defaults.correlation_field);
        let read_field = field(&lookup, "LIVEFEED_READ_FIELD")?;
        let id_field = field(&lookup, "LIVEFEED_ID_FIELD")?.unwrap_or(defaults.id_field);
        let sequence_field =
            field(&lookup, "LIVEFEED_SEQUENCE_FIELD")?.unwrap_or(defaults.sequence_field);

        Ok(Self {
            confirm_timeout,
            correlation_field,
            read_field,
            id_field,
            sequence_field,
        })
    }
}

fn field<F>(lookup: &F, key: &'static str) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyField(key)),
        Some(value) => Ok(Some(value.trim().to_string())),
        None => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid LIVEFEED_CONFIRM_TIMEOUT_MS value: {0:?}")]
    InvalidConfirmTimeout(String),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}
