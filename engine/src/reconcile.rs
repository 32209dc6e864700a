//! Reconciliation of optimistic writes with their server echoes.
//!
//! An optimistic write is shown immediately under a temporary local id. The
//! caller embeds a correlation token in the payload; when a remote record
//! carrying the same token shows up (as a change event or in a fresh bulk
//! read) the speculative record is retired in favour of the confirmed one.
//!
//! Every local id moves through exactly one of:
//!
//! ```text
//! pending -> confirmed
//! pending -> rolled back
//! ```
//!
//! The most recent resolutions are remembered for inspection. A late
//! rollback is a no-op whether or not its resolution is still remembered,
//! since only pending ids can be rolled back.

use crate::{CorrelationToken, Record, RecordId, Sequence};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Prefix of temporary ids handed out for optimistic records.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Number of resolutions kept before the oldest is forgotten.
pub const RESOLVED_CAPACITY: usize = 256;

/// An optimistic write waiting for its echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    /// Temporary id of the speculative record
    pub local_id: RecordId,
    /// Correlation token carried in the payload
    pub token: CorrelationToken,
    /// Sequence the speculative record was stamped with
    pub sequence: Sequence,
}

/// How a local id was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Resolution {
    /// Replaced by the remote record with this id
    Confirmed { id: RecordId },
    /// Removed by the caller
    RolledBack,
}

/// Result of a rollback request.
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackOutcome {
    /// The speculative record was removed from the view
    RolledBack(Record),
    /// Nothing to do: already confirmed, already rolled back, or unknown
    Noop,
}

impl RollbackOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, RollbackOutcome::Noop)
    }
}

/// Book-keeping for optimistic writes of one view.
#[derive(Debug, Clone, Default)]
pub struct PendingWrites {
    by_token: HashMap<CorrelationToken, PendingWrite>,
    token_by_local: HashMap<RecordId, CorrelationToken>,
    resolved: HashMap<RecordId, Resolution>,
    resolved_order: VecDeque<RecordId>,
    issued: u64,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next temporary id (`local-1`, `local-2`, ...).
    pub fn next_local_id(&mut self) -> RecordId {
        self.issued += 1;
        format!("{}{}", LOCAL_ID_PREFIX, self.issued)
    }

    /// Start tracking a write.
    pub fn track(&mut self, write: PendingWrite) {
        self.token_by_local
            .insert(write.local_id.clone(), write.token.clone());
        self.by_token.insert(write.token.clone(), write);
    }

    /// Look up the pending write for a token.
    pub fn by_token(&self, token: &str) -> Option<&PendingWrite> {
        self.by_token.get(token)
    }

    /// Check if a local id is still pending.
    pub fn is_pending(&self, local_id: &str) -> bool {
        self.token_by_local.contains_key(local_id)
    }

    /// How a local id was resolved, if it was.
    pub fn resolution(&self, local_id: &str) -> Option<&Resolution> {
        self.resolved.get(local_id)
    }

    /// Mark the write carrying `token` as confirmed by `id`.
    pub fn confirm(&mut self, token: &str, id: &str) -> Option<PendingWrite> {
        let write = self.by_token.remove(token)?;
        self.token_by_local.remove(&write.local_id);
        self.remember(
            write.local_id.clone(),
            Resolution::Confirmed { id: id.to_string() },
        );
        Some(write)
    }

    /// Mark a local id as rolled back.
    pub fn roll_back(&mut self, local_id: &str) -> Option<PendingWrite> {
        let token = self.token_by_local.remove(local_id)?;
        let write = self.by_token.remove(&token)?;
        self.remember(write.local_id.clone(), Resolution::RolledBack);
        Some(write)
    }

    fn remember(&mut self, local_id: RecordId, resolution: Resolution) {
        if self.resolved.insert(local_id.clone(), resolution).is_none() {
            self.resolved_order.push_back(local_id);
        }
        while self.resolved_order.len() > RESOLVED_CAPACITY {
            if let Some(oldest) = self.resolved_order.pop_front() {
                self.resolved.remove(&oldest);
            }
        }
    }

    /// Iterate over pending writes.
    pub fn iter(&self) -> impl Iterator<Item = &PendingWrite> {
        self.by_token.values()
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Forget everything, including resolutions.
    pub fn clear(&mut self) {
        self.by_token.clear();
        self.token_by_local.clear();
        self.resolved.clear();
        self.resolved_order.clear();
    }
}
