//! Caller-side handle of an open view.

use std::sync::Arc;
use std::time::Duration;

use livefeed_engine::{CollectionName, Record, RecordId, RollbackOutcome, ViewSnapshot};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use super::actor::Command;
use crate::backend::Backend;
use crate::error::{Result, SyncCondition, SyncError, TransportError};

/// Ids of a write issued through [`SyncHandle::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
    /// Temporary id shown until the echo arrives
    pub local_id: RecordId,
    /// Id assigned by the backend
    pub id: RecordId,
}

/// Handle of one open collection view.
///
/// The view lives in its own task; the handle reads its published snapshots
/// and sends it requests. Dropping the handle closes the view.
pub struct SyncHandle {
    collection: CollectionName,
    read_field: Option<String>,
    confirm_timeout: Duration,
    backend: Arc<dyn Backend>,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<ViewSnapshot>,
    conditions: mpsc::UnboundedReceiver<SyncCondition>,
}

impl SyncHandle {
    pub(crate) fn new(
        collection: CollectionName,
        read_field: Option<String>,
        confirm_timeout: Duration,
        backend: Arc<dyn Backend>,
        commands: mpsc::UnboundedSender<Command>,
        snapshots: watch::Receiver<ViewSnapshot>,
        conditions: mpsc::UnboundedReceiver<SyncCondition>,
    ) -> Self {
        Self {
            collection,
            read_field,
            confirm_timeout,
            backend,
            commands,
            snapshots,
            conditions,
        }
    }

    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    // ------------------------------------------------------------------
    // Observing
    // ------------------------------------------------------------------

    /// The latest published snapshot.
    pub fn view(&self) -> ViewSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver notified on every change of the view.
    pub fn watch(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshots.clone()
    }

    /// Wait for the next change and return the new snapshot.
    ///
    /// Fails with [`SyncError::Closed`] once the view can no longer change.
    pub async fn changed(&mut self) -> Result<ViewSnapshot> {
        self.snapshots
            .changed()
            .await
            .map_err(|_| SyncError::Closed)?;
        Ok(self.snapshots.borrow_and_update().clone())
    }

    /// Wait until a snapshot satisfies `predicate`; checks the current one first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Result<ViewSnapshot>
    where
        F: FnMut(&ViewSnapshot) -> bool,
    {
        self.snapshots
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map(|snapshot| snapshot.clone())
            .map_err(|_| SyncError::Closed)
    }

    /// Next failure condition; `None` after the view is closed and drained.
    pub async fn next_condition(&mut self) -> Option<SyncCondition> {
        self.conditions.recv().await
    }

    /// A failure condition if one is already queued.
    pub fn try_condition(&mut self) -> Option<SyncCondition> {
        self.conditions.try_recv().ok()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Show a record immediately, without any remote write.
    ///
    /// The payload must carry a correlation token. Returns the local id.
    pub async fn write_optimistic(&self, payload: serde_json::Value) -> Result<RecordId> {
        let result = self
            .request(|reply| Command::WriteOptimistic { payload, reply })
            .await?;
        Ok(result?)
    }

    /// Remove a still-pending optimistic record. A no-op once closed.
    pub async fn rollback(&self, local_id: &str) -> RollbackOutcome {
        let local_id = local_id.to_string();
        self.request(|reply| Command::Rollback { local_id, reply })
            .await
            .unwrap_or(RollbackOutcome::Noop)
    }

    /// Write optimistically, then insert remotely.
    ///
    /// A failed insert rolls the optimistic record back. A successful one
    /// arms the confirmation deadline: if the echo has not arrived when it
    /// expires, the record is rolled back and `ConfirmationTimedOut` raised.
    pub async fn submit(&self, payload: serde_json::Value) -> Result<Submitted> {
        let local_id = self.write_optimistic(payload.clone()).await?;

        match self.backend.insert(&self.collection, payload).await {
            Ok(record) => {
                tracing::debug!(
                    collection = %self.collection,
                    local_id = %local_id,
                    id = %record.id,
                    "Remote insert accepted"
                );
                self.arm_deadline(local_id.clone());
                Ok(Submitted {
                    local_id,
                    id: record.id,
                })
            }
            Err(e) => Err(self.write_failed(Some(local_id), e).await),
        }
    }

    /// Patch a record remotely. The view changes when the echo arrives.
    pub async fn update(&self, id: &str, patch: serde_json::Value) -> Result<Record> {
        match self.backend.update(&self.collection, id, patch).await {
            Ok(record) => Ok(record),
            Err(e) => Err(self.write_failed(None, e).await),
        }
    }

    /// Delete a record remotely. The view changes when the echo arrives.
    pub async fn remove(&self, id: &str) -> Result<()> {
        match self.backend.remove(&self.collection, id).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.write_failed(None, e).await),
        }
    }

    // ------------------------------------------------------------------
    // Read state
    // ------------------------------------------------------------------

    /// Mark records read locally and remotely.
    ///
    /// Returns the ids whose flag changed. A failed remote update raises
    /// `WriteFailed` and leaves the local flag set until the next echo or
    /// reload says otherwise.
    pub async fn mark_read(&self, ids: &[RecordId]) -> Result<Vec<RecordId>> {
        let ids = ids.to_vec();
        let changed = self
            .request(|reply| Command::MarkRead {
                ids: Some(ids),
                reply,
            })
            .await??;
        self.push_read(&changed).await;
        Ok(changed)
    }

    /// Mark every record of the view read.
    pub async fn mark_all_read(&self) -> Result<Vec<RecordId>> {
        let changed = self
            .request(|reply| Command::MarkRead { ids: None, reply })
            .await??;
        self.push_read(&changed).await;
        Ok(changed)
    }

    async fn push_read(&self, ids: &[RecordId]) {
        let Some(field) = &self.read_field else {
            return;
        };
        for id in ids {
            let mut patch = serde_json::Map::new();
            patch.insert(field.clone(), serde_json::Value::Bool(true));
            let patch = serde_json::Value::Object(patch);
            if let Err(e) = self.backend.update(&self.collection, id, patch).await {
                self.write_failed(None, e).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Issue a fresh bulk read. Returns false if the view is closed.
    pub async fn reload(&self) -> bool {
        self.request(|reply| Command::Reload { reply })
            .await
            .unwrap_or(false)
    }

    /// Attach a fresh change stream and reload.
    ///
    /// Used after `StreamInterrupted` to recover the events missed while
    /// detached.
    pub async fn reattach(&self) -> Result<()> {
        self.request(|reply| Command::Reattach { reply })
            .await?
            .map_err(SyncError::StreamFailed)
    }

    /// Close the view and release its subscription. Idempotent.
    pub async fn close(&self) {
        // An error means the actor already stopped
        let _ = self
            .request(|reply| Command::Close { reply: Some(reply) })
            .await;
    }

    pub fn is_closed(&self) -> bool {
        self.snapshots.borrow().is_closed() || self.commands.is_closed()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| SyncError::Closed)?;
        response.await.map_err(|_| SyncError::Closed)
    }

    /// Report a failed remote write and build the error to return.
    async fn write_failed(&self, local_id: Option<RecordId>, error: TransportError) -> SyncError {
        let reason = error.to_string();
        let _ = self
            .request(|reply| Command::Fail {
                local_id,
                reason,
                reply,
            })
            .await;
        SyncError::WriteFailed(error)
    }

    fn arm_deadline(&self, local_id: RecordId) {
        let commands = self.commands.clone();
        let timeout = self.confirm_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = commands.send(Command::ConfirmDeadline { local_id });
        });
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("collection", &self.collection)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close { reply: None });
    }
}
