//! The task that owns one collection view.
//!
//! Every mutation of a view (change events, bulk read results, optimistic
//! writes, rollbacks, read marks, confirmation deadlines) is a message into
//! this task, so they are applied one at a time in arrival order.

use std::sync::Arc;

use livefeed_engine::{CollectionView, Phase, Record, RecordId, RollbackOutcome, ViewSnapshot};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::backend::{Backend, FeedMessage, Subscription};
use crate::error::{SyncCondition, TransportError};

type Reply<T> = oneshot::Sender<T>;
type FetchResult = (u64, Result<Vec<Record>, TransportError>);

/// Requests sent from a handle to its actor.
#[derive(Debug)]
pub(crate) enum Command {
    WriteOptimistic {
        payload: serde_json::Value,
        reply: Reply<livefeed_engine::error::Result<RecordId>>,
    },
    Rollback {
        local_id: RecordId,
        reply: Reply<RollbackOutcome>,
    },
    /// The echo of a submitted write is due
    ConfirmDeadline { local_id: RecordId },
    /// A remote write issued by the handle failed
    Fail {
        local_id: Option<RecordId>,
        reason: String,
        reply: Reply<()>,
    },
    /// Mark the given records read, or every record when `ids` is `None`
    MarkRead {
        ids: Option<Vec<RecordId>>,
        reply: Reply<livefeed_engine::error::Result<Vec<RecordId>>>,
    },
    Reload { reply: Reply<bool> },
    Reattach {
        reply: Reply<Result<(), TransportError>>,
    },
    Close { reply: Option<Reply<()>> },
}

pub(crate) struct ViewActor {
    view: CollectionView,
    backend: Arc<dyn Backend>,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<ViewSnapshot>,
    conditions: mpsc::UnboundedSender<SyncCondition>,
    subscription: Option<Subscription>,
    fetch: Option<JoinHandle<FetchResult>>,
    /// Bumped for every bulk read; results of older reads are discarded
    generation: u64,
    /// Revision of the last published snapshot
    published: u64,
}

impl ViewActor {
    pub(crate) fn new(
        view: CollectionView,
        backend: Arc<dyn Backend>,
        commands: mpsc::UnboundedReceiver<Command>,
        snapshots: watch::Sender<ViewSnapshot>,
        conditions: mpsc::UnboundedSender<SyncCondition>,
    ) -> Self {
        let published = view.revision();
        Self {
            view,
            backend,
            commands,
            snapshots,
            conditions,
            subscription: None,
            fetch: None,
            generation: 0,
            published,
        }
    }

    /// Attach the stream, start the bulk read, then serve until closed.
    ///
    /// The stream goes first so that nothing emitted while the bulk read is
    /// in flight is lost; those events are buffered by the view.
    pub(crate) async fn run(mut self) {
        tracing::debug!(collection = %self.view.collection(), "View actor started");

        // A failed attach is reported as a condition; the view still loads.
        let _ = self.attach().await;
        self.start_fetch();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                message = next_feed(&mut self.subscription) => self.on_feed(message),
                joined = next_fetch(&mut self.fetch) => self.on_fetch(joined),
            }
        }

        tracing::debug!(collection = %self.view.collection(), "View actor stopped");
    }

    /// Serve one command. Returns false once the actor should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::WriteOptimistic { payload, reply } => {
                let result = self.view.write_optimistic(payload);
                if let Ok(local_id) = &result {
                    tracing::debug!(
                        collection = %self.view.collection(),
                        local_id = %local_id,
                        "Optimistic record inserted"
                    );
                }
                self.publish();
                let _ = reply.send(result);
            }
            Command::Rollback { local_id, reply } => {
                let outcome = self.view.rollback(&local_id);
                self.publish();
                let _ = reply.send(outcome);
            }
            Command::ConfirmDeadline { local_id } => {
                if let RollbackOutcome::RolledBack(_) = self.view.rollback(&local_id) {
                    self.publish();
                    self.emit(SyncCondition::ConfirmationTimedOut { local_id });
                }
            }
            Command::Fail {
                local_id,
                reason,
                reply,
            } => {
                if let Some(local_id) = &local_id {
                    self.view.rollback(local_id);
                    self.publish();
                }
                self.emit(SyncCondition::WriteFailed { local_id, reason });
                let _ = reply.send(());
            }
            Command::MarkRead { ids, reply } => {
                let result = match ids {
                    Some(ids) => self.view.mark_read(&ids),
                    None => self.view.mark_all_read(),
                };
                self.publish();
                let _ = reply.send(result);
            }
            Command::Reload { reply } => {
                let started = self.reload();
                let _ = reply.send(started);
            }
            Command::Reattach { reply } => {
                let result = if self.view.phase() == Phase::Closed {
                    Ok(())
                } else {
                    self.attach().await.map(|()| {
                        self.reload();
                    })
                };
                let _ = reply.send(result);
            }
            Command::Close { reply } => {
                self.shutdown();
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                return false;
            }
        }
        true
    }

    fn on_feed(&mut self, message: Option<FeedMessage>) {
        match message {
            Some(FeedMessage::Event(event)) => {
                let kind = event.kind();
                let id = event.record_id().clone();
                let outcome = self.view.apply(event);
                tracing::trace!(
                    collection = %self.view.collection(),
                    kind,
                    id = %id,
                    ?outcome,
                    "Applied change event"
                );
                self.publish();
            }
            Some(FeedMessage::Interrupted(reason)) => self.detach(reason),
            None => self.detach("change stream closed".to_string()),
        }
    }

    fn on_fetch(&mut self, joined: Result<FetchResult, JoinError>) {
        self.fetch = None;
        let result = match joined {
            Ok((generation, _)) if generation != self.generation => {
                tracing::debug!(
                    collection = %self.view.collection(),
                    generation,
                    "Discarding outdated bulk read"
                );
                return;
            }
            Ok((_, result)) => result,
            Err(e) => Err(TransportError::Unavailable(format!(
                "bulk read task failed: {}",
                e
            ))),
        };

        match result {
            Ok(records) => {
                let outcome = self.view.seed(records);
                tracing::info!(
                    collection = %self.view.collection(),
                    loaded = outcome.loaded,
                    confirmed = outcome.confirmed.len(),
                    replayed = outcome.replayed.len(),
                    "View seeded"
                );
            }
            Err(e) => {
                let replayed = self.view.abort_load();
                tracing::warn!(
                    collection = %self.view.collection(),
                    replayed = replayed.len(),
                    "Bulk read failed: {}",
                    e
                );
                self.emit(SyncCondition::LoadFailed {
                    collection: self.view.collection().clone(),
                    reason: e.to_string(),
                });
            }
        }
        self.publish();
    }

    async fn attach(&mut self) -> Result<(), TransportError> {
        if let Some(mut stale) = self.subscription.take() {
            stale.cancel();
        }

        match self.backend.subscribe(self.view.collection()).await {
            Ok(subscription) => {
                tracing::info!(
                    collection = %self.view.collection(),
                    subscription = %subscription.id(),
                    "Change stream attached"
                );
                self.subscription = Some(subscription);
                Ok(())
            }
            Err(e) => {
                self.emit(SyncCondition::StreamInterrupted {
                    collection: self.view.collection().clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn detach(&mut self, reason: String) {
        // Dropping releases the server-side resource
        self.subscription = None;
        self.emit(SyncCondition::StreamInterrupted {
            collection: self.view.collection().clone(),
            reason,
        });
    }

    /// Start a fresh bulk read. Returns false once closed.
    fn reload(&mut self) -> bool {
        match self.view.phase() {
            Phase::Closed => return false,
            Phase::Ready => {
                self.view.begin_reload();
            }
            Phase::Loading => {}
        }
        self.start_fetch();
        self.publish();
        true
    }

    fn start_fetch(&mut self) {
        if let Some(stale) = self.fetch.take() {
            stale.abort();
        }
        self.generation += 1;

        let generation = self.generation;
        let backend = Arc::clone(&self.backend);
        let collection = self.view.collection().clone();
        let filter = self.view.filter().clone();
        self.fetch = Some(tokio::spawn(async move {
            let result = backend.fetch_all(&collection, &filter).await;
            (generation, result)
        }));
    }

    fn shutdown(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
        if self.view.close() {
            tracing::info!(collection = %self.view.collection(), "View closed");
        }
        self.publish();
    }

    fn publish(&mut self) {
        if self.view.revision() == self.published {
            return;
        }
        self.published = self.view.revision();
        self.snapshots.send_replace(self.view.snapshot());
    }

    fn emit(&self, condition: SyncCondition) {
        tracing::warn!(
            collection = %self.view.collection(),
            ?condition,
            "Sync condition raised"
        );
        // The handle may already be gone
        let _ = self.conditions.send(condition);
    }
}

async fn next_feed(subscription: &mut Option<Subscription>) -> Option<FeedMessage> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_fetch(fetch: &mut Option<JoinHandle<FetchResult>>) -> Result<FetchResult, JoinError> {
    match fetch {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
