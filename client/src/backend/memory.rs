//! In-memory backend.
//!
//! Stores rows per collection, assigns ids and sequences on insert, and fans
//! every successful write out to the subscribers of the collection. Fault
//! switches let tests reproduce failed reads, rejected writes, lost echoes
//! and dropped streams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use livefeed_engine::{ChangeEvent, CollectionName, Filter, Record, RecordId};
use tokio::sync::mpsc;

use super::{ChangeFeed, FeedMessage, RecordSource, RemoteWriter, Subscription};
use crate::error::TransportError;

/// Sender for change stream messages.
pub type FeedSender = mpsc::UnboundedSender<FeedMessage>;

#[derive(Debug)]
struct Subscriber {
    collection: CollectionName,
    sender: FeedSender,
}

#[derive(Debug, Default)]
struct Inner {
    /// Rows by collection, then by id
    tables: DashMap<CollectionName, HashMap<RecordId, Record>>,
    /// All active subscribers, keyed by subscription ID
    subscribers: DashMap<String, Subscriber>,
    /// Index of subscription IDs by collection
    by_collection: DashMap<CollectionName, Vec<String>>,
    next_id: AtomicU64,
    next_sequence: AtomicU64,
    failing_fetches: AtomicUsize,
    fetch_delay_ms: AtomicU64,
    reject_writes: AtomicBool,
    suppress_echo: AtomicBool,
}

impl Inner {
    fn unregister(&self, sub_id: &str) {
        if let Some((_, sub)) = self.subscribers.remove(sub_id) {
            if let Some(mut ids) = self.by_collection.get_mut(&sub.collection) {
                ids.retain(|id| id != sub_id);
                if ids.is_empty() {
                    drop(ids);
                    self.by_collection.remove(&sub.collection);
                }
            }
            tracing::debug!(subscription = %sub_id, collection = %sub.collection, "Subscriber removed");
        }
    }

    fn senders(&self, collection: &str) -> Vec<(String, FeedSender)> {
        let ids = match self.by_collection.get(collection) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        ids.into_iter()
            .filter_map(|id| {
                let sender = self.subscribers.get(&id)?.sender.clone();
                Some((id, sender))
            })
            .collect()
    }

    /// Send a message to every subscriber of a collection.
    ///
    /// Returns the number of subscribers that received it.
    fn broadcast(&self, collection: &str, message: FeedMessage) -> usize {
        let mut sent = 0;
        let mut gone = Vec::new();

        for (id, sender) in self.senders(collection) {
            if sender.send(message.clone()).is_ok() {
                sent += 1;
            } else {
                gone.push(id);
            }
        }
        for id in gone {
            self.unregister(&id);
        }

        sent
    }
}

/// A backend that keeps everything in process memory.
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make the next `count` bulk reads fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.inner.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Delay bulk reads after they have read the rows.
    ///
    /// The result is as stale as a slow network would make it.
    pub fn set_fetch_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner.fetch_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Reject every write until switched off again.
    pub fn reject_writes(&self, reject: bool) {
        self.inner.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Stop echoing writes on the change feed until switched off again.
    pub fn suppress_echo(&self, suppress: bool) {
        self.inner.suppress_echo.store(suppress, Ordering::SeqCst);
    }

    /// Deliver an arbitrary message to the subscribers of a collection.
    ///
    /// Returns the number of subscribers that received it.
    pub fn emit(&self, collection: &str, event: ChangeEvent) -> usize {
        self.inner.broadcast(collection, FeedMessage::Event(event))
    }

    /// Drop every stream attached to a collection.
    pub fn interrupt(&self, collection: &str, reason: &str) -> usize {
        let sent = self
            .inner
            .broadcast(collection, FeedMessage::Interrupted(reason.to_string()));
        for (id, _) in self.inner.senders(collection) {
            self.inner.unregister(&id);
        }
        tracing::info!(collection = %collection, streams = sent, "Change streams interrupted");
        sent
    }

    /// Get the number of active subscribers of a collection.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.inner
            .by_collection
            .get(collection)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    /// Get a stored row.
    pub fn get(&self, collection: &str, id: &str) -> Option<Record> {
        self.inner.tables.get(collection)?.get(id).cloned()
    }

    /// Get the number of rows in a collection.
    pub fn row_count(&self, collection: &str) -> usize {
        self.inner
            .tables
            .get(collection)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    fn check_writable(&self) -> Result<(), TransportError> {
        if self.inner.reject_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("writes are disabled".into()));
        }
        Ok(())
    }

    fn echo(&self, collection: &str, event: ChangeEvent) {
        if self.inner.suppress_echo.load(Ordering::SeqCst) {
            tracing::debug!(collection = %collection, "Echo suppressed");
            return;
        }
        let sent = self.emit(collection, event);
        tracing::trace!(collection = %collection, recipients = sent, "Echoed write");
    }
}

#[async_trait]
impl RecordSource for MemoryBackend {
    async fn fetch_all(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Record>, TransportError> {
        let failing = self.inner.failing_fetches.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |n| n.checked_sub(1),
        );
        if failing.is_ok() {
            return Err(TransportError::Unavailable(format!(
                "bulk read of '{}' failed",
                collection
            )));
        }

        let mut rows: Vec<Record> = self
            .inner
            .tables
            .get(collection)
            .map(|rows| {
                rows.values()
                    .filter(|r| filter.matches(&r.payload))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|r| r.sequence);

        let delay = self.inner.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        Ok(rows)
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, collection: &str) -> Result<Subscription, TransportError> {
        let sub_id = uuid::Uuid::new_v4().to_string();
        let (sender, events) = mpsc::unbounded_channel();

        self.inner.subscribers.insert(
            sub_id.clone(),
            Subscriber {
                collection: collection.to_string(),
                sender,
            },
        );
        self.inner
            .by_collection
            .entry(collection.to_string())
            .or_default()
            .push(sub_id.clone());

        tracing::info!(subscription = %sub_id, collection = %collection, "Subscriber registered");

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let release_id = sub_id.clone();
        Ok(Subscription::new(sub_id, events, move || {
            if let Some(inner) = inner.upgrade() {
                inner.unregister(&release_id);
            }
        }))
    }
}

#[async_trait]
impl RemoteWriter for MemoryBackend {
    async fn insert(
        &self,
        collection: &str,
        payload: serde_json::Value,
    ) -> Result<Record, TransportError> {
        self.check_writable()?;
        if !payload.is_object() {
            return Err(TransportError::Rejected("payload must be an object".into()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let record = Record::remote(id.to_string(), sequence, payload);

        self.inner
            .tables
            .entry(collection.to_string())
            .or_default()
            .insert(record.id.clone(), record.clone());

        self.echo(collection, ChangeEvent::Inserted(record.clone()));
        Ok(record)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<Record, TransportError> {
        self.check_writable()?;
        let serde_json::Value::Object(patch) = patch else {
            return Err(TransportError::Rejected("patch must be an object".into()));
        };

        let record = {
            let mut table = self
                .inner
                .tables
                .get_mut(collection)
                .ok_or_else(|| TransportError::NotFound(collection.to_string()))?;
            let record = table
                .get_mut(id)
                .ok_or_else(|| TransportError::NotFound(format!("{}/{}", collection, id)))?;
            for (field, value) in patch {
                record.set_field(&field, value);
            }
            record.clone()
        };

        self.echo(collection, ChangeEvent::Updated(record.clone()));
        Ok(record)
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<(), TransportError> {
        self.check_writable()?;
        let removed = self
            .inner
            .tables
            .get_mut(collection)
            .and_then(|mut table| table.remove(id));
        if removed.is_none() {
            return Err(TransportError::NotFound(format!("{}/{}", collection, id)));
        }

        self.echo(collection, ChangeEvent::deleted(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_assigns_ids_and_sequences() {
        let backend = MemoryBackend::new();
        let a = backend.insert("tasks", json!({"title": "a"})).await.unwrap();
        let b = backend.insert("tasks", json!({"title": "b"})).await.unwrap();
        assert_eq!(a.id, "1");
        assert_eq!(b.id, "2");
        assert!(a.sequence < b.sequence);
        assert_eq!(backend.row_count("tasks"), 2);
    }

    #[tokio::test]
    async fn fetch_filters_and_sorts() {
        let backend = MemoryBackend::new();
        backend
            .insert("bids", json!({"task_id": 1, "amount": 10}))
            .await
            .unwrap();
        backend.insert("bids", json!({"task_id": 2})).await.unwrap();
        backend
            .insert("bids", json!({"task_id": 1, "amount": 12}))
            .await
            .unwrap();

        let rows = backend
            .fetch_all("bids", &Filter::eq("task_id", 1))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);

        let rows = backend.fetch_all("missing", &Filter::All).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn fetch_failures_are_counted() {
        let backend = MemoryBackend::new();
        backend.fail_next_fetches(1);
        assert!(backend.fetch_all("tasks", &Filter::All).await.is_err());
        assert!(backend.fetch_all("tasks", &Filter::All).await.is_ok());
    }

    #[tokio::test]
    async fn writes_fan_out_to_subscribers() {
        let backend = MemoryBackend::new();
        let mut tasks = backend.subscribe("tasks").await.unwrap();
        let mut messages = backend.subscribe("messages").await.unwrap();
        assert_eq!(backend.subscriber_count("tasks"), 1);

        let record = backend.insert("tasks", json!({"title": "a"})).await.unwrap();
        backend
            .update("tasks", &record.id, json!({"status": "assigned"}))
            .await
            .unwrap();
        backend.remove("tasks", &record.id).await.unwrap();

        match tasks.recv().await {
            Some(FeedMessage::Event(ChangeEvent::Inserted(r))) => assert_eq!(r.id, record.id),
            other => panic!("expected insert, got {:?}", other),
        }
        match tasks.recv().await {
            Some(FeedMessage::Event(ChangeEvent::Updated(r))) => {
                assert_eq!(r.payload, json!({"title": "a", "status": "assigned"}));
                assert_eq!(r.sequence, record.sequence);
            }
            other => panic!("expected update, got {:?}", other),
        }
        assert_eq!(
            tasks.recv().await,
            Some(FeedMessage::Event(ChangeEvent::deleted(record.id)))
        );

        // Nothing leaked into the other collection
        backend.interrupt("messages", "test");
        assert_eq!(
            messages.recv().await,
            Some(FeedMessage::Interrupted("test".into()))
        );
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let backend = MemoryBackend::new();
        let sub = backend.subscribe("tasks").await.unwrap();
        assert_eq!(backend.subscriber_count("tasks"), 1);
        drop(sub);
        assert_eq!(backend.subscriber_count("tasks"), 0);
    }

    #[tokio::test]
    async fn interrupt_detaches_streams() {
        let backend = MemoryBackend::new();
        let _a = backend.subscribe("tasks").await.unwrap();
        let _b = backend.subscribe("tasks").await.unwrap();
        assert_eq!(backend.interrupt("tasks", "network lost"), 2);
        assert_eq!(backend.subscriber_count("tasks"), 0);
    }

    #[tokio::test]
    async fn rejected_and_missing_writes() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.insert("tasks", json!("not an object")).await,
            Err(TransportError::Rejected(_))
        ));
        assert!(matches!(
            backend.update("tasks", "1", json!({"read": true})).await,
            Err(TransportError::NotFound(_))
        ));
        assert!(matches!(
            backend.remove("tasks", "1").await,
            Err(TransportError::NotFound(_))
        ));

        backend.reject_writes(true);
        assert!(matches!(
            backend.insert("tasks", json!({})).await,
            Err(TransportError::Rejected(_))
        ));
        assert_eq!(backend.row_count("tasks"), 0);
    }
}
