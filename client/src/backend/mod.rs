//! Backend collaborator contracts.
//!
//! The synchronizer never talks to a hosted backend directly. It consumes
//! three narrow contracts, injected as an `Arc<dyn Backend>`, so that every
//! view can be tested against its own backend instance:
//!
//! - [`RecordSource`]: one-shot bulk read of the matching rows
//! - [`ChangeFeed`]: live insert/update/delete events for a collection
//! - [`RemoteWriter`]: inserts, patches and deletes, echoed on the feed

mod memory;
mod row;
mod subscription;

pub use memory::MemoryBackend;
pub use row::{RowChange, RowEventType, RowMapping};
pub use subscription::{FeedMessage, Subscription};

use async_trait::async_trait;
use livefeed_engine::{Filter, Record};

use crate::error::TransportError;

/// Bulk read of a collection.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch every record of `collection` matching `filter`.
    async fn fetch_all(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Record>, TransportError>;
}

/// Live change stream of a collection.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Attach a stream scoped to `collection`.
    ///
    /// Events are delivered in transport order until the returned
    /// [`Subscription`] is cancelled or dropped.
    async fn subscribe(&self, collection: &str) -> Result<Subscription, TransportError>;
}

/// Remote writes. Successful writes are echoed through the change feed.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    /// Insert a row; the store assigns its id and sequence.
    async fn insert(
        &self,
        collection: &str,
        payload: serde_json::Value,
    ) -> Result<Record, TransportError>;

    /// Merge `patch` into the payload of an existing row.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<Record, TransportError>;

    /// Delete a row.
    async fn remove(&self, collection: &str, id: &str) -> Result<(), TransportError>;
}

/// Everything a synchronizer needs from a backend.
pub trait Backend: RecordSource + ChangeFeed + RemoteWriter {}

impl<T> Backend for T where T: RecordSource + ChangeFeed + RemoteWriter + ?Sized {}
