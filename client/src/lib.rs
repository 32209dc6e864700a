//! # Livefeed Client
//!
//! Async runtime around [`livefeed_engine`]: opens live views of remote
//! collections, keeps them in sync with a backend's change stream, and sends
//! writes through the backend while showing them optimistically.
//!
//! Each open view is owned by its own tokio task. The caller holds a
//! [`SyncHandle`], reads the latest [`ViewSnapshot`] from it, waits for
//! changes, and receives [`SyncCondition`]s when something fails in the
//! background.
//!
//! ```no_run
//! use std::sync::Arc;
//! use livefeed_client::{Filter, MemoryBackend, SyncConfig, Synchronizer};
//!
//! # async fn demo() -> livefeed_client::Result<()> {
//! let sync = Synchronizer::new(Arc::new(MemoryBackend::new()), SyncConfig::default());
//! let mut tasks = sync.open("tasks", Filter::eq("status", "open"))?;
//! let view = tasks.wait_for(|v| v.is_ready()).await?;
//! println!("{} open tasks", view.len());
//! tasks.close().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod sync;

pub use backend::{
    Backend, ChangeFeed, FeedMessage, MemoryBackend, RecordSource, RemoteWriter, RowChange,
    RowEventType, RowMapping, Subscription,
};
pub use config::{ConfigError, SyncConfig};
pub use error::{Result, SyncCondition, SyncError, TransportError};
pub use sync::{Submitted, SyncHandle, Synchronizer};

pub use livefeed_engine::{
    ChangeEvent, CollectionName, Filter, Phase, Record, RecordId, RollbackOutcome, ViewOptions,
    ViewSnapshot,
};
