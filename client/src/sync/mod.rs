//! Opening live views over a backend.
//!
//! [`Synchronizer::open`] validates the request, spawns the task that owns
//! the view and returns a [`SyncHandle`] right away; the view starts out
//! `Loading` and becomes `Ready` once the bulk read completes.

mod actor;
mod handle;

pub use handle::{Submitted, SyncHandle};

use std::fmt;
use std::sync::Arc;

use livefeed_engine::{CollectionName, CollectionView, Filter, ViewOptions};
use tokio::sync::{mpsc, watch};

use self::actor::ViewActor;
use crate::backend::Backend;
use crate::config::SyncConfig;
use crate::error::Result;

/// Opens views against one backend.
///
/// Cheap to clone; views opened from it share nothing but the backend.
#[derive(Clone)]
pub struct Synchronizer {
    backend: Arc<dyn Backend>,
    config: Arc<SyncConfig>,
}

impl Synchronizer {
    pub fn new(backend: Arc<dyn Backend>, config: SyncConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// View options derived from the configuration.
    pub fn options(&self) -> ViewOptions {
        let options = ViewOptions::new().with_correlation_field(&self.config.correlation_field);
        match &self.config.read_field {
            Some(field) => options.with_read_field(field),
            None => options,
        }
    }

    /// Open a live view of `collection` restricted to `filter`.
    ///
    /// Must be called within a tokio runtime. A blank collection name is
    /// rejected before any IO.
    pub fn open(&self, collection: impl Into<CollectionName>, filter: Filter) -> Result<SyncHandle> {
        self.open_with(collection, filter, self.options())
    }

    /// Open a live view with explicit options.
    pub fn open_with(
        &self,
        collection: impl Into<CollectionName>,
        filter: Filter,
        options: ViewOptions,
    ) -> Result<SyncHandle> {
        let read_field = options.read_field.clone();
        let view = CollectionView::new(collection, filter, options)?;
        let collection = view.collection().clone();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (condition_tx, condition_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(view.snapshot());

        let actor = ViewActor::new(
            view,
            Arc::clone(&self.backend),
            command_rx,
            snapshot_tx,
            condition_tx,
        );
        tokio::spawn(actor.run());

        tracing::info!(collection = %collection, "Opened live view");

        Ok(SyncHandle::new(
            collection,
            read_field,
            self.config.confirm_timeout,
            Arc::clone(&self.backend),
            command_tx,
            snapshot_rx,
            condition_rx,
        ))
    }
}

impl fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
