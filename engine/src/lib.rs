//! # Livefeed Engine
//!
//! A deterministic live collection view for realtime feeds.
//!
//! This crate keeps an ordered, deduplicated local projection of one remote
//! collection (tasks, messages, bids, notifications, posts) by combining an
//! initial bulk read with a stream of change events, and lets the caller show
//! writes optimistically before the server confirms them.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never talks to the network; callers feed it data
//! - **Deterministic**: the same bulk read and events always produce the same view
//! - **Idempotent**: redelivered events never duplicate records
//! - **Order tolerant**: events may arrive out of sequence order
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] has an id, a JSON payload, a sequence used for ordering, and
//! an [`Origin`] telling confirmed records from optimistic ones.
//!
//! ### Change Events
//!
//! [`ChangeEvent`] is one of `Inserted`, `Updated` or `Deleted`, applied in
//! delivery order with [`CollectionView::apply`].
//!
//! ### Lifecycle
//!
//! A view starts in [`Phase::Loading`] and buffers events until
//! [`CollectionView::seed`] installs the bulk read, then moves to
//! [`Phase::Ready`]. [`CollectionView::close`] moves it to the terminal
//! [`Phase::Closed`].
//!
//! ### Optimistic Writes
//!
//! [`CollectionView::write_optimistic`] inserts a speculative record under a
//! temporary `local-<n>` id. The server echo carrying the same correlation
//! token replaces it; [`CollectionView::rollback`] removes it otherwise.
//!
//! ## Quick Start
//!
//! ```rust
//! use livefeed_engine::{ChangeEvent, CollectionView, Filter, Record, ViewOptions};
//! use serde_json::json;
//!
//! let options = ViewOptions::new().with_correlation_field("client_token");
//! let mut view = CollectionView::new("messages", Filter::All, options).unwrap();
//!
//! // 1. Install the bulk read
//! view.seed(vec![Record::remote("1", 10, json!({"content": "hello"}))]);
//!
//! // 2. Show a write before the server confirms it
//! let local_id = view
//!     .write_optimistic(json!({"client_token": "abc", "content": "hi"}))
//!     .unwrap();
//! assert_eq!(local_id, "local-1");
//! assert_eq!(view.len(), 2);
//!
//! // 3. The echo replaces the optimistic record
//! view.apply(ChangeEvent::Inserted(Record::remote(
//!     "2",
//!     11,
//!     json!({"client_token": "abc", "content": "hi"}),
//! )));
//! let ids: Vec<_> = view.records().iter().map(|r| r.id.as_str()).collect();
//! assert_eq!(ids, vec!["1", "2"]);
//! ```

pub mod error;
pub mod event;
pub mod filter;
pub mod reconcile;
pub mod record;
pub mod sequence;
pub mod snapshot;
pub mod view;

// Re-export main types at crate root
pub use error::Error;
pub use event::ChangeEvent;
pub use filter::Filter;
pub use reconcile::{PendingWrite, Resolution, RollbackOutcome, LOCAL_ID_PREFIX};
pub use record::{Origin, Record};
pub use sequence::{SequenceClock, SortKey};
pub use snapshot::ViewSnapshot;
pub use view::{ApplyOutcome, CollectionView, IgnoreReason, Phase, SeedOutcome, ViewOptions};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
pub type CorrelationToken = String;
pub type Sequence = u64;
