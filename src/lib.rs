//! # Hearth
//!
//! Live synchronization core for a feed reader backed by a path-addressed,
//! real-time store.
//!
//! ## Core Concepts
//!
//! - **Differ**: keyed snapshot diffing with coalesced change batches
//! - **Registry**: teardown units flushed together on logout
//! - **Aggregator**: one live article subscription per feed, merged with counts
//! - **Projection**: pure filtering and ordering of the merged articles
//!
//! ## Example
//!
//! ```ignore
//! use hearth::{AuthEvent, HearthConfig, MemoryPreferences, MemoryStore, Session, UserRef};
//! use std::sync::Arc;
//!
//! let store = MemoryStore::new();
//! let session = Session::new(
//!     HearthConfig::default(),
//!     Arc::new(store.clone()),
//!     Arc::new(MemoryPreferences::new()),
//! )?;
//!
//! session.handle_auth(AuthEvent::Login { user: UserRef::new("github", "alice") })?;
//! store.deliver();
//! session.settle();
//! ```

pub mod aggregator;
pub mod article;
pub mod catalog;
pub mod config;
pub mod differ;
pub mod error;
pub mod feeds;
pub mod layout;
pub mod projection;
pub mod read_state;
pub mod registry;
pub mod remote;
pub mod session;
pub mod sync;
pub mod types;
pub mod watchdog;

// Re-exports
pub use aggregator::{ArticleEvent, ArticleEventKind, FeedAggregator, HandlerId, ReconcileSummary};
pub use catalog::{FeedCatalog, FeedChoice};
pub use config::HearthConfig;
pub use differ::{diff, Changes, KeyedSnapshot, SnapshotWatcher, WatchHandle, WatchId};
pub use error::{HearthError, Result};
pub use feeds::{decode_feed_list, FeedManager, RawFeedList};
pub use layout::StoreLayout;
pub use projection::{SortField, ViewQuery};
pub use read_state::{ReadMarks, ReadState};
pub use registry::{Disposable, RegistrationKey, SubscriptionRegistry, Teardown};
pub use remote::{ChildEvent, ChildEventKind, ListenerHandle, MemoryStore, Query, RemoteStore};
pub use session::{AuthEvent, MemoryPreferences, PreferenceStore, Session, UserSession};
pub use sync::TwoWaySync;
pub use types::*;
pub use watchdog::LoadingWatchdog;
