//! The user's feed list and the reconciliation loop that follows it.
//!
//! The list is mirrored from the store, fed into a [`SnapshotWatcher`] and,
//! at every [`FeedManager::settle`], the batched changes drive
//! [`FeedAggregator::reconcile`]. Local edits go through the same path, so a
//! feed picked by the user opens its article stream at the next settle.

use crate::aggregator::{FeedAggregator, ReconcileSummary};
use crate::catalog::FeedCatalog;
use crate::differ::{SnapshotWatcher, WatchHandle};
use crate::error::{HearthError, Result};
use crate::read_state::ReadState;
use crate::registry::Disposable;
use crate::remote::RemoteStore;
use crate::sync::TwoWaySync;
use crate::types::{Article, FeedEntry, FeedId, FeedListSnapshot, StorePath};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The feed list as stored: list key → raw entry.
///
/// Entries stay raw in the mirror so one malformed entry neither hides its
/// siblings nor gets erased by the next push.
pub type RawFeedList = BTreeMap<String, Value>;

/// Decode every well-formed entry of `raw`.
///
/// Malformed entries are logged and skipped. The list key is the feed's
/// identity: an entry whose `id` disagrees with its key is re-keyed.
pub fn decode_feed_list(raw: &RawFeedList) -> FeedListSnapshot {
    let mut list = FeedListSnapshot::new();
    for (key, value) in raw {
        match serde_json::from_value::<FeedEntry>(value.clone()) {
            Ok(mut entry) => {
                if entry.id.as_str() != key {
                    debug!(key = %key, id = %entry.id, "Feed entry id differs from its list key");
                }
                entry.id = FeedId::from(key.as_str());
                list.insert(entry.id.clone(), entry);
            }
            Err(e) => warn!(feed_id = %key, error = %e, "Skipping malformed feed entry"),
        }
    }
    list
}

/// Where the feed list comes from.
enum ListSource {
    /// Two-way synced with the user's list path.
    Synced(Arc<TwoWaySync<RawFeedList>>),
    /// Read once; local edits are never written back.
    ReadOnly { loaded: bool },
}

/// One change to the list.
enum ListEdit {
    Insert(FeedEntry),
    Remove(FeedId),
}

/// Owns the feed list of one signed-in user.
pub struct FeedManager {
    source: Mutex<ListSource>,
    watcher: Arc<SnapshotWatcher<FeedListSnapshot>>,
    watch_handle: WatchHandle<FeedListSnapshot>,
    last_summary: Arc<Mutex<Option<ReconcileSummary>>>,
    catalog: Arc<FeedCatalog>,
    read: Arc<ReadState>,
}

impl FeedManager {
    /// Follow the feed list at `path`.
    ///
    /// With `read_only` the list is fetched once and never written.
    pub fn establish(
        store: Arc<dyn RemoteStore>,
        path: StorePath,
        read_only: bool,
        aggregator: Arc<FeedAggregator>,
        catalog: Arc<FeedCatalog>,
        read: Arc<ReadState>,
    ) -> Result<Self> {
        let watcher = Arc::new(SnapshotWatcher::new(FeedListSnapshot::new()));
        let last_summary = Arc::new(Mutex::new(None));

        let watch_handle = {
            let catalog = Arc::clone(&catalog);
            let last_summary = Arc::clone(&last_summary);
            watcher.watch(move |changes, next, previous| {
                // Fill in base links the list does not carry.
                let mut enriched = next.clone();
                for feed_id in &changes.added {
                    if let Some(feed) = enriched.get_mut(feed_id) {
                        if feed.source_url.is_none() {
                            feed.source_url = catalog.base_link(feed_id);
                        }
                    }
                }
                let summary = aggregator.reconcile(changes, &enriched, previous);
                *last_summary.lock() = Some(summary);
            })
        };

        let source = if read_only {
            let raw: RawFeedList = match store.read_once(&path)? {
                Some(value) => serde_json::from_value(value).map_err(|e| {
                    HearthError::validation(path.to_string(), format!("invalid feed list: {}", e))
                })?,
                None => RawFeedList::new(),
            };
            let list = decode_feed_list(&raw);
            info!(path = %path, feeds = list.len(), "Loaded read-only feed list");
            watcher.replace(list);
            ListSource::ReadOnly { loaded: true }
        } else {
            let sync = TwoWaySync::<RawFeedList>::establish(store, path)?;
            let target = Arc::downgrade(&watcher);
            sync.on_pull(move |raw| {
                if let Some(watcher) = target.upgrade() {
                    watcher.replace(decode_feed_list(raw));
                }
            });
            ListSource::Synced(sync)
        };

        Ok(Self {
            source: Mutex::new(source),
            watcher,
            watch_handle,
            last_summary,
            catalog,
            read,
        })
    }

    /// Deliver pending list changes to the aggregator.
    ///
    /// Returns the reconciliation outcome, or None when the list did not
    /// change since the last settle.
    pub fn settle(&self) -> Option<ReconcileSummary> {
        self.watcher.settle()?;
        self.last_summary.lock().take()
    }

    /// True once the list has been received from the store.
    pub fn is_loaded(&self) -> bool {
        match &*self.source.lock() {
            ListSource::Synced(sync) => sync.is_loaded(),
            ListSource::ReadOnly { loaded } => *loaded,
        }
    }

    // --- Editing ---

    /// Add a catalogue feed to the list.
    ///
    /// Returns false if the feed is already listed.
    pub fn subscribe_choice(&self, id: &str) -> Result<bool> {
        let entry = self.catalog.from_choice(id).ok_or_else(|| {
            HearthError::validation(id, "no such feed in the catalogue")
        })?;
        self.add_entry(entry)
    }

    /// Add an arbitrary entry to the list, keyed by its id.
    ///
    /// Custom feeds are only listed here; creating or deleting their
    /// remote article data is left to whoever hosts them.
    pub fn add_entry(&self, entry: FeedEntry) -> Result<bool> {
        if self.has_feed(&entry.id) {
            return Ok(false);
        }
        let feed_id = entry.id.clone();
        self.edit(ListEdit::Insert(entry))?;
        debug!(feed_id = %feed_id, "Feed added to list");
        Ok(true)
    }

    /// Drop a feed from the list, with its cached base link and read markers.
    ///
    /// Returns false if the feed was not listed. The articles of a custom
    /// feed are left in place.
    pub fn unsubscribe(&self, feed_id: &FeedId) -> Result<bool> {
        if !self.has_feed(feed_id) {
            return Ok(false);
        }
        self.edit(ListEdit::Remove(feed_id.clone()))?;
        self.catalog.invalidate(feed_id);
        if let Err(e) = self.read.forget_feed(feed_id) {
            warn!(feed_id = %feed_id, error = %e, "Failed to drop read markers");
        }
        debug!(feed_id = %feed_id, "Feed removed from list");
        Ok(true)
    }

    /// Retry writing local list edits a failed push left behind.
    ///
    /// Returns true if a write was issued.
    pub fn push(&self) -> Result<bool> {
        match &*self.source.lock() {
            ListSource::Synced(sync) => sync.push(),
            ListSource::ReadOnly { .. } => Ok(false),
        }
    }

    fn edit(&self, edit: ListEdit) -> Result<()> {
        let source = self.source.lock();
        match &*source {
            ListSource::Synced(sync) => {
                let (key, value) = match edit {
                    ListEdit::Insert(entry) => (entry.id.to_string(), Some(serde_json::to_value(&entry)?)),
                    ListEdit::Remove(feed_id) => (feed_id.to_string(), None),
                };
                let pushed = sync.update(|raw| match value {
                    Some(value) => {
                        raw.insert(key, value);
                    }
                    None => {
                        raw.remove(&key);
                    }
                });
                // The mirror holds the edit even if the write failed.
                self.watcher.replace(decode_feed_list(&sync.get()));
                pushed
            }
            ListSource::ReadOnly { .. } => {
                self.watcher.edit(|list| match edit {
                    ListEdit::Insert(entry) => {
                        list.insert(entry.id.clone(), entry);
                    }
                    ListEdit::Remove(feed_id) => {
                        list.remove(&feed_id);
                    }
                });
                Ok(())
            }
        }
    }

    // --- Queries ---

    /// The listed feed, or an empty entry carrying only the id.
    pub fn get_feed(&self, feed_id: &FeedId) -> FeedEntry {
        self.watcher
            .with_current(|list| list.get(feed_id).cloned())
            .unwrap_or_else(|| FeedEntry::new(feed_id.clone(), ""))
    }

    pub fn has_feed(&self, feed_id: &FeedId) -> bool {
        self.watcher.with_current(|list| list.contains_key(feed_id))
    }

    /// Title of the article's feed, falling back to its id.
    pub fn feed_name(&self, article: &Article) -> String {
        let feed = self.get_feed(&article.feed_id);
        if feed.title.is_empty() {
            article.feed_id.to_string()
        } else {
            feed.title
        }
    }

    pub fn feeds(&self) -> FeedListSnapshot {
        self.watcher.current()
    }

    pub fn no_feeds(&self) -> bool {
        self.watcher.with_current(|list| list.is_empty())
    }

    pub fn catalog(&self) -> &Arc<FeedCatalog> {
        &self.catalog
    }
}

impl Disposable for FeedManager {
    fn dispose(&self) {
        self.watch_handle.dispose();
        if let ListSource::Synced(sync) = &*self.source.lock() {
            sync.dispose();
        }
    }
}
