//! Merged, live view over the articles of every active feed.
//!
//! The aggregator keeps one store subscription per active feed and folds the
//! article events of all of them into a single collection with per-feed
//! counts. Each subscription carries a token; an event is applied only if
//! its token still belongs to an active feed, checked under the same lock
//! that [`FeedAggregator::remove_feed`] takes. Once `remove_feed` returns,
//! late events from the old subscription cannot touch the collection.
//!
//! # Example
//!
//! ```ignore
//! let aggregator = FeedAggregator::new(store, registry, layout, 250);
//! aggregator.on(ArticleEventKind::Added, |event| println!("{:?}", event));
//! aggregator.add_feed(&FeedEntry::new("tech", "Tech"))?;
//! ```

mod channel;

pub use channel::{ChannelEvent, EventChannel, HandlerId};

use crate::article::build_article;
use crate::differ::Changes;
use crate::error::{HearthError, Result};
use crate::layout::StoreLayout;
use crate::registry::{RegistrationKey, SubscriptionRegistry};
use crate::remote::{ChildEvent, ChildEventKind, ListenerHandle, Query, RemoteStore};
use crate::types::{Article, ArticleKey, Counts, FeedEntry, FeedId, FeedListSnapshot};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Notification about the merged collection.
#[derive(Clone, Debug)]
pub enum ArticleEvent {
    Added(Article),
    Removed(Article),
    Changed(Article),
    /// A feed's subscription could not be opened during reconciliation.
    Failed { feed_id: FeedId, error: Arc<HearthError> },
}

/// Kinds of [`ArticleEvent`], used to register listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArticleEventKind {
    Added,
    Removed,
    Changed,
    Error,
}

impl ChannelEvent for ArticleEvent {
    type Kind = ArticleEventKind;

    fn kind(&self) -> ArticleEventKind {
        match self {
            ArticleEvent::Added(_) => ArticleEventKind::Added,
            ArticleEvent::Removed(_) => ArticleEventKind::Removed,
            ArticleEvent::Changed(_) => ArticleEventKind::Changed,
            ArticleEvent::Failed { .. } => ArticleEventKind::Error,
        }
    }
}

impl ArticleEvent {
    pub fn article(&self) -> Option<&Article> {
        match self {
            ArticleEvent::Added(a) | ArticleEvent::Removed(a) | ArticleEvent::Changed(a) => Some(a),
            ArticleEvent::Failed { .. } => None,
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub opened: Vec<FeedId>,
    pub closed: Vec<FeedId>,
    pub failed: Vec<(FeedId, Arc<HearthError>)>,
}

/// Live subscription for one feed.
struct FeedSubscription {
    /// Distinguishes this subscription from earlier ones for the same feed.
    token: u64,
    base_link: Option<String>,
    /// Cleared when the subscription is retired.
    alive: Arc<AtomicBool>,
    /// None while the store subscription is being opened.
    handle: Option<ListenerHandle>,
    registration: Option<RegistrationKey>,
}

/// What remains of a subscription after it was detached.
struct Detached {
    subscription: FeedSubscription,
    articles: Vec<Article>,
}

#[derive(Default)]
struct AggregatorState {
    feeds: HashMap<FeedId, FeedSubscription>,
    /// Merged collection; the sequence number keeps arrival order.
    articles: HashMap<ArticleKey, (u64, Article)>,
    counts: Counts,
    next_seq: u64,
}

impl AggregatorState {
    /// Insert or replace an article.
    fn upsert(&mut self, article: Article) -> ArticleEvent {
        let key = article.key();
        if let Some((_, existing)) = self.articles.get_mut(&key) {
            *existing = article.clone();
            return ArticleEvent::Changed(article);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.articles.insert(key, (seq, article.clone()));
        *self.counts.entry(article.feed_id.clone()).or_insert(0) += 1;
        ArticleEvent::Added(article)
    }

    /// Remove an article if held.
    fn remove(&mut self, key: &ArticleKey) -> Option<ArticleEvent> {
        let (_, article) = self.articles.remove(key)?;
        if let Some(count) = self.counts.get_mut(&key.feed_id) {
            *count = count.saturating_sub(1);
        }
        Some(ArticleEvent::Removed(article))
    }

    /// Retire a feed: drop its subscription entry, articles and count.
    ///
    /// With `token` set, only the subscription carrying that token is
    /// retired.
    fn detach(&mut self, feed_id: &FeedId, token: Option<u64>) -> Option<Detached> {
        match (self.feeds.get(feed_id), token) {
            (None, _) => return None,
            (Some(sub), Some(t)) if sub.token != t => return None,
            _ => {}
        }
        let subscription = self.feeds.remove(feed_id)?;
        subscription.alive.store(false, Ordering::Release);

        let keys: Vec<ArticleKey> = self
            .articles
            .keys()
            .filter(|k| &k.feed_id == feed_id)
            .cloned()
            .collect();
        let mut articles: Vec<(u64, Article)> = keys
            .iter()
            .filter_map(|k| self.articles.remove(k))
            .collect();
        articles.sort_by_key(|(seq, _)| *seq);
        self.counts.remove(feed_id);

        Some(Detached {
            subscription,
            articles: articles.into_iter().map(|(_, a)| a).collect(),
        })
    }
}

/// State shared with store callbacks.
struct Shared {
    state: Mutex<AggregatorState>,
    channel: EventChannel<ArticleEvent>,
}

impl Shared {
    /// Apply one store event for `feed_id`, unless its subscription is gone.
    fn apply(&self, feed_id: &FeedId, token: u64, event: ChildEvent) {
        let notification = {
            let mut state = self.state.lock();
            let base_link = match state.feeds.get(feed_id) {
                Some(sub) if sub.token == token => sub.base_link.clone(),
                _ => {
                    trace!(feed_id = %feed_id, key = %event.key, "Discarding event from retired subscription");
                    return;
                }
            };

            match event.kind {
                ChildEventKind::Added | ChildEventKind::Changed => {
                    match build_article(feed_id, &event.key, &event.value, base_link.as_deref()) {
                        Ok(article) => Some(state.upsert(article)),
                        Err(e) => {
                            warn!(feed_id = %feed_id, key = %event.key, error = %e, "Skipping malformed article");
                            None
                        }
                    }
                }
                ChildEventKind::Removed => state.remove(&ArticleKey {
                    feed_id: feed_id.clone(),
                    article_id: event.key,
                }),
            }
        };

        if let Some(notification) = notification {
            self.channel.emit(&notification);
        }
    }

    /// Detach a feed and report the articles it took with it.
    fn retire(&self, feed_id: &FeedId, token: Option<u64>) -> Option<FeedSubscription> {
        let detached = self.state.lock().detach(feed_id, token)?;
        for article in detached.articles {
            self.channel.emit(&ArticleEvent::Removed(article));
        }
        Some(detached.subscription)
    }
}

/// Maintains one article subscription per active feed and merges them.
pub struct FeedAggregator {
    shared: Arc<Shared>,
    store: Arc<dyn RemoteStore>,
    registry: Arc<SubscriptionRegistry>,
    layout: StoreLayout,
    /// Trailing window of articles per feed.
    window: usize,
    next_token: AtomicU64,
}

impl FeedAggregator {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        registry: Arc<SubscriptionRegistry>,
        layout: StoreLayout,
        window: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(AggregatorState::default()),
                channel: EventChannel::new(),
            }),
            store,
            registry,
            layout,
            window,
            next_token: AtomicU64::new(1),
        }
    }

    // --- Subscriptions ---

    /// Start streaming articles for `feed`.
    ///
    /// Returns `Ok(false)` if the feed is already active. On error the feed
    /// stays inactive with a count of zero, and the call may be retried.
    pub fn add_feed(&self, feed: &FeedEntry) -> Result<bool> {
        let path = self.layout.articles(&feed.id)?;
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));

        {
            let mut state = self.shared.state.lock();
            if state.feeds.contains_key(&feed.id) {
                return Ok(false);
            }
            state.feeds.insert(
                feed.id.clone(),
                FeedSubscription {
                    token,
                    base_link: feed.source_url.clone(),
                    alive: Arc::clone(&alive),
                    handle: None,
                    registration: None,
                },
            );
            state.counts.insert(feed.id.clone(), 0);
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let feed_id = feed.id.clone();
        let listener = move |event: ChildEvent| {
            if !alive.load(Ordering::Acquire) {
                return;
            }
            if let Some(shared) = weak.upgrade() {
                shared.apply(&feed_id, token, event);
            }
        };

        let handle = match self.store.subscribe(&path, Query::last(self.window), Arc::new(listener)) {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.retire(&feed.id, Some(token));
                warn!(feed_id = %feed.id, error = %e, "Failed to open article subscription");
                return Err(e);
            }
        };

        let weak = Arc::downgrade(&self.shared);
        let feed_id = feed.id.clone();
        let registration = self.registry.add_fn(move || {
            if let Some(sub) = weak.upgrade().and_then(|shared| shared.retire(&feed_id, Some(token))) {
                if let Some(handle) = sub.handle {
                    handle.dispose();
                }
            }
        });

        let mut state = self.shared.state.lock();
        match state.feeds.get_mut(&feed.id) {
            Some(sub) if sub.token == token => {
                sub.handle = Some(handle);
                sub.registration = Some(registration);
                drop(state);
                info!(feed_id = %feed.id, path = %path, window = self.window, "Opened article subscription");
                Ok(true)
            }
            _ => {
                // Removed while the subscription was being opened.
                drop(state);
                handle.dispose();
                self.registry.release(registration);
                debug!(feed_id = %feed.id, "Feed removed before subscription opened");
                Ok(false)
            }
        }
    }

    /// Stop streaming `feed` and drop its articles and count.
    ///
    /// Returns false if the feed was not active.
    pub fn remove_feed(&self, feed: impl Into<FeedId>) -> bool {
        let feed_id = feed.into();
        let Some(sub) = self.shared.retire(&feed_id, None) else {
            return false;
        };

        if let Some(key) = sub.registration {
            self.registry.release(key);
        }
        if let Some(handle) = sub.handle {
            handle.dispose();
        }
        info!(feed_id = %feed_id, "Closed article subscription");
        true
    }

    /// Bring subscriptions in line with one batch of feed-list changes.
    ///
    /// Added feeds are opened and removed feeds closed; updated feeds keep
    /// their stream. Failures are reported on the `Error` channel and in the
    /// returned summary.
    pub fn reconcile(
        &self,
        changes: &Changes<FeedId>,
        next: &FeedListSnapshot,
        previous: Option<&FeedListSnapshot>,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        // Streams are keyed by the entry's id, which may differ from its list key.
        for key in &changes.removed {
            let feed_id = previous
                .and_then(|list| list.get(key))
                .map(|feed| feed.id.clone())
                .unwrap_or_else(|| key.clone());
            if self.remove_feed(&feed_id) {
                summary.closed.push(feed_id);
            }
        }

        for feed_id in &changes.added {
            let Some(feed) = next.get(feed_id) else {
                continue;
            };
            match self.add_feed(feed) {
                Ok(true) => summary.opened.push(feed.id.clone()),
                Ok(false) => {}
                Err(e) => {
                    let error = Arc::new(e);
                    self.shared.channel.emit(&ArticleEvent::Failed {
                        feed_id: feed_id.clone(),
                        error: Arc::clone(&error),
                    });
                    summary.failed.push((feed_id.clone(), error));
                }
            }
        }

        debug!(
            opened = summary.opened.len(),
            closed = summary.closed.len(),
            failed = summary.failed.len(),
            unchanged = changes.updated.len(),
            "Reconciled feed subscriptions"
        );
        summary
    }

    // --- Listeners ---

    /// Register a listener for one kind of event.
    pub fn on<F>(&self, kind: ArticleEventKind, listener: F) -> HandlerId
    where
        F: Fn(&ArticleEvent) + Send + Sync + 'static,
    {
        self.shared.channel.on(kind, listener)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.shared.channel.off(id)
    }

    // --- Queries ---

    /// Article count for one feed (0 if inactive).
    pub fn count(&self, feed_id: &str) -> usize {
        self.shared.state.lock().counts.get(feed_id).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> Counts {
        self.shared.state.lock().counts.clone()
    }

    /// All held articles in arrival order.
    pub fn articles(&self) -> Vec<Article> {
        let state = self.shared.state.lock();
        let mut entries: Vec<&(u64, Article)> = state.articles.values().collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, a)| a.clone()).collect()
    }

    pub fn article(&self, key: &ArticleKey) -> Option<Article> {
        self.shared.state.lock().articles.get(key).map(|(_, a)| a.clone())
    }

    pub fn is_active(&self, feed_id: &str) -> bool {
        self.shared.state.lock().feeds.contains_key(feed_id)
    }

    /// Ids of active feeds, sorted.
    pub fn active_feeds(&self) -> Vec<FeedId> {
        let mut ids: Vec<FeedId> = self.shared.state.lock().feeds.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Total number of held articles.
    pub fn len(&self) -> usize {
        self.shared.state.lock().articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use crate::types::StorePath;
    use serde_json::json;

    fn setup() -> (MemoryStore, Arc<SubscriptionRegistry>, FeedAggregator) {
        let store = MemoryStore::new();
        let registry = Arc::new(SubscriptionRegistry::new());
        let aggregator = FeedAggregator::new(
            Arc::new(store.clone()),
            Arc::clone(&registry),
            StoreLayout::default(),
            250,
        );
        (store, registry, aggregator)
    }

    fn post(store: &MemoryStore, feed: &str, key: &str) {
        let path = StorePath::parse(&format!("feeds/articles/{}/{}", feed, key)).unwrap();
        store
            .write(&path, json!({"title": key, "date": 1000, "description": "body"}))
            .unwrap();
    }

    fn unpost(store: &MemoryStore, feed: &str, key: &str) {
        let path = StorePath::parse(&format!("feeds/articles/{}/{}", feed, key)).unwrap();
        store.remove(&path).unwrap();
    }

    #[test]
    fn test_add_feed_is_idempotent() {
        let (store, registry, aggregator) = setup();
        let feed = FeedEntry::new("a", "A");

        assert!(aggregator.add_feed(&feed).unwrap());
        assert!(!aggregator.add_feed(&feed).unwrap());
        assert_eq!(store.listener_count(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(aggregator.counts().get("a"), Some(&0));
    }

    #[test]
    fn test_articles_counted_per_feed() {
        let (store, _registry, aggregator) = setup();
        aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap();
        aggregator.add_feed(&FeedEntry::new("b", "B")).unwrap();

        post(&store, "a", "1");
        post(&store, "a", "2");
        post(&store, "b", "1");
        store.deliver();

        assert_eq!(aggregator.count("a"), 2);
        assert_eq!(aggregator.count("b"), 1);
        assert_eq!(aggregator.len(), 3);

        unpost(&store, "a", "1");
        store.deliver();
        assert_eq!(aggregator.count("a"), 1);
    }

    #[test]
    fn test_remove_feed_cascades() {
        let (store, registry, aggregator) = setup();
        aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap();
        aggregator.add_feed(&FeedEntry::new("b", "B")).unwrap();
        post(&store, "a", "1");
        post(&store, "b", "1");
        store.deliver();

        assert!(aggregator.remove_feed("a"));
        assert!(!aggregator.remove_feed("a"));

        assert_eq!(aggregator.count("a"), 0);
        assert_eq!(aggregator.counts().get("a"), None);
        assert_eq!(aggregator.count("b"), 1);
        assert!(aggregator.articles().iter().all(|a| a.feed_id.as_str() != "a"));
        assert_eq!(store.listener_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_in_flight_event_discarded_after_remove() {
        let (store, _registry, aggregator) = setup();
        aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap();

        post(&store, "a", "1");
        assert_eq!(store.pending(), 1);
        aggregator.remove_feed("a");
        store.deliver();

        assert_eq!(aggregator.count("a"), 0);
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_stale_event_ignored_after_re_add() {
        let (store, _registry, aggregator) = setup();
        let feed = FeedEntry::new("a", "A");
        aggregator.add_feed(&feed).unwrap();
        post(&store, "a", "1");

        // Old subscription's event is still queued when the feed comes back.
        aggregator.remove_feed("a");
        aggregator.add_feed(&feed).unwrap();
        store.deliver();

        // Only the new subscription's initial add counts.
        assert_eq!(aggregator.count("a"), 1);
        assert_eq!(aggregator.len(), 1);
    }

    #[test]
    fn test_count_never_negative() {
        let (store, _registry, aggregator) = setup();
        aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap();
        post(&store, "a", "1");
        store.deliver();

        unpost(&store, "a", "1");
        unpost(&store, "a", "1");
        store.deliver();

        let shared = Arc::clone(&aggregator.shared);
        let token = shared.state.lock().feeds["a"].token;
        for _ in 0..3 {
            shared.apply(&FeedId::from("a"), token, ChildEvent::removed("ghost", json!({})));
        }
        assert_eq!(aggregator.count("a"), 0);
    }

    #[test]
    fn test_duplicate_add_not_double_counted() {
        let (_store, _registry, aggregator) = setup();
        aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap();
        let shared = Arc::clone(&aggregator.shared);
        let token = shared.state.lock().feeds["a"].token;

        let raw = json!({"title": "t"});
        shared.apply(&FeedId::from("a"), token, ChildEvent::added("1", raw.clone()));
        shared.apply(&FeedId::from("a"), token, ChildEvent::added("1", raw));
        assert_eq!(aggregator.count("a"), 1);
    }

    #[test]
    fn test_changed_replaces_article() {
        let (store, _registry, aggregator) = setup();
        aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap();
        post(&store, "a", "1");
        store.deliver();

        let path = StorePath::parse("feeds/articles/a/1/title").unwrap();
        store.write(&path, json!("renamed")).unwrap();
        store.deliver();

        let key = ArticleKey {
            feed_id: FeedId::from("a"),
            article_id: "1".to_string(),
        };
        assert_eq!(aggregator.article(&key).unwrap().title, "renamed");
        assert_eq!(aggregator.count("a"), 1);
    }

    #[test]
    fn test_malformed_record_skipped() {
        let (store, _registry, aggregator) = setup();
        aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap();

        store
            .write(&StorePath::parse("feeds/articles/a/bad").unwrap(), json!("not an object"))
            .unwrap();
        post(&store, "a", "good");
        store.deliver();

        assert_eq!(aggregator.count("a"), 1);
    }

    #[test]
    fn test_window_limits_articles() {
        let store = MemoryStore::new();
        let aggregator = FeedAggregator::new(
            Arc::new(store.clone()),
            Arc::new(SubscriptionRegistry::new()),
            StoreLayout::default(),
            2,
        );
        aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap();
        for key in ["k1", "k2", "k3"] {
            post(&store, "a", key);
        }
        store.deliver();

        assert_eq!(aggregator.count("a"), 2);
        let ids: Vec<String> = aggregator.articles().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["k2", "k3"]);
    }

    #[test]
    fn test_subscription_failure_leaves_feed_inactive() {
        let (store, registry, aggregator) = setup();
        store.fail_subscriptions_under(StorePath::parse("feeds/articles/a").unwrap());

        let result = aggregator.add_feed(&FeedEntry::new("a", "A"));
        assert!(matches!(result, Err(HearthError::Subscription { .. })));
        assert!(!aggregator.is_active("a"));
        assert_eq!(aggregator.count("a"), 0);
        assert!(registry.is_empty());

        store.clear_failures();
        assert!(aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap());
    }

    #[test]
    fn test_flush_retires_all_feeds() {
        let (store, registry, aggregator) = setup();
        aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap();
        aggregator.add_feed(&FeedEntry::new("b", "B")).unwrap();
        post(&store, "a", "1");

        assert_eq!(registry.flush(), 2);
        store.deliver();

        assert!(aggregator.active_feeds().is_empty());
        assert!(aggregator.is_empty());
        assert_eq!(store.listener_count(), 0);
        assert_eq!(registry.flush(), 0);
    }

    #[test]
    fn test_reconcile_closes_stream_under_entry_id() {
        let (store, _registry, aggregator) = setup();
        let aggregator = Arc::new(aggregator);
        let watcher = crate::differ::SnapshotWatcher::new(FeedListSnapshot::new());
        let target = Arc::clone(&aggregator);
        let _handle = watcher.watch(move |changes, next, previous| {
            target.reconcile(changes, next, previous);
        });

        watcher.edit(|list| list.insert(FeedId::from("x"), FeedEntry::new("y", "Y")));
        watcher.settle();
        assert!(aggregator.is_active("y"));

        watcher.edit(|list| list.remove("x"));
        watcher.settle();
        assert!(aggregator.active_feeds().is_empty());
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_listeners_notified() {
        let (store, _registry, aggregator) = setup();
        let added = Arc::new(AtomicU64::new(0));
        let removed = Arc::new(AtomicU64::new(0));
        let a = Arc::clone(&added);
        let r = Arc::clone(&removed);
        aggregator.on(ArticleEventKind::Added, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        aggregator.on(ArticleEventKind::Removed, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap();
        post(&store, "a", "1");
        post(&store, "a", "2");
        store.deliver();
        aggregator.remove_feed("a");

        assert_eq!(added.load(Ordering::SeqCst), 2);
        assert_eq!(removed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_may_read_aggregator() {
        let (store, _registry, aggregator) = setup();
        let aggregator = Arc::new(aggregator);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let weak = Arc::downgrade(&aggregator);
        aggregator.on(ArticleEventKind::Added, move |event| {
            if let (Some(agg), Some(article)) = (weak.upgrade(), event.article()) {
                sink.lock().push(agg.count(article.feed_id.as_str()));
            }
        });

        aggregator.add_feed(&FeedEntry::new("a", "A")).unwrap();
        post(&store, "a", "1");
        store.deliver();
        assert_eq!(*seen.lock(), vec![1]);
    }
}
