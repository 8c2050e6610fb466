//! A signed-in session: wiring between auth events, the feed pipeline and
//! local preferences.
//!
//! A [`Session`] lives for the whole process. Each login builds a fresh
//! [`UserSession`] (catalogue, aggregator, feed list, read markers) whose live
//! resources are recorded in the shared [`SubscriptionRegistry`]; logout or an
//! auth error flushes the registry and drops the user session.

use crate::aggregator::{ArticleEventKind, FeedAggregator, ReconcileSummary};
use crate::catalog::FeedCatalog;
use crate::config::HearthConfig;
use crate::error::Result;
use crate::feeds::FeedManager;
use crate::layout::StoreLayout;
use crate::projection::{self, ViewQuery};
use crate::read_state::ReadState;
use crate::registry::{SubscriptionRegistry, Teardown};
use crate::remote::RemoteStore;
use crate::types::{Article, StorePath, UserRef};
use crate::watchdog::LoadingWatchdog;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Preference key for the sort direction.
pub const SORT_DESC_KEY: &str = "sortDesc";
/// Preference key for the last auth provider used.
pub const AUTH_PROVIDER_KEY: &str = "authProvider";

/// Events from the auth gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    Login { user: UserRef },
    /// Sent right before the gateway logs out.
    BeforeLogout,
    Logout,
    Error { error: String, user: Option<UserRef> },
}

// --- Preferences ---

/// Local key/value preference storage.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// In-memory [`PreferenceStore`].
#[derive(Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }
}

// --- Per-user pipeline ---

/// Everything that exists while one user is signed in.
pub struct UserSession {
    user: UserRef,
    catalog: Arc<FeedCatalog>,
    aggregator: Arc<FeedAggregator>,
    feeds: Arc<FeedManager>,
    read: Arc<ReadState>,
    /// Set once the loading timer was armed for the loaded list.
    loading_armed: AtomicBool,
}

impl UserSession {
    pub fn user(&self) -> &UserRef {
        &self.user
    }

    pub fn catalog(&self) -> &Arc<FeedCatalog> {
        &self.catalog
    }

    pub fn aggregator(&self) -> &Arc<FeedAggregator> {
        &self.aggregator
    }

    pub fn feeds(&self) -> &Arc<FeedManager> {
        &self.feeds
    }

    pub fn read_state(&self) -> &Arc<ReadState> {
        &self.read
    }
}

/// Process-wide session state.
pub struct Session {
    config: HearthConfig,
    store: Arc<dyn RemoteStore>,
    registry: Arc<SubscriptionRegistry>,
    prefs: Arc<dyn PreferenceStore>,
    watchdog: LoadingWatchdog,
    active: RwLock<Option<Arc<UserSession>>>,
}

impl Session {
    pub fn new(config: HearthConfig, store: Arc<dyn RemoteStore>, prefs: Arc<dyn PreferenceStore>) -> Result<Self> {
        config.validate()?;
        let watchdog = LoadingWatchdog::new(config.loading_delay());
        Ok(Self {
            config,
            store,
            registry: Arc::new(SubscriptionRegistry::new()),
            prefs,
            watchdog,
            active: RwLock::new(None),
        })
    }

    /// React to one auth gateway event.
    pub fn handle_auth(&self, event: AuthEvent) -> Result<()> {
        match event {
            AuthEvent::Login { user } => {
                self.prefs.set(AUTH_PROVIDER_KEY, &user.provider);
                self.login(user)
            }
            AuthEvent::BeforeLogout | AuthEvent::Logout => {
                self.teardown();
                Ok(())
            }
            AuthEvent::Error { error, user } => {
                warn!(error = %error, user = ?user.map(|u| u.display_name()), "Auth error");
                self.teardown();
                Ok(())
            }
        }
    }

    fn login(&self, user: UserRef) -> Result<()> {
        self.teardown();

        let read_only = user.is_demo();
        let layout = StoreLayout::new(StorePath::parse(&self.config.root)?, self.config.demo || read_only);

        let catalog = Arc::new(FeedCatalog::new(
            Arc::clone(&self.store),
            layout.feed_catalog()?,
            self.config.feed_cache_size,
        ));
        catalog.load()?;

        let aggregator = Arc::new(FeedAggregator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            layout.clone(),
            self.config.article_window,
        ));
        let watchdog = self.watchdog.clone();
        aggregator.on(ArticleEventKind::Added, move |_| {
            if watchdog.is_loading() {
                watchdog.clear();
            }
        });

        let read = Arc::new(ReadState::establish(
            Arc::clone(&self.store),
            layout.read_markers(&user)?,
            self.config.read_window,
            read_only,
        )?);
        self.registry.add(Teardown::object(Arc::clone(&read)));

        let feeds = Arc::new(FeedManager::establish(
            Arc::clone(&self.store),
            layout.feed_list(&user)?,
            read_only,
            Arc::clone(&aggregator),
            Arc::clone(&catalog),
            Arc::clone(&read),
        )?);
        self.registry.add(Teardown::object(Arc::clone(&feeds)));

        info!(user = %user.display_name(), provider = %user.provider, read_only, "Session started");
        *self.active.write() = Some(Arc::new(UserSession {
            user,
            catalog,
            aggregator,
            feeds,
            read,
            loading_armed: AtomicBool::new(false),
        }));
        Ok(())
    }

    fn teardown(&self) {
        let previous = self.active.write().take();
        let disposed = self.registry.flush();
        if let Some(previous) = previous {
            info!(user = %previous.user.display_name(), disposed, "Session ended");
        }
    }

    /// Run one scheduling tick: reconcile pending feed-list changes.
    ///
    /// The first tick after the list loads arms the loading watchdog (demo
    /// sessions just lower the flag).
    pub fn settle(&self) -> Option<ReconcileSummary> {
        let active = self.active()?;
        let summary = active.feeds.settle();
        if active.feeds.is_loaded() && !active.loading_armed.swap(true, Ordering::SeqCst) {
            if active.user.is_demo() {
                self.watchdog.clear();
            } else {
                self.watchdog.start_loading();
            }
        }
        summary
    }

    // --- Queries ---

    pub fn active(&self) -> Option<Arc<UserSession>> {
        self.active.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn display_name(&self) -> Option<String> {
        self.active().map(|s| s.user.display_name())
    }

    /// Provider of the most recent login, remembered across sessions.
    pub fn auth_provider(&self) -> Option<String> {
        self.prefs.get(AUTH_PROVIDER_KEY)
    }

    pub fn sort_descending(&self) -> bool {
        self.prefs.get(SORT_DESC_KEY).as_deref() == Some("true")
    }

    pub fn set_sort_descending(&self, descending: bool) {
        self.prefs.set(SORT_DESC_KEY, if descending { "true" } else { "false" });
    }

    pub fn is_loading(&self) -> bool {
        self.watchdog.is_loading()
    }

    pub fn watchdog(&self) -> &LoadingWatchdog {
        &self.watchdog
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Articles to display for `query`. The sort direction comes from the
    /// stored preference.
    pub fn visible_articles(&self, query: &ViewQuery) -> Vec<Article> {
        let Some(active) = self.active() else {
            return Vec::new();
        };
        let query = ViewQuery {
            descending: self.sort_descending(),
            ..query.clone()
        };
        query.project(&active.aggregator.articles(), &active.read.marks())
    }

    /// True when loading finished, feeds exist and the selection is empty.
    pub fn no_visible_articles(&self, query: &ViewQuery) -> bool {
        let Some(active) = self.active() else {
            return false;
        };
        let visible = projection::visible_count(&active.aggregator.counts(), query.active_feed.as_ref());
        projection::no_visible_articles(self.is_loading(), active.feeds.no_feeds(), visible)
    }
}
