//! Catalogue of feeds a user can subscribe to.

use crate::error::{HearthError, Result};
use crate::remote::RemoteStore;
use crate::types::{FeedEntry, FeedId, StorePath, Timestamp};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, warn};

/// One entry of the catalogue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedChoice {
    /// Filled from the catalogue key.
    #[serde(skip)]
    pub id: FeedId,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub link: Option<String>,
}

/// Read-once catalogue with an id-keyed base-link cache.
pub struct FeedCatalog {
    store: Arc<dyn RemoteStore>,
    path: StorePath,
    choices: RwLock<BTreeMap<FeedId, FeedChoice>>,
    /// LRU cache of base links, including misses.
    links: Mutex<LruCache<FeedId, Option<String>>>,
}

impl FeedCatalog {
    pub fn new(store: Arc<dyn RemoteStore>, path: StorePath, cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            path,
            choices: RwLock::new(BTreeMap::new()),
            links: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Fetch the catalogue once. Malformed entries are skipped.
    ///
    /// Returns the number of choices loaded.
    pub fn load(&self) -> Result<usize> {
        let raw = self.store.read_once(&self.path)?;
        let entries = match raw {
            None => serde_json::Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(HearthError::validation(
                    self.path.to_string(),
                    "feed catalogue is not an object",
                ))
            }
        };

        let mut choices = BTreeMap::new();
        for (key, value) in entries {
            match serde_json::from_value::<FeedChoice>(value) {
                Ok(mut choice) => {
                    choice.id = FeedId::from(key);
                    choices.insert(choice.id.clone(), choice);
                }
                Err(e) => warn!(feed_id = %key, error = %e, "Skipping malformed feed choice"),
            }
        }

        let loaded = choices.len();
        *self.choices.write() = choices;
        self.links.lock().clear();
        debug!(path = %self.path, loaded, "Loaded feed catalogue");
        Ok(loaded)
    }

    pub fn choices(&self) -> Vec<FeedChoice> {
        self.choices.read().values().cloned().collect()
    }

    pub fn find(&self, id: &str) -> Option<FeedChoice> {
        self.choices.read().get(id).cloned()
    }

    /// Build a feed-list entry for a catalogue choice, stamped with now.
    pub fn from_choice(&self, id: &str) -> Option<FeedEntry> {
        let choice = self.find(id)?;
        let mut entry = FeedEntry::new(choice.id, choice.title);
        entry.last_access = Timestamp::now();
        Some(entry)
    }

    /// Base link of a feed, memoized.
    pub fn base_link(&self, id: &FeedId) -> Option<String> {
        if let Some(cached) = self.links.lock().get(id) {
            return cached.clone();
        }
        let link = self.find(id.as_str()).and_then(|c| c.link);
        self.links.lock().put(id.clone(), link.clone());
        link
    }

    /// Forget the cached base link of `id`.
    pub fn invalidate(&self, id: &FeedId) {
        self.links.lock().pop(id);
    }

    pub fn cached_links(&self) -> usize {
        self.links.lock().len()
    }
}
