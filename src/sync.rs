//! Two-way synchronization between a local mirror and a store path.
//!
//! The two directions are separate and explicit:
//! - pull: a remote value arrives and replaces the mirror,
//! - push: a local edit is serialized and written to the path.
//!
//! Conflicts resolve as last write wins; there is no merging.

use crate::error::Result;
use crate::registry::Disposable;
use crate::remote::{ListenerHandle, RemoteStore};
use crate::types::StorePath;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

type PullHook<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Mirror<T> {
    value: T,
    /// Last value known to be identical on both sides (None = empty path).
    synced: Option<Value>,
    loaded: bool,
}

/// Treat `null` and `{}` as absent, the way the store does.
fn normalize(value: Option<Value>) -> Option<Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        other => other,
    }
}

/// Live mirror of the value at one store path.
pub struct TwoWaySync<T> {
    store: Arc<dyn RemoteStore>,
    path: StorePath,
    mirror: Mutex<Mirror<T>>,
    hooks: RwLock<Vec<PullHook<T>>>,
    handle: Mutex<Option<ListenerHandle>>,
}

impl<T> TwoWaySync<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static,
{
    /// Start mirroring `path`.
    ///
    /// The mirror holds `T::default()` until the first pull arrives.
    pub fn establish(store: Arc<dyn RemoteStore>, path: StorePath) -> Result<Arc<Self>> {
        let sync = Arc::new(Self {
            store: Arc::clone(&store),
            path: path.clone(),
            mirror: Mutex::new(Mirror {
                value: T::default(),
                synced: None,
                loaded: false,
            }),
            hooks: RwLock::new(Vec::new()),
            handle: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&sync);
        let handle = store.watch_value(
            &path,
            Arc::new(move |value| {
                if let Some(sync) = weak.upgrade() {
                    sync.pull(value);
                }
            }),
        )?;
        *sync.handle.lock() = Some(handle);
        debug!(path = %path, "Established two-way sync");
        Ok(sync)
    }

    /// Remote to local: replace the mirror with `remote`.
    ///
    /// Returns false if the value matches what is already mirrored, or if it
    /// cannot be decoded (the mirror is then left as it was).
    pub fn pull(&self, remote: Option<Value>) -> bool {
        let remote = normalize(remote);
        let snapshot = {
            let mut mirror = self.mirror.lock();
            let first = !mirror.loaded;
            mirror.loaded = true;
            if mirror.synced == remote && !first {
                return false;
            }

            let decoded = match &remote {
                None => T::default(),
                Some(v) => match serde_json::from_value::<T>(v.clone()) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!(path = %self.path, error = %e, "Ignoring undecodable remote value");
                        return false;
                    }
                },
            };
            mirror.value = decoded;
            mirror.synced = remote;
            mirror.value.clone()
        };

        let hooks: Vec<_> = self.hooks.read().iter().cloned().collect();
        for hook in hooks {
            hook(&snapshot);
        }
        true
    }

    /// Local to remote: write the mirror if it differs from the last sync.
    ///
    /// Returns true if a write was issued. A failed write leaves the mirror
    /// marked as unsynced, so a later push retries it.
    pub fn push(&self) -> Result<bool> {
        let (encoded, before) = {
            let mirror = self.mirror.lock();
            let encoded = normalize(Some(serde_json::to_value(&mirror.value)?));
            if encoded == mirror.synced {
                return Ok(false);
            }
            (encoded, mirror.synced.clone())
        };

        self.store
            .write(&self.path, encoded.clone().unwrap_or(Value::Null))?;

        let mut mirror = self.mirror.lock();
        // A pull that landed during the write already owns `synced`.
        if mirror.synced == before {
            mirror.synced = encoded;
        }
        debug!(path = %self.path, "Pushed local changes");
        Ok(true)
    }

    /// Edit the mirror, then push.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let result = f(&mut self.mirror.lock().value);
        self.push()?;
        Ok(result)
    }

    /// Run `hook` after every pull that changed the mirror.
    pub fn on_pull(&self, hook: impl Fn(&T) + Send + Sync + 'static) {
        self.hooks.write().push(Arc::new(hook));
    }

    pub fn get(&self) -> T {
        self.mirror.lock().value.clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.mirror.lock().value)
    }

    /// True once the first remote value arrived.
    pub fn is_loaded(&self) -> bool {
        self.mirror.lock().loaded
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }
}

impl<T: Send + Sync> Disposable for TwoWaySync<T> {
    fn dispose(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.dispose();
            debug!(path = %self.path, "Two-way sync disposed");
        }
    }
}
