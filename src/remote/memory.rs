//! In-process remote store.
//!
//! Mutations apply immediately. Listener notifications go onto a delivery
//! queue and run only when the owner calls [`MemoryStore::deliver`], which
//! stands in for the network's event loop: anything still queued is "in
//! flight" and may reach a listener after its handle was disposed.

use super::tree;
use super::{ChildEvent, ChildListener, ListenerHandle, Query, RemoteStore, ValueListener};
use crate::differ::diff;
use crate::error::{HearthError, Result};
use crate::registry::Disposable;
use crate::types::StorePath;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Queued notification.
type Delivery = Box<dyn FnOnce() + Send>;

/// Unique identifier for a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ListenerId(u64);

enum ListenerKind {
    Children {
        query: Query,
        /// Children last reported to this listener.
        window: BTreeMap<String, Value>,
        callback: ChildListener,
    },
    Value {
        last: Option<Value>,
        callback: ValueListener,
    },
}

/// Internal listener state.
struct Listener {
    path: StorePath,
    kind: ListenerKind,
}

impl Listener {
    /// Queue the initial state: existing children as added, or the current
    /// value (even when empty, so the consumer knows the path is loaded).
    fn prime(&mut self, root: &Value, queue: &Sender<Delivery>) {
        if let ListenerKind::Value { last, callback } = &mut self.kind {
            let current = tree::get(root, &self.path).cloned();
            *last = current.clone();
            let callback = Arc::clone(callback);
            let _ = queue.send(Box::new(move || callback(current)));
            return;
        }
        self.refresh(root, queue);
    }

    /// Recompute what this listener sees and queue the differences.
    fn refresh(&mut self, root: &Value, queue: &Sender<Delivery>) {
        match &mut self.kind {
            ListenerKind::Children {
                query,
                window,
                callback,
            } => {
                let next = tree::limit_to_last(tree::children(root, &self.path), query.limit);
                let changes = diff(Some(&*window), &next);
                if changes.is_empty() {
                    return;
                }

                let mut events = Vec::with_capacity(changes.len());
                for key in changes.removed {
                    let value = window.get(&key).cloned().unwrap_or(Value::Null);
                    events.push(ChildEvent::removed(key, value));
                }
                for key in changes.added {
                    events.push(ChildEvent::added(key.clone(), next[&key].clone()));
                }
                for key in changes.updated {
                    events.push(ChildEvent::changed(key.clone(), next[&key].clone()));
                }
                *window = next;

                for event in events {
                    let callback = Arc::clone(callback);
                    let _ = queue.send(Box::new(move || callback(event)));
                }
            }
            ListenerKind::Value { last, callback } => {
                let next = tree::get(root, &self.path).cloned();
                if *last == next {
                    return;
                }
                *last = next.clone();
                let callback = Arc::clone(callback);
                let _ = queue.send(Box::new(move || callback(next)));
            }
        }
    }
}

struct Inner {
    /// The whole store as one JSON tree.
    root: RwLock<Value>,
    /// Active listeners by ID.
    listeners: Mutex<HashMap<ListenerId, Listener>>,
    next_id: AtomicU64,
    queue_tx: Sender<Delivery>,
    queue_rx: Receiver<Delivery>,
    /// Paths under which new subscriptions are refused.
    failing: RwLock<Vec<StorePath>>,
    /// Paths under which writes are rejected.
    failing_writes: RwLock<Vec<StorePath>>,
    /// Serializes mutations so queued events keep mutation order.
    write_lock: Mutex<()>,
}

/// In-memory implementation of [`RemoteStore`].
///
/// Cloning shares the same store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_data(Value::Null)
    }

    /// Create a store holding `data` at the root.
    pub fn with_data(data: Value) -> Self {
        let (queue_tx, queue_rx) = unbounded();
        let mut root = Value::Null;
        tree::set(&mut root, &StorePath::root(), data);
        Self {
            inner: Arc::new(Inner {
                root: RwLock::new(root),
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_tx,
                queue_rx,
                failing: RwLock::new(Vec::new()),
                failing_writes: RwLock::new(Vec::new()),
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Run queued notifications until the queue is empty.
    ///
    /// Notifications produced while delivering are delivered too. Returns
    /// how many ran.
    pub fn deliver(&self) -> usize {
        let mut count = 0;
        while self.deliver_one() {
            count += 1;
        }
        count
    }

    /// Run the oldest queued notification, if any.
    pub fn deliver_one(&self) -> bool {
        match self.inner.queue_rx.try_recv() {
            Ok(delivery) => {
                delivery();
                true
            }
            Err(_) => false,
        }
    }

    /// Number of queued notifications.
    pub fn pending(&self) -> usize {
        self.inner.queue_rx.len()
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Make every new subscription at or under `prefix` fail.
    pub fn fail_subscriptions_under(&self, prefix: StorePath) {
        self.inner.failing.write().push(prefix);
    }

    /// Make every write at or under `prefix` fail.
    pub fn fail_writes_under(&self, prefix: StorePath) {
        self.inner.failing_writes.write().push(prefix);
    }

    /// Undo every injected failure.
    pub fn clear_failures(&self) {
        self.inner.failing.write().clear();
        self.inner.failing_writes.write().clear();
    }

    /// Register a listener and queue its initial state.
    fn register(&self, path: &StorePath, kind: ListenerKind) -> Result<ListenerHandle> {
        if self.inner.failing.read().iter().any(|p| p.contains(path)) {
            return Err(HearthError::Subscription {
                path: path.clone(),
                reason: "permission denied".to_string(),
            });
        }

        let _lock = self.inner.write_lock.lock();
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let mut listener = Listener {
            path: path.clone(),
            kind,
        };
        listener.prime(&self.inner.root.read(), &self.inner.queue_tx);
        self.inner.listeners.lock().insert(id, listener);

        trace!(path = %path, id = id.0, "Listener registered");
        Ok(Box::new(MemoryListenerHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }))
    }

    fn apply_write(&self, path: &StorePath, value: Value) -> Result<()> {
        if self.inner.failing_writes.read().iter().any(|p| p.contains(path)) {
            return Err(HearthError::Remote(format!("write to {} denied", path)));
        }
        let _lock = self.inner.write_lock.lock();
        let changed = tree::set(&mut self.inner.root.write(), path, value);
        if !changed {
            return Ok(());
        }

        let root = self.inner.root.read();
        let mut listeners = self.inner.listeners.lock();
        for listener in listeners.values_mut() {
            if listener.path.overlaps(path) {
                listener.refresh(&root, &self.inner.queue_tx);
            }
        }
        debug!(path = %path, "Store write applied");
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryStore {
    fn subscribe(&self, path: &StorePath, query: Query, listener: ChildListener) -> Result<ListenerHandle> {
        self.register(
            path,
            ListenerKind::Children {
                query,
                window: BTreeMap::new(),
                callback: listener,
            },
        )
    }

    fn watch_value(&self, path: &StorePath, listener: ValueListener) -> Result<ListenerHandle> {
        self.register(
            path,
            ListenerKind::Value {
                last: None,
                callback: listener,
            },
        )
    }

    fn read_once(&self, path: &StorePath) -> Result<Option<Value>> {
        Ok(tree::get(&self.inner.root.read(), path).cloned())
    }

    fn write(&self, path: &StorePath, value: Value) -> Result<()> {
        self.apply_write(path, value)
    }
}

/// Handle for a [`MemoryStore`] listener.
struct MemoryListenerHandle {
    id: ListenerId,
    inner: Weak<Inner>,
}

impl Disposable for MemoryListenerHandle {
    fn dispose(&self) {
        if let Some(inner) = self.inner.upgrade() {
            if inner.listeners.lock().remove(&self.id).is_some() {
                trace!(id = self.id.0, "Listener disposed");
            }
        }
    }
}
