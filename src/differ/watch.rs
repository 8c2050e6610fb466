//! Coalescing watcher over a keyed snapshot.

use super::{diff, Changes, KeyedSnapshot};
use crate::registry::Disposable;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Identifier of a registered watch callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

type ChangeCallback<S> =
    Arc<dyn Fn(&Changes<<S as KeyedSnapshot>::Key>, &S, Option<&S>) + Send + Sync>;

type CallbackList<S> = RwLock<Vec<(WatchId, ChangeCallback<S>)>>;

struct WatchState<S> {
    current: S,
    /// Last snapshot handed to callbacks (None before the first settle).
    delivered: Option<S>,
    dirty: bool,
}

/// Holds a snapshot and reports its changes once per batch.
///
/// Edits only mark the snapshot dirty. [`settle`](Self::settle) is the batch
/// boundary: it diffs the last delivered snapshot against the current one and
/// calls every watcher once with the combined change set.
pub struct SnapshotWatcher<S: KeyedSnapshot> {
    state: Mutex<WatchState<S>>,
    callbacks: Arc<CallbackList<S>>,
    next_id: AtomicU64,
}

impl<S> SnapshotWatcher<S>
where
    S: KeyedSnapshot + Clone + Send + Sync + 'static,
{
    /// Create a watcher. The first settle reports `initial` as all-added.
    pub fn new(initial: S) -> Self {
        Self {
            state: Mutex::new(WatchState {
                current: initial,
                delivered: None,
                dirty: true,
            }),
            callbacks: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback invoked as `on_change(changes, next, previous)`.
    pub fn watch<F>(&self, on_change: F) -> WatchHandle<S>
    where
        F: Fn(&Changes<S::Key>, &S, Option<&S>) + Send + Sync + 'static,
    {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.callbacks.write().push((id, Arc::new(on_change)));
        WatchHandle {
            id,
            callbacks: Arc::downgrade(&self.callbacks),
        }
    }

    /// Mutate the snapshot in place.
    pub fn edit<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.state.lock();
        state.dirty = true;
        f(&mut state.current)
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&self, next: S) {
        let mut state = self.state.lock();
        state.current = next;
        state.dirty = true;
    }

    /// Clone of the current snapshot.
    pub fn current(&self) -> S {
        self.state.lock().current.clone()
    }

    /// Read the current snapshot without cloning it.
    pub fn with_current<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.state.lock().current)
    }

    /// True if edits are waiting for the next settle.
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Deliver pending edits as one change set.
    ///
    /// Returns the changes delivered, or None when nothing changed since the
    /// last delivery. Callbacks run after the internal lock is released, so
    /// they may edit the watcher again; those edits land in the next batch.
    pub fn settle(&self) -> Option<Changes<S::Key>> {
        let (changes, next, previous) = {
            let mut state = self.state.lock();
            if !state.dirty {
                return None;
            }
            state.dirty = false;

            let changes = diff(state.delivered.as_ref(), &state.current);
            if changes.is_empty() {
                return None;
            }
            let next = state.current.clone();
            let previous = state.delivered.replace(next.clone());
            (changes, next, previous)
        };

        let callbacks: Vec<_> = self.callbacks.read().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in callbacks {
            callback(&changes, &next, previous.as_ref());
        }

        Some(changes)
    }

    /// Number of registered callbacks.
    pub fn watcher_count(&self) -> usize {
        self.callbacks.read().len()
    }
}

/// Handle that unregisters a watch callback when disposed.
pub struct WatchHandle<S: KeyedSnapshot> {
    pub id: WatchId,
    callbacks: Weak<CallbackList<S>>,
}

impl<S> Disposable for WatchHandle<S>
where
    S: KeyedSnapshot + Send + Sync + 'static,
{
    fn dispose(&self) {
        if let Some(callbacks) = self.callbacks.upgrade() {
            callbacks.write().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    type Snap = BTreeMap<String, u32>;

    fn recording(watcher: &SnapshotWatcher<Snap>) -> (WatchHandle<Snap>, Arc<Mutex<Vec<Changes<String>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = watcher.watch(move |changes, _next, _prev| {
            sink.lock().push(changes.clone());
        });
        (handle, seen)
    }

    #[test]
    fn test_edits_coalesce_into_one_batch() {
        let watcher = SnapshotWatcher::new(Snap::new());
        let (_handle, seen) = recording(&watcher);

        watcher.edit(|s| s.insert("a".into(), 1));
        watcher.edit(|s| s.insert("b".into(), 1));
        watcher.edit(|s| s.insert("c".into(), 1));
        watcher.settle();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].added.len(), 3);
    }

    #[test]
    fn test_settle_without_edits_is_silent() {
        let watcher = SnapshotWatcher::new(Snap::new());
        let (_handle, seen) = recording(&watcher);

        assert!(watcher.settle().is_none());
        watcher.edit(|s| s.insert("a".into(), 1));
        assert!(watcher.settle().is_some());
        assert!(watcher.settle().is_none());

        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_net_zero_batch_not_delivered() {
        let mut initial = Snap::new();
        initial.insert("a".into(), 1);
        let watcher = SnapshotWatcher::new(initial);
        watcher.settle();

        let (_handle, seen) = recording(&watcher);
        watcher.edit(|s| s.insert("b".into(), 1));
        watcher.edit(|s| s.remove("b"));
        assert!(watcher.settle().is_none());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_previous_snapshot_passed_to_callback() {
        let watcher = SnapshotWatcher::new(Snap::new());
        let removed_values = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&removed_values);
        let _handle = watcher.watch(move |changes, _next, prev| {
            for key in &changes.removed {
                if let Some(v) = prev.and_then(|p| p.get(key)) {
                    sink.lock().push(*v);
                }
            }
        });

        watcher.edit(|s| s.insert("a".into(), 7));
        watcher.settle();
        watcher.edit(|s| s.remove("a"));
        watcher.settle();

        assert_eq!(*removed_values.lock(), vec![7]);
    }

    #[test]
    fn test_disposed_watch_stops_receiving() {
        let watcher = SnapshotWatcher::new(Snap::new());
        let (handle, seen) = recording(&watcher);

        handle.dispose();
        handle.dispose();
        assert_eq!(watcher.watcher_count(), 0);

        watcher.edit(|s| s.insert("a".into(), 1));
        watcher.settle();
        assert!(seen.lock().is_empty());
    }
}
