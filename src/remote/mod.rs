//! Interface to the remote, path-addressed real-time store.
//!
//! The core only talks to the store through [`RemoteStore`]. Two kinds of
//! live listeners exist:
//! - Child listeners receive added/removed/changed events for the children
//!   of a path, optionally limited to the trailing window of children.
//! - Value listeners receive the whole value at a path whenever it changes.
//!
//! Every listener returns a [`ListenerHandle`]; disposing it stops future
//! deliveries, but events already queued may still arrive. Consumers that
//! need a hard fence (the aggregator) check their own liveness token.

mod memory;
mod tree;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::registry::Disposable;
use crate::types::StorePath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Kind of child event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildEventKind {
    Added,
    Removed,
    Changed,
}

/// Event about one child of a subscribed path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChildEvent {
    #[serde(rename = "type")]
    pub kind: ChildEventKind,
    /// Key of the child under the subscribed path.
    pub key: String,
    /// New value, or the last known value for removals.
    pub value: Value,
}

impl ChildEvent {
    pub fn added(key: impl Into<String>, value: Value) -> Self {
        Self {
            kind: ChildEventKind::Added,
            key: key.into(),
            value,
        }
    }

    pub fn removed(key: impl Into<String>, value: Value) -> Self {
        Self {
            kind: ChildEventKind::Removed,
            key: key.into(),
            value,
        }
    }

    pub fn changed(key: impl Into<String>, value: Value) -> Self {
        Self {
            kind: ChildEventKind::Changed,
            key: key.into(),
            value,
        }
    }
}

/// Which children a subscription covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Query {
    /// Only the most recent `limit` children by key order (None = all).
    pub limit: Option<usize>,
}

impl Query {
    pub fn all() -> Self {
        Self { limit: None }
    }

    /// The trailing window of `limit` children.
    pub fn last(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

/// Callback for child events.
pub type ChildListener = Arc<dyn Fn(ChildEvent) + Send + Sync>;

/// Callback for whole-value changes. `None` means the path is empty.
pub type ValueListener = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Handle to a live listener.
pub type ListenerHandle = Box<dyn Disposable>;

/// Capabilities required from the remote store.
pub trait RemoteStore: Send + Sync {
    /// Listen for child events under `path`.
    ///
    /// Children already present are reported as added.
    fn subscribe(&self, path: &StorePath, query: Query, listener: ChildListener) -> Result<ListenerHandle>;

    /// Listen for changes of the whole value at `path`.
    ///
    /// The current value is reported first.
    fn watch_value(&self, path: &StorePath, listener: ValueListener) -> Result<ListenerHandle>;

    /// One-shot read.
    fn read_once(&self, path: &StorePath) -> Result<Option<Value>>;

    /// Replace the value at `path`. Writing `null` removes it.
    fn write(&self, path: &StorePath, value: Value) -> Result<()>;

    /// Remove the value at `path`.
    fn remove(&self, path: &StorePath) -> Result<()> {
        self.write(path, Value::Null)
    }
}
