//! Structural diffing of keyed snapshots.
//!
//! [`diff`] compares two snapshots of a keyed collection and reports which
//! keys were added, updated or removed. [`SnapshotWatcher`] builds on it to
//! deliver one change set per coalesced batch of edits.
//!
//! # Example
//!
//! ```ignore
//! let changes = diff(Some(&before), &after);
//! for key in &changes.added {
//!     aggregator.add_feed(&after[key])?;
//! }
//! ```

mod watch;

pub use watch::{SnapshotWatcher, WatchHandle, WatchId};

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// A keyed collection that can be compared structurally.
pub trait KeyedSnapshot {
    type Key: Clone;
    type Value: PartialEq;

    /// Iterate over every key present.
    fn snapshot_keys<'a>(&'a self) -> impl Iterator<Item = &'a Self::Key>
    where
        Self::Key: 'a;

    /// Look up the value stored under `key`.
    fn lookup(&self, key: &Self::Key) -> Option<&Self::Value>;
}

impl<K: Ord + Clone, V: PartialEq> KeyedSnapshot for BTreeMap<K, V> {
    type Key = K;
    type Value = V;

    fn snapshot_keys<'a>(&'a self) -> impl Iterator<Item = &'a K>
    where
        K: 'a,
    {
        self.keys()
    }

    fn lookup(&self, key: &K) -> Option<&V> {
        self.get(key)
    }
}

impl<K: Eq + Hash + Clone, V: PartialEq> KeyedSnapshot for HashMap<K, V> {
    type Key = K;
    type Value = V;

    fn snapshot_keys<'a>(&'a self) -> impl Iterator<Item = &'a K>
    where
        K: 'a,
    {
        self.keys()
    }

    fn lookup(&self, key: &K) -> Option<&V> {
        self.get(key)
    }
}

/// Keys that changed between two snapshots.
///
/// Order within each list is unspecified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Changes<K> {
    pub added: Vec<K>,
    pub updated: Vec<K>,
    pub removed: Vec<K>,
}

impl<K> Changes<K> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Total number of changed keys.
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

impl<K> Default for Changes<K> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Compare `previous` against `next`.
///
/// An absent `previous` counts as empty, so every key of `next` is added.
pub fn diff<S: KeyedSnapshot>(previous: Option<&S>, next: &S) -> Changes<S::Key> {
    let mut changes = Changes::default();

    for key in next.snapshot_keys() {
        let new_value = next.lookup(key);
        match previous.and_then(|prev| prev.lookup(key)) {
            None => changes.added.push(key.clone()),
            Some(old_value) if Some(old_value) != new_value => changes.updated.push(key.clone()),
            Some(_) => {}
        }
    }

    if let Some(prev) = previous {
        for key in prev.snapshot_keys() {
            if next.lookup(key).is_none() {
                changes.removed.push(key.clone());
            }
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn snapshot(entries: &[(&str, i32)]) -> BTreeMap<String, i32> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn sorted(keys: &[String]) -> Vec<String> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys
    }

    #[test]
    fn test_diff_from_nothing() {
        let next = snapshot(&[("a", 1), ("b", 2)]);
        let changes = diff(None, &next);

        assert_eq!(sorted(&changes.added), vec!["a", "b"]);
        assert!(changes.updated.is_empty());
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn test_diff_to_empty() {
        let prev = snapshot(&[("a", 1), ("b", 2)]);
        let changes = diff(Some(&prev), &BTreeMap::new());

        assert_eq!(sorted(&changes.removed), vec!["a", "b"]);
        assert!(changes.added.is_empty());
        assert!(changes.updated.is_empty());
    }

    #[test]
    fn test_diff_mixed() {
        let prev = snapshot(&[("keep", 1), ("edit", 1), ("drop", 1)]);
        let next = snapshot(&[("keep", 1), ("edit", 2), ("new", 1)]);
        let changes = diff(Some(&prev), &next);

        assert_eq!(changes.added, vec!["new"]);
        assert_eq!(changes.updated, vec!["edit"]);
        assert_eq!(changes.removed, vec!["drop"]);
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn test_diff_hash_map() {
        let mut prev = HashMap::new();
        prev.insert(1u32, "x");
        let mut next = prev.clone();
        next.insert(2, "y");

        let changes = diff(Some(&prev), &next);
        assert_eq!(changes.added, vec![2]);
        assert!(changes.removed.is_empty());
    }

    proptest! {
        #[test]
        fn prop_diff_with_self_is_empty(entries in prop::collection::btree_map("[a-z]{1,4}", 0i32..5, 0..20)) {
            prop_assert!(diff(Some(&entries), &entries).is_empty());
        }

        #[test]
        fn prop_diff_from_empty_adds_every_key(entries in prop::collection::btree_map("[a-z]{1,4}", 0i32..5, 1..20)) {
            let changes = diff(None, &entries);
            let added: BTreeSet<_> = changes.added.into_iter().collect();
            let keys: BTreeSet<_> = entries.keys().cloned().collect();
            prop_assert_eq!(added, keys);
            prop_assert!(changes.updated.is_empty());
            prop_assert!(changes.removed.is_empty());
        }

        #[test]
        fn prop_diff_partitions_keys(
            prev in prop::collection::btree_map("[a-d]{1,2}", 0i32..3, 0..12),
            next in prop::collection::btree_map("[a-d]{1,2}", 0i32..3, 0..12),
        ) {
            let changes = diff(Some(&prev), &next);
            for key in &changes.added {
                prop_assert!(!prev.contains_key(key) && next.contains_key(key));
            }
            for key in &changes.removed {
                prop_assert!(prev.contains_key(key) && !next.contains_key(key));
            }
            for key in &changes.updated {
                prop_assert_ne!(prev.get(key), next.get(key));
            }
            let unchanged = prev.keys().filter(|k| next.get(*k) == prev.get(*k)).count();
            prop_assert_eq!(changes.updated.len() + unchanged + changes.removed.len(), prev.len());
        }
    }
}
