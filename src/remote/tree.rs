//! Path operations on the JSON tree backing [`MemoryStore`](super::MemoryStore).
//!
//! Empty objects and `null` do not exist as stored values: writing either
//! removes the node, and parents left empty are pruned.

use crate::types::StorePath;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Value at `path`, if any.
pub(crate) fn get<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.segments() {
        node = node.as_object()?.get(segment)?;
    }
    if is_empty(node) {
        None
    } else {
        Some(node)
    }
}

/// Replace the value at `path`. Returns true if the tree changed.
pub(crate) fn set(root: &mut Value, path: &StorePath, value: Value) -> bool {
    let value = normalize(value);
    set_in(root, path.segments(), value)
}

fn set_in(node: &mut Value, segments: &[String], value: Option<Value>) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        let new_value = value.unwrap_or(Value::Null);
        if *node == new_value {
            return false;
        }
        *node = new_value;
        return true;
    };

    if !node.is_object() {
        if value.is_none() {
            return false;
        }
        *node = Value::Object(Map::new());
    }
    let Some(obj) = node.as_object_mut() else {
        return false;
    };

    if value.is_none() && !obj.contains_key(first) {
        return false;
    }

    let child = obj.entry(first.clone()).or_insert(Value::Null);
    let changed = set_in(child, rest, value);
    if is_empty(child) {
        obj.remove(first);
    }
    changed
}

/// Drop nulls and empty objects, recursively.
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            if map.is_empty() {
                None
            } else {
                Some(Value::Object(map))
            }
        }
        other => Some(other),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Children of the value at `path`, ordered by key.
pub(crate) fn children(root: &Value, path: &StorePath) -> BTreeMap<String, Value> {
    match get(root, path) {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => BTreeMap::new(),
    }
}

/// Keep only the last `limit` entries by key order.
pub(crate) fn limit_to_last(mut children: BTreeMap<String, Value>, limit: Option<usize>) -> BTreeMap<String, Value> {
    if let Some(limit) = limit {
        while children.len() > limit {
            children.pop_first();
        }
    }
    children
}
