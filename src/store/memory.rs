//! In-process store: one JSON tree behind a mutex.
//!
//! Used when no database is configured and by tests. Deleting the last child
//! of an object removes the now-empty parent too, so an empty collection
//! reads as absent rather than `{}`.

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::{CHANGE_CHANNEL_CAPACITY, RemoteStore, StoreError, StorePath, ensure_no_nulls};

pub struct MemoryStore {
    root: Mutex<Value>,
    changes: broadcast::Sender<StorePath>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { root: Mutex::new(Value::Object(Map::new())), changes }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Value> {
        // A poisoned tree is still structurally valid JSON.
        self.root.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        if !value.is_null() {
            ensure_no_nulls(path, &value)?;
        }
        {
            let mut root = self.lock();
            tree_set(&mut root, path.segments(), value);
        }
        // No receivers just means nobody is watching.
        let _ = self.changes.send(path.clone());
        Ok(())
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        Ok(tree_get(&self.lock(), path.segments()).cloned())
    }

    fn changes(&self) -> broadcast::Receiver<StorePath> {
        self.changes.subscribe()
    }
}

// =============================================================================
// TREE HELPERS
// =============================================================================

/// Value at `segments` below `root`, if any.
pub(crate) fn tree_get<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, segment| node.as_object()?.get(segment))
}

/// Write `value` at `segments` below `root`, creating intermediate objects.
/// `Value::Null` removes the entry and prunes parents left empty.
pub(crate) fn tree_set(root: &mut Value, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove_and_prune(root, segments);
        return;
    }

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else { return };
        node = map.entry(segment.clone()).or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.clone(), value);
    }
}

/// Remove the entry at `segments`; returns whether `node` is now empty.
fn remove_and_prune(node: &mut Value, segments: &[String]) -> bool {
    let Value::Object(map) = node else {
        return false;
    };
    match segments {
        [] => false,
        [last] => {
            map.remove(last);
            map.is_empty()
        }
        [first, rest @ ..] => {
            let Some(child) = map.get_mut(first) else {
                return false;
            };
            if remove_and_prune(child, rest) {
                map.remove(first);
            }
            map.is_empty()
        }
    }
}
