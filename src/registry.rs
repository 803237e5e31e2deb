use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Thread-safe, version-keyed store of immutable entries.
///
/// Readers get an `Arc` snapshot; replacing a version swaps the pointer, so a
/// sheet already holding the previous entry finishes against it untouched.
pub struct VersionedRegistry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for VersionedRegistry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> VersionedRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces; returns the entry that was displaced, if any.
    pub fn insert(&self, version: impl Into<String>, value: T) -> Option<Arc<T>> {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(version.into(), Arc::new(value))
    }

    pub fn get(&self, version: &str) -> Option<Arc<T>> {
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        map.get(version).cloned()
    }

    pub fn contains(&self, version: &str) -> bool {
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        map.contains_key(version)
    }

    pub fn remove(&self, version: &str) -> Option<Arc<T>> {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(version)
    }

    /// Registered versions, sorted.
    pub fn versions(&self) -> Vec<String> {
        let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut v: Vec<String> = map.keys().cloned().collect();
        v.sort();
        v
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
