//! Mutex-guarded registries of live listeners and connections.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// An id-ordered collection of shared objects behind a single lock.
///
/// The lock is never held across an `.await`; callers that need to act on
/// every entry take a [`snapshot`](Registry::snapshot) first.
#[derive(Debug)]
pub struct Registry<K, V> {
    entries: Mutex<BTreeMap<K, Arc<V>>>,
}

impl<K: Ord + Copy, V> Registry<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register an entry. Returns the previous entry under the same key, if any.
    pub fn insert(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        self.lock().insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.lock().remove(key)
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clone out every entry in ascending key order.
    pub fn snapshot(&self) -> Vec<Arc<V>> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<K, Arc<V>>> {
        // Entries are plain Arcs; a panic elsewhere cannot leave the map half-written.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K: Ord + Copy, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove_len() {
        let registry: Registry<u64, &'static str> = Registry::new();
        assert!(registry.is_empty());

        registry.insert(2, Arc::new("b"));
        registry.insert(1, Arc::new("a"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&1).as_deref(), Some(&"a"));

        let removed = registry.remove(&1).unwrap();
        assert_eq!(*removed, "a");
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&1).is_none());
    }

    #[test]
    fn snapshot_is_key_ordered() {
        let registry: Registry<u64, u64> = Registry::new();
        for id in [5, 1, 3] {
            registry.insert(id, Arc::new(id * 10));
        }
        let values: Vec<u64> = registry.snapshot().iter().map(|v| **v).collect();
        assert_eq!(values, vec![10, 30, 50]);
    }

    #[test]
    fn concurrent_inserts() {
        let registry = Arc::new(Registry::<u64, u64>::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = t * 100 + i;
                        registry.insert(key, Arc::new(key));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 800);
    }
}
