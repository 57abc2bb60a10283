//! Memoized value descriptors, keyed by connection and display key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::logging::{debug, trace};
use crate::value::ValueDescriptor;

/// Per-connection descriptor cache with no automatic expiry.
///
/// Entries are replaced wholesale. Two callers racing on the same miss both
/// fetch and the later insert wins; descriptors for one key are identical
/// anyway, so either result is valid.
///
/// Every connection has a generation that [`ValueCache::invalidate_all`]
/// advances. A fetch that started before the bump never lands in the cache,
/// so a connection that was relocated mid-fetch cannot be served values from
/// its old location.
#[derive(Debug, Default)]
pub struct ValueCache {
    state: RwLock<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, HashMap<String, Arc<ValueDescriptor>>>,
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn generation(&self, connection: &str) -> u64 {
        self.generations.get(connection).copied().unwrap_or(0)
    }
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, connection: &str, key: &str) -> Option<Arc<ValueDescriptor>> {
        self.state.read().entries.get(connection)?.get(key).cloned()
    }

    pub fn insert(&self, connection: &str, key: &str, descriptor: Arc<ValueDescriptor>) {
        self.state
            .write()
            .entries
            .entry(connection.to_string())
            .or_default()
            .insert(key.to_string(), descriptor);
    }

    /// Current generation of a connection's entries.
    pub fn generation(&self, connection: &str) -> u64 {
        self.state.read().generation(connection)
    }

    /// Insert only if the connection is still at `generation`.
    pub fn insert_if_current(
        &self,
        connection: &str,
        key: &str,
        generation: u64,
        descriptor: Arc<ValueDescriptor>,
    ) -> bool {
        let mut state = self.state.write();
        if state.generation(connection) != generation {
            return false;
        }
        state
            .entries
            .entry(connection.to_string())
            .or_default()
            .insert(key.to_string(), descriptor);
        true
    }

    /// Return the cached descriptor or run `fetch` and cache its result.
    ///
    /// The lock is not held while `fetch` runs. Errors are not cached.
    pub fn get_or_fetch<F>(&self, connection: &str, key: &str, fetch: F) -> Result<Arc<ValueDescriptor>>
    where
        F: FnOnce() -> Result<ValueDescriptor>,
    {
        let generation = self.generation(connection);
        self.get_or_fetch_at(connection, key, generation, fetch)
    }

    /// [`ValueCache::get_or_fetch`] for a fetch whose source was resolved at
    /// `generation`. The result is returned either way but only cached while
    /// the generation still holds.
    pub fn get_or_fetch_at<F>(
        &self,
        connection: &str,
        key: &str,
        generation: u64,
        fetch: F,
    ) -> Result<Arc<ValueDescriptor>>
    where
        F: FnOnce() -> Result<ValueDescriptor>,
    {
        if let Some(hit) = self.get(connection, key) {
            trace!(connection = connection, key = key, "value cache hit");
            return Ok(hit);
        }
        let descriptor = Arc::new(fetch()?);
        if !self.insert_if_current(connection, key, generation, descriptor.clone()) {
            debug!(connection = connection, key = key, "connection changed during fetch, not caching");
        }
        Ok(descriptor)
    }

    pub fn invalidate(&self, connection: &str, key: &str) -> bool {
        let mut state = self.state.write();
        let Some(per_connection) = state.entries.get_mut(connection) else {
            return false;
        };
        let removed = per_connection.remove(key).is_some();
        if per_connection.is_empty() {
            state.entries.remove(connection);
        }
        removed
    }

    /// Drop every entry of one connection and advance its generation.
    pub fn invalidate_all(&self, connection: &str) -> usize {
        let mut state = self.state.write();
        *state.generations.entry(connection.to_string()).or_insert(0) += 1;
        state.entries.remove(connection).map(|m| m.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.state.write().entries.clear();
    }

    /// Total number of cached descriptors.
    pub fn len(&self) -> usize {
        self.state.read().entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemoryEngine, StoreEngine};
    use crate::error::Error;
    use crate::value::{InspectLimits, inspect};

    #[test]
    fn test_two_hits_one_read() {
        let engine = MemoryEngine::with_entries([("k", "v")]);
        let cache = ValueCache::new();
        let limits = InspectLimits::default();

        let first = cache
            .get_or_fetch("main", "k", || inspect(&engine, "main", "k", &limits))
            .unwrap();
        let second = cache
            .get_or_fetch("main", "k", || inspect(&engine, "main", "k", &limits))
            .unwrap();

        assert_eq!(engine.read_count(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_errors_are_not_cached() {
        let engine = MemoryEngine::new();
        let cache = ValueCache::new();
        let limits = InspectLimits::default();

        let err = cache
            .get_or_fetch("main", "k", || inspect(&engine, "main", "k", &limits))
            .unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }));
        assert!(cache.is_empty());

        engine.insert("k", "now here");
        cache
            .get_or_fetch("main", "k", || inspect(&engine, "main", "k", &limits))
            .unwrap();
        assert_eq!(engine.read_count(), 2);
    }

    #[test]
    fn test_invalidate() {
        let cache = ValueCache::new();
        let limits = InspectLimits::default();
        for (conn, key) in [("a", "1"), ("a", "2"), ("b", "1")] {
            let d = ValueDescriptor::from_bytes(key, b"x", &limits);
            cache.insert(conn, key, Arc::new(d));
        }
        assert_eq!(cache.len(), 3);

        assert!(cache.invalidate("a", "1"));
        assert!(!cache.invalidate("a", "1"));
        assert!(cache.get("a", "2").is_some());

        assert_eq!(cache.invalidate_all("a"), 1);
        assert!(cache.get("a", "2").is_none());
        assert!(cache.get("b", "1").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fetch_across_invalidate_all_is_not_cached() {
        let engine = MemoryEngine::with_entries([("k", "old")]);
        let cache = ValueCache::new();
        let limits = InspectLimits::default();

        let generation = cache.generation("main");
        let fetched = cache
            .get_or_fetch_at("main", "k", generation, || {
                // The connection is relocated while the read is in flight.
                cache.invalidate_all("main");
                inspect(&engine, "main", "k", &limits)
            })
            .unwrap();
        assert_eq!(fetched.rendering.string_form, "old");
        assert!(cache.get("main", "k").is_none());
        assert_eq!(cache.generation("main"), generation + 1);

        engine.insert("k", "new");
        let refetched = cache
            .get_or_fetch("main", "k", || inspect(&engine, "main", "k", &limits))
            .unwrap();
        assert_eq!(refetched.rendering.string_form, "new");
        assert!(cache.get("main", "k").is_some());
    }

    #[test]
    fn test_refetch_after_invalidate() {
        let engine = MemoryEngine::with_entries([("k", "old")]);
        let cache = ValueCache::new();
        let limits = InspectLimits::default();
        let fetch = || inspect(&engine, "main", "k", &limits);

        cache.get_or_fetch("main", "k", fetch).unwrap();
        engine.insert("k", "new");
        assert_eq!(
            cache.get_or_fetch("main", "k", fetch).unwrap().rendering.string_form,
            "old"
        );

        cache.invalidate("main", "k");
        assert_eq!(
            cache.get_or_fetch("main", "k", fetch).unwrap().rendering.string_form,
            "new"
        );
        assert_eq!(engine.get(b"k").unwrap(), Some(b"new".to_vec()));
    }
}
