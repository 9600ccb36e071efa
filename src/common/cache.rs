//! In-memory cache for run-scoped shared data.
//!
//! Uses moka's concurrent cache so detached fetch tasks can write payloads
//! while the walk reads them.

use std::sync::Arc;

use moka::sync::Cache;
use serde_json::Value;

/// Fetched payloads keyed by the result key chosen in the fetch tool config.
pub type ApiData = Arc<MemCache<String, Value>>;

/// Thread-safe in-memory cache with configurable capacity.
///
/// Used for storing:
/// - Fetched api payloads (`MemCache<String, Value>`)
///
/// The cache is backed by moka, which provides:
/// - Thread-safe concurrent access
/// - Eviction when capacity is exceeded
#[derive(Clone)]
pub struct MemCache<K, V> {
    entries: Cache<K, V>,
}

impl<K, V> MemCache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Allocate a new [`MemCache`].
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Cache::new(capacity as u64),
        }
    }

    /// Insert or replace an entry.
    pub fn set(
        &self,
        key: K,
        value: V,
    ) {
        self.entries.insert(key, value);
    }

    /// Get an entry through key `&K`.
    pub fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.entries.get(key)
    }

    /// Remove an entry through key `&K`.
    pub fn remove(
        &self,
        key: &K,
    ) {
        self.entries.remove(key);
    }

    /// Whether the key is present.
    pub fn contains(
        &self,
        key: &K,
    ) -> bool {
        self.entries.contains_key(key)
    }

    /// Return an iterator over the entries of the cache.
    pub fn iter(&self) -> moka::sync::Iter<'_, K, V> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_cache_set_get_remove() {
        let cache: MemCache<String, Value> = MemCache::new(16);
        cache.set("viaf".to_string(), json!({"name": "Dante"}));

        assert!(cache.contains(&"viaf".to_string()));
        assert_eq!(cache.get(&"viaf".to_string()), Some(json!({"name": "Dante"})));

        cache.remove(&"viaf".to_string());
        assert_eq!(cache.get(&"viaf".to_string()), None);
    }
}
