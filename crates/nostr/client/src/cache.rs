//! Size- and time-bounded cache shared by every auxiliary lookup.

use crate::storage::{KeyValueStore, StorageError, load_json, save_json};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries kept
    pub max_entries: usize,
    /// How long an entry counts as fresh
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 200,
            ttl: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry<V> {
    value: V,
    /// Wall-clock milliseconds, so entries survive a restart
    stored_at: u64,
}

/// Cache with insertion-order eviction and a freshness window.
///
/// Expired entries are still returned by [`TtlCache::get_stale`]; this is how
/// a fresh process serves stale-but-useful data while a refetch runs.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    config: CacheConfig,
    entries: HashMap<K, CacheEntry<V>>,
    /// Keys in insertion order, oldest first
    order: VecDeque<K>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, now_millis());
    }

    pub fn insert_at(&mut self, key: K, value: V, stored_at: u64) {
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }
        self.entries.insert(key.clone(), CacheEntry { value, stored_at });
        self.order.push_back(key);

        while self.entries.len() > self.config.max_entries {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    /// Fresh value for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_at(key, now_millis())
    }

    pub fn get_at(&self, key: &K, now: u64) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| &entry.value)
    }

    /// Value for `key` regardless of age.
    pub fn get_stale(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.order.retain(|k| k != key);
        self.entries.remove(key).map(|entry| entry.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Drop every expired entry.
    pub fn purge_expired(&mut self) {
        let now = now_millis();
        let ttl = self.config.ttl;
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.stored_at) < ttl.as_millis() as u64);
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` pairs, fresh or not, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|entry| (k, &entry.value)))
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, now: u64) -> bool {
        now.saturating_sub(entry.stored_at) < self.config.ttl.as_millis() as u64
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Load entries persisted under `key`.
    ///
    /// Corrupt or wrong-shaped data yields an empty cache.
    pub fn load(store: &dyn KeyValueStore, key: &str, config: CacheConfig) -> Self {
        let mut cache = Self::with_config(config);
        let saved: Vec<(K, CacheEntry<V>)> = load_json(store, key).unwrap_or_default();
        for (k, entry) in saved {
            cache.insert_at(k, entry.value, entry.stored_at);
        }
        cache
    }

    pub fn persist(&self, store: &dyn KeyValueStore, key: &str) -> Result<(), StorageError> {
        let saved: Vec<(&K, &CacheEntry<V>)> = self
            .order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|entry| (k, entry)))
            .collect();
        save_json(store, key, &saved)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn small(max_entries: usize) -> CacheConfig {
        CacheConfig {
            max_entries,
            ttl: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let mut cache = TtlCache::with_config(small(2));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"c"), Some(&3));
    }

    #[test]
    fn test_reinsert_refreshes_position() {
        let mut cache = TtlCache::with_config(small(2));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        cache.insert("c", 3);

        assert_eq!(cache.get(&"a"), Some(&10));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn test_expired_entries_are_stale_only() {
        let mut cache = TtlCache::with_config(small(10));
        let now = now_millis();
        cache.insert_at("old", 1, now - 120_000);
        cache.insert_at("new", 2, now);

        assert_eq!(cache.get(&"old"), None);
        assert_eq!(cache.get_stale(&"old"), Some(&1));
        assert_eq!(cache.get(&"new"), Some(&2));

        cache.purge_expired();
        assert_eq!(cache.get_stale(&"old"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_persist_and_load() {
        let store = MemoryStore::new();
        let mut cache: TtlCache<String, String> = TtlCache::with_config(small(10));
        cache.insert("pk".to_string(), "alice".to_string());
        cache.persist(&store, "profiles").unwrap();

        let loaded: TtlCache<String, String> = TtlCache::load(&store, "profiles", small(10));
        assert_eq!(loaded.get(&"pk".to_string()).map(String::as_str), Some("alice"));
    }

    #[test]
    fn test_load_corrupt_is_empty() {
        let store = MemoryStore::new();
        store.set("profiles", "[1, 2, 3]").unwrap();
        let loaded: TtlCache<String, String> = TtlCache::load(&store, "profiles", small(10));
        assert!(loaded.is_empty());
    }
}
