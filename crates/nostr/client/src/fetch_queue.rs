//! Memoized, concurrency-limited lookups (profiles and similar).
//!
//! - at most `concurrency` fetches run at once, the rest wait in arrival order
//! - callers asking for a key already in flight share its result
//! - a key is attempted once per process until invalidated
//! - successes land in a persisted [`TtlCache`]

use crate::cache::{CacheConfig, TtlCache};
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, warn};

/// The lookup a [`FetchQueue`] schedules. `None` means nothing was found.
#[async_trait]
pub trait Fetcher<K, V>: Send + Sync {
    async fn fetch(&self, key: &K) -> Option<V>;
}

/// Fire-and-forget lookups keyed by string, as used by projection stores.
pub trait Prefetch: Send + Sync {
    fn prefetch(&self, key: String);
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub cache: CacheConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            cache: CacheConfig::default(),
        }
    }
}

type SharedFetch<V> = Shared<BoxFuture<'static, Option<V>>>;

struct QueueState<K, V> {
    in_flight: HashMap<K, SharedFetch<V>>,
    attempted: HashSet<K>,
    cache: TtlCache<K, V>,
}

struct QueueInner<K, V> {
    fetcher: Arc<dyn Fetcher<K, V>>,
    permits: Semaphore,
    state: Mutex<QueueState<K, V>>,
    resolved: watch::Sender<HashMap<K, V>>,
    persistence: Option<(Arc<dyn KeyValueStore>, String)>,
}

pub struct FetchQueue<K, V> {
    inner: Arc<QueueInner<K, V>>,
}

impl<K, V> Clone for FetchQueue<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> FetchQueue<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + Serialize + DeserializeOwned + 'static,
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// In-memory queue.
    pub fn new(fetcher: Arc<dyn Fetcher<K, V>>, config: QueueConfig) -> Self {
        let cache = TtlCache::with_config(config.cache.clone());
        Self::build(fetcher, config, cache, None)
    }

    /// Queue whose cache is loaded from and saved to `store` under `key`.
    ///
    /// Fresh and stale entries are served right away.
    pub fn persistent(
        fetcher: Arc<dyn Fetcher<K, V>>,
        config: QueueConfig,
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let cache = TtlCache::load(store.as_ref(), &key, config.cache.clone());
        debug!("Loaded {} cached entries from {}", cache.len(), key);
        Self::build(fetcher, config, cache, Some((store, key)))
    }

    fn build(
        fetcher: Arc<dyn Fetcher<K, V>>,
        config: QueueConfig,
        cache: TtlCache<K, V>,
        persistence: Option<(Arc<dyn KeyValueStore>, String)>,
    ) -> Self {
        let initial: HashMap<K, V> = cache.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let (resolved, _) = watch::channel(initial);
        Self {
            inner: Arc::new(QueueInner {
                fetcher,
                permits: Semaphore::new(config.concurrency.max(1)),
                state: Mutex::new(QueueState {
                    in_flight: HashMap::new(),
                    attempted: HashSet::new(),
                    cache,
                }),
                resolved,
                persistence,
            }),
        }
    }

    /// Value for `key`, fetching it if it was never attempted.
    ///
    /// A stale cached value is returned immediately while a refresh runs in
    /// the background.
    pub async fn fetch_for(&self, key: K) -> Option<V> {
        let pending = {
            let mut state = self.inner.lock();
            if let Some(value) = state.cache.get(&key) {
                return Some(value.clone());
            }
            if let Some(pending) = state.in_flight.get(&key) {
                match state.cache.get_stale(&key) {
                    Some(stale) => return Some(stale.clone()),
                    None => pending.clone(),
                }
            } else if state.attempted.contains(&key) {
                return state.cache.get_stale(&key).cloned();
            } else {
                let pending = self.start(&mut state, key.clone());
                if let Some(stale) = state.cache.get_stale(&key).cloned() {
                    tokio::spawn(pending);
                    return Some(stale);
                }
                pending
            }
        };
        pending.await
    }

    /// Cached value, fresh or stale, without fetching.
    pub fn cached(&self, key: &K) -> Option<V> {
        self.inner.lock().cache.get_stale(key).cloned()
    }

    /// Start a background refetch of `key`, even if it was attempted before.
    pub fn refresh_stale(&self, key: K) {
        let mut state = self.inner.lock();
        if state.in_flight.contains_key(&key) {
            return;
        }
        state.attempted.remove(&key);
        let pending = self.start(&mut state, key);
        tokio::spawn(pending);
    }

    /// Forget `key` so the next `fetch_for` fetches it again.
    pub fn invalidate(&self, key: &K) {
        {
            let mut state = self.inner.lock();
            state.attempted.remove(key);
            state.cache.remove(key);
        }
        self.inner.resolved.send_modify(|resolved| {
            resolved.remove(key);
        });
        self.inner.persist();
    }

    pub fn invalidate_all(&self) {
        {
            let mut state = self.inner.lock();
            state.attempted.clear();
            state.cache.clear();
        }
        self.inner.resolved.send_replace(HashMap::new());
        self.inner.persist();
    }

    /// Every resolved value.
    pub fn snapshot(&self) -> HashMap<K, V> {
        self.inner.resolved.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<HashMap<K, V>> {
        self.inner.resolved.subscribe()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    fn start(&self, state: &mut QueueState<K, V>, key: K) -> SharedFetch<V> {
        state.attempted.insert(key.clone());
        let inner = Arc::clone(&self.inner);
        let pending = {
            let key = key.clone();
            async move {
                let value = match inner.permits.acquire().await {
                    Ok(_permit) => inner.fetcher.fetch(&key).await,
                    Err(_) => None,
                };
                inner.complete(&key, value.clone());
                value
            }
        }
        .boxed()
        .shared();
        state.in_flight.insert(key, pending.clone());
        pending
    }
}

impl<K, V> QueueInner<K, V>
where
    K: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    fn lock(&self) -> MutexGuard<'_, QueueState<K, V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn complete(&self, key: &K, value: Option<V>) {
        {
            let mut state = self.lock();
            state.in_flight.remove(key);
            match &value {
                Some(value) => state.cache.insert(key.clone(), value.clone()),
                None => debug!("No result for {:?}", key),
            }
        }
        if let Some(value) = value {
            self.resolved.send_modify(|resolved| {
                resolved.insert(key.clone(), value);
            });
            self.persist();
        }
    }

    fn persist(&self) {
        let Some((store, key)) = &self.persistence else {
            return;
        };
        let result = self.lock().cache.persist(store.as_ref(), key);
        if let Err(e) = result {
            warn!("Failed to persist {}: {}", key, e);
        }
    }
}

impl<V> Prefetch for FetchQueue<String, V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    fn prefetch(&self, key: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let queue = self.clone();
        runtime.spawn(async move {
            queue.fetch_for(key).await;
        });
    }
}
