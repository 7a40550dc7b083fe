//! Process-wide TTL cache with single-flight fetches
//!
//! Keyed by `(dataset, geography)`. Concurrent requesters for a key without a
//! fresh entry share one in-flight future, so N simultaneous callers produce
//! exactly one upstream call. Successful results are stored with their fetch
//! time; failures are handed to every waiter and never cached.
//!
//! The internal lock is a `std::sync::Mutex` and is never held across an
//! `.await`.

use crate::error::FetchError;
use crate::services::dataset_catalog::RefreshClass;
use futures::future::{BoxFuture, FutureExt, Shared};
use machi_common::config::CacheConfig;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// Cache key: dataset name (or `real_estate`) and municipality code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub dataset: String,
    pub geography: String,
}

impl CacheKey {
    pub fn new(dataset: impl Into<String>, geography: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            geography: geography.into(),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.dataset, self.geography)
    }
}

/// A stored upstream result
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: CacheKey,
    pub value: V,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

/// Cache lifetime per dataset refresh class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub census: Duration,
    pub annual: Duration,
    pub frequent: Duration,
}

impl CacheTtls {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            census: Duration::from_secs(config.census_ttl_secs),
            annual: Duration::from_secs(config.annual_ttl_secs),
            frequent: Duration::from_secs(config.frequent_ttl_secs),
        }
    }

    pub fn for_class(&self, refresh: RefreshClass) -> Duration {
        match refresh {
            RefreshClass::Census => self.census,
            RefreshClass::Annual => self.annual,
            RefreshClass::Frequent => self.frequent,
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

struct CacheState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    in_flight: HashMap<CacheKey, SharedFetch<V>>,
}

/// Single-flight response cache
pub struct ResponseCache<V> {
    name: &'static str,
    state: Mutex<CacheState<V>>,
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            }),
        }
    }

    // A panic while holding the lock cannot leave the maps half-updated
    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return a fresh cached value or join/start the single in-flight fetch
    ///
    /// `fetch` is only invoked when this caller starts a new fetch. Dropping
    /// the returned future does not cancel the fetch for other waiters.
    pub async fn get_or_fetch<F, Fut>(
        self: &Arc<Self>,
        key: CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<V, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let shared = {
            let mut state = self.lock();

            if let Some(entry) = state.entries.get(&key) {
                if entry.is_fresh(Instant::now()) {
                    tracing::debug!(cache = self.name, key = %key, "Cache hit");
                    return Ok(entry.value.clone());
                }
            }

            match state.in_flight.get(&key) {
                Some(in_flight) => {
                    tracing::debug!(cache = self.name, key = %key, "Joining in-flight fetch");
                    in_flight.clone()
                }
                None => {
                    tracing::debug!(cache = self.name, key = %key, "Cache miss, fetching");
                    let shared = self.start_fetch(key.clone(), ttl, fetch());
                    state.in_flight.insert(key, shared.clone());
                    shared
                }
            }
        };

        shared.await
    }

    fn start_fetch<Fut>(self: &Arc<Self>, key: CacheKey, ttl: Duration, fetch: Fut) -> SharedFetch<V>
    where
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let cache: Weak<Self> = Arc::downgrade(self);
        async move {
            let result = fetch.await;
            if let Some(cache) = cache.upgrade() {
                cache.complete(key, ttl, &result);
            }
            result
        }
        .boxed()
        .shared()
    }

    fn complete(&self, key: CacheKey, ttl: Duration, result: &Result<V, FetchError>) {
        let mut state = self.lock();
        state.in_flight.remove(&key);

        match result {
            Ok(value) => {
                state.entries.insert(
                    key.clone(),
                    CacheEntry {
                        key,
                        value: value.clone(),
                        fetched_at: Instant::now(),
                        ttl,
                    },
                );
            }
            Err(err) => {
                tracing::debug!(cache = self.name, key = %key, error = %err, "Fetch failed, not cached");
            }
        }
    }

    /// Cached value regardless of freshness
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        self.lock().entries.get(key).cloned()
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Evict expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_fresh(now));
        let purged = before - state.entries.len();
        if purged > 0 {
            tracing::debug!(cache = self.name, purged, "Purged expired cache entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }
}
