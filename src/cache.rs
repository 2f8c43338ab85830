use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// In-memory TTL cache for aggregate query results.
///
/// Values are stored as JSON so one cache covers every payload shape the
/// engine produces. Entries are never served past their expiry; expired
/// entries are dropped lazily on lookup and can be swept periodically.
/// Concurrent writers to the same key are last-writer-wins — entries are
/// immutable value objects, never mutated in place.
pub struct TtlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl TtlCache {
    pub fn new() -> Self {
        TtlCache {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let expired = {
            let entries = self.entries.read().unwrap();
            match entries.get(key) {
                Some(entry) if Instant::now() <= entry.expires_at => {
                    return serde_json::from_value(entry.value.clone()).ok();
                }
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.entries.write().unwrap().remove(key);
        }
        None
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(json) => {
                let entry = CacheEntry {
                    value: json,
                    expires_at: Instant::now() + ttl,
                };
                self.entries.write().unwrap().insert(key.to_string(), entry);
            }
            Err(e) => log::warn!("failed to cache entry for '{}': {}", key, e),
        }
    }

    /// Cache-aside: return the cached value or run the fetcher and store its
    /// result. Empty results are cached like populated ones — there is no
    /// negative-caching special case.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, ttl: Duration, fetcher: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(cached) = self.get(key) {
            return cached;
        }
        let fresh = fetcher().await;
        self.set(key, &fresh, ttl);
        fresh
    }

    /// Fallible cache-aside: only successful results are stored
    pub async fn get_or_try_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetcher: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key) {
            return Ok(cached);
        }
        let fresh = fetcher().await?;
        self.set(key, &fresh, ttl);
        Ok(fresh)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        before - entries.len()
    }

    /// Drop everything. Teardown hook for tests.
    #[allow(dead_code)]
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}
