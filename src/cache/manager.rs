//! TTL cache for deserialized API responses
//!
//! Provides a `TtlCache` handle that stores JSON snapshots of serializable values
//! with an insertion timestamp. Values are copied on the way in (serialized into a
//! `serde_json::Value`) so nothing the caller does afterwards can reach the cached
//! entry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default freshness window for cached responses (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Builds a cache key of the form `"{resource}_{param}"`.
///
/// The parameter is lowercased so that `"ETH"` and `"eth"` share one entry.
pub fn cache_key(resource: &str, param: &str) -> String {
    format!("{}_{}", resource, param.to_lowercase())
}

/// A single cached value. Never mutated after insertion.
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Snapshot of the caller's value
    value: serde_json::Value,
    /// When the value was stored
    stored_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) <= ttl
    }
}

/// Cache behavior settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry stays fresh, uniform across keys
    pub ttl: Duration,
    /// Interval for the optional background sweep of expired entries
    pub sweep_interval: Option<Duration>,
    /// Whether concurrent misses for the same key share one fetch
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            sweep_interval: None,
            single_flight: false,
        }
    }
}

#[derive(Debug)]
struct Inner {
    config: CacheConfig,
    entries: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

/// Process-local cache of API responses keyed by request parameters
///
/// `TtlCache` is a cheap handle: clones share the same storage, so one cache can
/// be constructed at startup and handed to every client that needs it. Failures
/// inside the cache never surface to callers; they degrade to a miss.
#[derive(Debug, Clone)]
pub struct TtlCache {
    inner: Arc<Inner>,
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::with_config(CacheConfig::default())
    }
}

impl TtlCache {
    /// Creates a cache with the given TTL and default settings otherwise
    pub fn new(ttl: Duration) -> Self {
        Self::with_config(CacheConfig {
            ttl,
            ..CacheConfig::default()
        })
    }

    /// Creates a cache from a full configuration
    ///
    /// The sweep interval is only recorded here; use `SweepHandle::spawn` to
    /// start the background task.
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                entries: DashMap::new(),
                in_flight: DashMap::new(),
            }),
        }
    }

    /// Returns the configuration this cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Stores a copy of `value` under `key`, replacing any previous entry
    ///
    /// If the value cannot be serialized the call is a no-op and a warning is
    /// logged.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let snapshot = match serde_json::to_value(value) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(key, error = %e, "failed to cache value");
                return;
            }
        };

        self.inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value: snapshot,
                stored_at: Instant::now(),
            },
        );
    }

    /// Reads a fresh value for `key`
    ///
    /// Returns `None` when the key is missing, when the entry is older than the
    /// TTL (the stale entry is removed), or when the stored snapshot does not
    /// decode into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let ttl = self.inner.config.ttl;

        // The shard guard must be released before removing below.
        let fresh = {
            let entry = self.inner.entries.get(key)?;
            entry.is_fresh(now, ttl).then(|| entry.value.clone())
        };

        let Some(value) = fresh else {
            if self.evict_if_stale(key, now) {
                debug!(key, "evicted expired cache entry");
            }
            return None;
        };

        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!(key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Returns whether an entry exists for `key`, fresh or not, without evicting it
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.entries.contains_key(key)
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns true if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Removes all entries
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    /// Removes the entry for `key` if it is stale as of `now`
    ///
    /// Returns false when the entry is gone or was refreshed by a concurrent `set`.
    fn evict_if_stale(&self, key: &str, now: Instant) -> bool {
        let ttl = self.inner.config.ttl;
        self.inner
            .entries
            .remove_if(key, |_, entry| !entry.is_fresh(now, ttl))
            .is_some()
    }

    /// Removes every expired entry and returns how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.inner.config.ttl;
        let before = self.inner.entries.len();
        self.inner.entries.retain(|_, entry| entry.is_fresh(now, ttl));
        before.saturating_sub(self.inner.entries.len())
    }

    /// Returns the cached value for `key`, or runs `fetch` and caches its success
    ///
    /// Errors from `fetch` are passed through and nothing is stored. With
    /// single-flight enabled, concurrent callers for the same key queue behind
    /// the first one and pick up the value it stored. Without it, each miss
    /// fetches independently and the last write to complete wins.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key) {
            debug!(key, "cache hit");
            return Ok(cached);
        }

        if !self.inner.config.single_flight {
            let value = fetch().await?;
            self.set(key, &value);
            return Ok(value);
        }

        let slot = InFlightSlot {
            cache: self,
            key,
            lock: self
                .inner
                .in_flight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone(),
        };

        let guard = slot.lock.lock().await;

        // Another caller may have filled the entry while we waited.
        let result = match self.get(key) {
            Some(cached) => {
                debug!(key, "cache filled by in-flight request");
                Ok(cached)
            }
            None => {
                let result = fetch().await;
                if let Ok(value) = &result {
                    self.set(key, value);
                }
                result
            }
        };

        drop(guard);
        result
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.inner.in_flight.len()
    }
}

/// A caller's claim on the per-key lock used by single-flight lookups
///
/// Dropping it, on completion or when the caller's future is cancelled, removes
/// the lock from the in-flight map once no other caller holds it.
struct InFlightSlot<'a> {
    cache: &'a TtlCache,
    key: &'a str,
    lock: Arc<Mutex<()>>,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        // One reference lives in the map, one is ours.
        let lock = &self.lock;
        self.cache.inner.in_flight.remove_if(self.key, |_, current| {
            Arc::ptr_eq(current, lock) && Arc::strong_count(current) <= 2
        });
    }
}
