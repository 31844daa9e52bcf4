//! TTL + LRU analysis cache
//!
//! Bounded, thread-safe result cache: entries expire after their TTL and
//! the least recently accessed entry is evicted once the cache is full.
//! A background sweeper clears expired entries every five minutes and
//! stops when the cache is dropped.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Sweeper pass interval.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    accessed_at: Instant,
}

/// Hit/miss statistics, updated on every read.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
}

struct CacheInner<V> {
    entries: LruCache<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

/// A TTL + LRU cache keyed by strings.
pub struct TtlCache<V> {
    inner: Arc<Mutex<CacheInner<V>>>,
    default_ttl: Duration,
    max_size: usize,
    sweeper: CancellationToken,
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    /// Create a cache holding at most `max_size` entries. When called
    /// inside a tokio runtime the background sweeper starts immediately;
    /// without a runtime the cache still works, relying on read-time
    /// expiry alone.
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap();
        let inner = Arc::new(Mutex::new(CacheInner {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }));
        let sweeper = CancellationToken::new();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = inner.clone();
            let token = sweeper.clone();
            handle.spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                            let removed = sweep_expired(&inner);
                            if removed > 0 {
                                tracing::debug!("Cache sweeper removed {} expired entries", removed);
                            }
                        }
                    }
                }
            });
        }

        Self {
            inner,
            default_ttl,
            max_size: max_size.max(1),
            sweeper,
        }
    }

    /// Look a key up. Expired entries are removed and count as misses;
    /// live hits refresh the entry's recency.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        let mut live = None;
        let mut expired = false;
        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.expires_at > now {
                entry.accessed_at = now;
                live = Some(entry.value.clone());
            } else {
                expired = true;
            }
        }

        if let Some(value) = live {
            inner.hits += 1;
            return Some(value);
        }
        if expired {
            inner.entries.pop(key);
        }
        inner.misses += 1;
        None
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: &str, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL. At capacity the least recently
    /// accessed entry is evicted first.
    pub fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            expires_at: now + ttl,
            accessed_at: now,
        };
        let mut inner = self.inner.lock().unwrap();
        if let Some((evicted_key, _)) = inner.entries.push(key.to_string(), entry) {
            if evicted_key != key {
                tracing::debug!("Cache evicted least recently used entry {}", evicted_key);
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().unwrap().entries.pop(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let total = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                inner.hits as f64 / total as f64
            },
            size: inner.entries.len(),
            max_size: self.max_size,
        }
    }
}

impl<V> Drop for TtlCache<V> {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

/// Remove every expired entry; returns how many were dropped.
fn sweep_expired<V>(inner: &Mutex<CacheInner<V>>) -> usize {
    let mut inner = inner.lock().unwrap();
    let now = Instant::now();
    let expired: Vec<String> = inner
        .entries
        .iter()
        .filter(|(_, entry)| entry.expires_at <= now)
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        inner.entries.pop(key);
    }
    expired.len()
}
