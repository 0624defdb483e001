//! Time-bounded memoization of feed lookups.
//!
//! Entries expire purely by comparing their insertion time against the clock
//! at read time; there is no background eviction.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use vigil_types::IndicatorKind;

/// Millisecond time source, swappable for deterministic tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        vigil_types::now_ms()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Cache key: one entry per indicator, kind and feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub indicator: String,
    pub kind: IndicatorKind,
    pub feed: &'static str,
}

impl CacheKey {
    pub fn new(indicator: &str, kind: IndicatorKind, feed: &'static str) -> Self {
        Self {
            indicator: indicator.to_ascii_lowercase(),
            kind,
            feed,
        }
    }
}

struct Entry<V> {
    value: V,
    inserted_at: u64,
}

/// A TTL map shared between concurrent lookups.
pub struct TtlCache<K, V> {
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl_ms: ttl.as_millis() as u64,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The cached value, unless it has outlived the TTL. Expired entries are
    /// dropped on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_ms();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if now.saturating_sub(entry.inserted_at) < self.ttl_ms => {
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let inserted_at = self.clock.now_ms();
        self.lock().insert(key, Entry { value, inserted_at });
    }

    /// Entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_sub(entry.inserted_at) < self.ttl_ms);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(clock: &Arc<ManualClock>) -> TtlCache<CacheKey, u32> {
        TtlCache::new(Duration::from_secs(300), clock.clone())
    }

    #[test]
    fn hit_before_ttl_miss_after() {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = cache(&clock);
        let key = CacheKey::new("10.0.0.5", IndicatorKind::Ip, "otx");
        cache.insert(key.clone(), 7);

        clock.advance(Duration::from_secs(299));
        assert_eq!(cache.get(&key), Some(7));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn keys_are_per_feed_and_case_insensitive() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache(&clock);
        cache.insert(CacheKey::new("Example.COM", IndicatorKind::Domain, "otx"), 1);
        assert_eq!(
            cache.get(&CacheKey::new("example.com", IndicatorKind::Domain, "otx")),
            Some(1)
        );
        assert_eq!(
            cache.get(&CacheKey::new("example.com", IndicatorKind::Domain, "virustotal")),
            None
        );
    }

    #[test]
    fn purge_removes_only_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = cache(&clock);
        cache.insert(CacheKey::new("a", IndicatorKind::Domain, "otx"), 1);
        clock.advance(Duration::from_secs(200));
        cache.insert(CacheKey::new("b", IndicatorKind::Domain, "otx"), 2);
        clock.advance(Duration::from_secs(150));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
