//! Expiring key-value store
//!
//! Each gateway cache (caller identities, permission decisions, scoped tokens)
//! is an instance of [`TtlCache`] with its own TTL. Reads never block each other
//! and a population is a short per-key critical section; no lock is ever held
//! across a network call.
//!
//! Eviction is lazy: an expired entry is dropped when it is read. Once the map
//! grows past the sweep threshold, an insert also sweeps expired entries, at
//! most once per TTL.

use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Map size above which an insert also sweeps expired entries
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Clone, Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Concurrent map whose entries expire a fixed time after insertion
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
    next_sweep: Mutex<Instant>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            next_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Get a live value, dropping the entry if it has expired
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }
        self.entries
            .remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Store a value, replacing any previous entry for the key
    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        if self.entries.len() >= SWEEP_THRESHOLD {
            self.sweep_expired(now);
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop every expired entry unless a sweep already ran within the last TTL
    fn sweep_expired(&self, now: Instant) {
        let Some(mut next_sweep) = self.next_sweep.try_lock() else {
            return;
        };
        if now < *next_sweep {
            return;
        }
        self.entries.retain(|_, entry| entry.expires_at > now);
        *next_sweep = now + self.ttl;
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_get_before_expiry() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k".to_string(), 1u32);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&"k".to_string()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_and_is_evicted_on_read() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k".to_string(), 1u32);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get(&"k".to_string()), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_refreshes_expiry() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.insert("k".to_string(), 1u32);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert("k".to_string(), 2u32);
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get(&"k".to_string()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_sweeps_expired_entries_past_threshold() {
        let cache = TtlCache::new(Duration::from_secs(1));
        for i in 0..SWEEP_THRESHOLD {
            cache.insert(i, i);
        }
        assert_eq!(cache.len(), SWEEP_THRESHOLD);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.insert(usize::MAX, 0);

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_runs_at_most_once_per_ttl() {
        let cache = TtlCache::new(Duration::from_secs(10));
        for i in 0..SWEEP_THRESHOLD - 1 {
            cache.insert(i, i);
        }

        // Everything is still live, so this sweep keeps all entries.
        tokio::time::advance(Duration::from_secs(9)).await;
        cache.insert(10_000, 0);
        cache.insert(10_001, 0);
        assert_eq!(cache.len(), SWEEP_THRESHOLD + 1);

        // The first batch has expired, but the last sweep was under a TTL ago.
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.insert(10_002, 0);
        assert_eq!(cache.len(), SWEEP_THRESHOLD + 2);

        // A TTL after the last sweep, only the entry from the previous step survives.
        tokio::time::advance(Duration::from_secs(7)).await;
        cache.insert(10_003, 0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&10_002), Some(0));
    }

    #[test]
    fn test_missing_key() {
        let cache: TtlCache<String, String> = TtlCache::new(Duration::from_secs(1));
        assert!(cache.get(&"nope".to_string()).is_none());
    }
}
