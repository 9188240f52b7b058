//! Core cache storage with per-entry TTL and insertion-order eviction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::stats::{CacheStats, MetricsCollector};
use crate::clock::{Clock, SystemClock};

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<V> {
    /// Entry exists and is within its TTL.
    Hit(V),
    /// Entry is past its TTL but inside the stale window; the caller is
    /// responsible for refreshing it.
    Stale(V),
    /// Nothing servable for this key.
    Miss,
}

#[derive(Debug, Clone)]
struct StoredEntry<V> {
    value: V,
    created_at: Instant,
    /// Wall-clock twin of `created_at`, reported in stats.
    created_wall: SystemTime,
    ttl: Duration,
    size_bytes: usize,
    hit_count: u64,
}

#[derive(Debug)]
struct StoreInner<V> {
    entries: HashMap<String, StoredEntry<V>>,
    /// Keys in insertion order; the front is the eviction candidate.
    /// Re-inserting an existing key moves it to the back.
    insertion_order: Vec<String>,
}

/// Bounded key-value store with per-entry TTL, insertion-order eviction,
/// an optional stale-while-revalidate window, and substring invalidation.
///
/// Clones share the same underlying storage. All operations take a single
/// short-lived lock; the store never blocks on I/O or timers.
#[derive(Debug)]
pub struct CacheStore<V, C: Clock = SystemClock> {
    inner: Arc<RwLock<StoreInner<V>>>,
    metrics: Arc<MetricsCollector>,
    max_entries: usize,
    stale_window: Option<Duration>,
    clock: C,
}

impl<V, C: Clock> Clone for CacheStore<V, C>
where
    C: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            metrics: Arc::clone(&self.metrics),
            max_entries: self.max_entries,
            stale_window: self.stale_window,
            clock: self.clock.clone(),
        }
    }
}

impl<V: Clone> CacheStore<V, SystemClock> {
    /// Create a store with the given capacity and stale window.
    pub fn new(max_entries: usize, stale_window: Option<Duration>) -> Self {
        Self::with_clock(max_entries, stale_window, SystemClock)
    }
}

impl<V: Clone, C: Clock> CacheStore<V, C> {
    /// Create a store driven by a caller-supplied clock.
    pub fn with_clock(max_entries: usize, stale_window: Option<Duration>, clock: C) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                entries: HashMap::new(),
                insertion_order: Vec::new(),
            })),
            metrics: Arc::new(MetricsCollector::default()),
            max_entries: max_entries.max(1),
            stale_window,
            clock,
        }
    }

    /// Insert a value with its own TTL.
    ///
    /// If the store is full and `key` is not already present, the oldest
    /// entry by insertion order is evicted first. Re-inserting an existing
    /// key replaces its value, restarts its TTL, and moves it to the back
    /// of the eviction order.
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Duration, size_bytes: usize) {
        let key = key.into();
        let now = self.clock.now();
        let now_wall = self.clock.system_time();
        let mut inner = self.inner.write();

        if let Some(position) = inner.insertion_order.iter().position(|k| k == &key) {
            inner.insertion_order.remove(position);
        } else if inner.entries.len() >= self.max_entries && !inner.insertion_order.is_empty() {
            let oldest = inner.insertion_order.remove(0);
            inner.entries.remove(&oldest);
            self.metrics.record_eviction();
            debug!(key = %oldest, "evicted oldest cache entry to make room");
        }

        inner.insertion_order.push(key.clone());
        inner.entries.insert(
            key,
            StoredEntry {
                value,
                created_at: now,
                created_wall: now_wall,
                ttl,
                size_bytes,
                hit_count: 0,
            },
        );
        self.metrics.record_insert();
    }

    /// Look up a key, classifying the entry as fresh, stale, or absent.
    ///
    /// Entries past both their TTL and the stale window are removed on the
    /// spot; expired entries are never returned.
    pub fn get(&self, key: &str) -> CacheLookup<V> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        let Some(entry) = inner.entries.get_mut(key) else {
            self.metrics.record_miss();
            return CacheLookup::Miss;
        };

        let age = now.saturating_duration_since(entry.created_at);
        if age <= entry.ttl {
            entry.hit_count += 1;
            self.metrics.record_hit();
            return CacheLookup::Hit(entry.value.clone());
        }

        let within_stale_window = self
            .stale_window
            .is_some_and(|window| age <= entry.ttl + window);
        if within_stale_window {
            entry.hit_count += 1;
            self.metrics.record_stale_hit();
            return CacheLookup::Stale(entry.value.clone());
        }

        inner.entries.remove(key);
        inner.insertion_order.retain(|k| k != key);
        self.metrics.record_expiration();
        self.metrics.record_miss();
        CacheLookup::Miss
    }

    /// Remove a single entry. Returns true if it existed.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.insertion_order.retain(|k| k != key);
        }
        removed
    }

    /// Remove every entry whose key contains `pattern`, returning the
    /// number removed. An empty pattern clears the whole store.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut inner = self.inner.write();
        let StoreInner { entries, insertion_order } = &mut *inner;
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        let removed = before - entries.len();
        if removed > 0 {
            insertion_order.retain(|key| entries.contains_key(key));
            debug!(pattern, removed, "invalidated cache entries");
        }
        removed
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.insertion_order.clear();
    }

    /// Number of entries currently stored, including expired ones that
    /// have not been touched since expiry.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Snapshot of cache counters and current occupancy.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        let approx_bytes = inner.entries.values().map(|e| e.size_bytes as u64).sum();
        let oldest = inner
            .entries
            .values()
            .map(|e| e.created_wall)
            .min()
            .map(DateTime::<Utc>::from);
        let newest = inner
            .entries
            .values()
            .map(|e| e.created_wall)
            .max()
            .map(DateTime::<Utc>::from);
        self.metrics.snapshot(inner.entries.len(), self.max_entries, approx_bytes, oldest, newest)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::clock::MockClock;

    const TTL: Duration = Duration::from_secs(60);

    fn mock_store(max_entries: usize, stale: Option<Duration>) -> (CacheStore<String, MockClock>, MockClock) {
        let clock = MockClock::new();
        let store = CacheStore::with_clock(max_entries, stale, clock.clone());
        (store, clock)
    }

    #[test]
    fn get_returns_fresh_entry_until_ttl_elapses() {
        let (store, clock) = mock_store(8, None);
        store.insert("k", "v".to_string(), TTL, 1);

        clock.advance(TTL); // age == ttl is still fresh
        assert_eq!(store.get("k"), CacheLookup::Hit("v".to_string()));

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("k"), CacheLookup::Miss);
        assert_eq!(store.len(), 0, "expired entry is removed on lookup");
    }

    #[test]
    fn stale_window_serves_expired_entries_until_it_closes() {
        let (store, clock) = mock_store(8, Some(Duration::from_secs(30)));
        store.insert("k", "v".to_string(), TTL, 1);

        clock.advance(TTL + Duration::from_secs(10));
        assert_eq!(store.get("k"), CacheLookup::Stale("v".to_string()));

        clock.advance(Duration::from_secs(21));
        assert_eq!(store.get("k"), CacheLookup::Miss);
    }

    #[test]
    fn evicts_oldest_by_insertion_order_when_full() {
        let (store, _clock) = mock_store(2, None);
        store.insert("a", "1".to_string(), TTL, 1);
        store.insert("b", "2".to_string(), TTL, 1);
        store.insert("c", "3".to_string(), TTL, 1);

        assert_eq!(store.get("a"), CacheLookup::Miss);
        assert_eq!(store.get("b"), CacheLookup::Hit("2".to_string()));
        assert_eq!(store.get("c"), CacheLookup::Hit("3".to_string()));
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn reinsert_refreshes_ttl_and_eviction_position() {
        let (store, clock) = mock_store(2, None);
        store.insert("a", "1".to_string(), TTL, 1);
        store.insert("b", "2".to_string(), TTL, 1);

        clock.advance(Duration::from_secs(50));
        store.insert("a", "1b".to_string(), TTL, 1); // "a" is now the newest

        store.insert("c", "3".to_string(), TTL, 1); // evicts "b", not "a"
        assert_eq!(store.get("b"), CacheLookup::Miss);
        assert_eq!(store.get("a"), CacheLookup::Hit("1b".to_string()));

        clock.advance(Duration::from_secs(55)); // 105s after first insert, 55s after refresh
        assert_eq!(store.get("a"), CacheLookup::Hit("1b".to_string()));
    }

    #[test]
    fn reinsert_at_capacity_does_not_evict() {
        let (store, _clock) = mock_store(2, None);
        store.insert("a", "1".to_string(), TTL, 1);
        store.insert("b", "2".to_string(), TTL, 1);
        store.insert("b", "2b".to_string(), TTL, 1);

        assert_eq!(store.len(), 2);
        assert_eq!(store.stats().evictions, 0);
        assert_eq!(store.get("a"), CacheLookup::Hit("1".to_string()));
    }

    #[test]
    fn invalidate_removes_keys_by_substring() {
        let (store, _clock) = mock_store(8, None);
        store.insert("GET /v1/flood/123", "a".to_string(), TTL, 1);
        store.insert("GET /v1/flood/456", "b".to_string(), TTL, 1);
        store.insert("GET /v1/wildfire/123", "c".to_string(), TTL, 1);

        assert_eq!(store.invalidate("/flood/"), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("GET /v1/wildfire/123"), CacheLookup::Hit("c".to_string()));

        // empty pattern matches every key
        assert_eq!(store.invalidate(""), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn stats_track_lookups_sizes_and_occupancy() {
        let (store, clock) = mock_store(4, None);
        store.insert("a", "1".to_string(), TTL, 100);
        store.insert("b", "2".to_string(), TTL, 50);

        store.get("a");
        store.get("missing");
        clock.advance(TTL + Duration::from_secs(1));
        store.get("b"); // expired

        let stats = store.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_entries, 4);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.inserts, 2);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.approx_bytes, 100);
        // only "a" survives, inserted at the mock epoch
        assert!(stats.oldest_entry.is_some());
        assert_eq!(stats.oldest_entry, stats.newest_entry);
    }

    #[test]
    fn capacity_is_clamped_to_at_least_one() {
        let store: CacheStore<String> = CacheStore::new(0, None);
        store.insert("a", "1".to_string(), TTL, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_access_does_not_lose_entries() {
        let store: CacheStore<u32> = CacheStore::new(1024, None);
        let mut handles = Vec::new();

        for t in 0..4 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("t{t}-{i}");
                    store.insert(key.clone(), i, TTL, 4);
                    assert_eq!(store.get(&key), CacheLookup::Hit(i));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }

        assert_eq!(store.len(), 400);
    }
}
