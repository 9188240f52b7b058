//! Cache statistics collection.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time snapshot of cache activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently stored.
    pub size: usize,
    /// Configured capacity.
    pub max_entries: usize,
    /// Lookups answered with a fresh entry.
    pub hits: u64,
    /// Lookups answered with an entry inside its stale window.
    pub stale_hits: u64,
    /// Lookups that found nothing servable.
    pub misses: u64,
    /// Entries written.
    pub inserts: u64,
    /// Entries removed to make room for new ones.
    pub evictions: u64,
    /// Entries removed because their lifetime ran out.
    pub expirations: u64,
    /// Approximate bytes held, summed from caller-reported entry sizes.
    pub approx_bytes: u64,
    /// Wall-clock insert time of the oldest resident entry.
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Wall-clock insert time of the newest resident entry.
    pub newest_entry: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// Fraction of lookups served from the cache (fresh or stale).
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

/// Lock-free counters updated on the hot path; snapshotted on demand.
#[derive(Debug, Default)]
pub(crate) struct MetricsCollector {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl MetricsCollector {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        size: usize,
        max_entries: usize,
        approx_bytes: u64,
        oldest_entry: Option<DateTime<Utc>>,
        newest_entry: Option<DateTime<Utc>>,
    ) -> CacheStats {
        CacheStats {
            size,
            max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            approx_bytes,
            oldest_entry,
            newest_entry,
        }
    }
}
