//! Client-side operation counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters shared by every cache handle of one client.
#[derive(Debug)]
pub struct ClientStatistics {
    remote_hits: AtomicU64,
    remote_misses: AtomicU64,
    remote_stores: AtomicU64,
    remote_removes: AtomicU64,
    retries: AtomicU64,
    near_cache_hits: AtomicU64,
    near_cache_misses: AtomicU64,
    near_cache_invalidations: AtomicU64,
    listener_events: AtomicU64,
    started_at: Instant,
}

impl Default for ClientStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientStatistics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self {
            remote_hits: AtomicU64::new(0),
            remote_misses: AtomicU64::new(0),
            remote_stores: AtomicU64::new(0),
            remote_removes: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            near_cache_hits: AtomicU64::new(0),
            near_cache_misses: AtomicU64::new(0),
            near_cache_invalidations: AtomicU64::new(0),
            listener_events: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub(crate) fn record_remote_hit(&self) {
        self.remote_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remote_miss(&self) {
        self.remote_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remote_stores(&self, count: u64) {
        self.remote_stores.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_remote_remove(&self) {
        self.remote_removes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_near_cache_hit(&self) {
        self.near_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_near_cache_miss(&self) {
        self.near_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_near_cache_invalidation(&self) {
        self.near_cache_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_listener_event(&self) {
        self.listener_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads that found a value on the server.
    pub fn remote_hits(&self) -> u64 {
        self.remote_hits.load(Ordering::Relaxed)
    }

    /// Reads that found nothing on the server.
    pub fn remote_misses(&self) -> u64 {
        self.remote_misses.load(Ordering::Relaxed)
    }

    /// Entries written to the server.
    pub fn remote_stores(&self) -> u64 {
        self.remote_stores.load(Ordering::Relaxed)
    }

    /// Removals sent to the server.
    pub fn remote_removes(&self) -> u64 {
        self.remote_removes.load(Ordering::Relaxed)
    }

    /// Attempts repeated on another server.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Reads answered by a near cache.
    pub fn near_cache_hits(&self) -> u64 {
        self.near_cache_hits.load(Ordering::Relaxed)
    }

    /// Reads a near cache could not answer.
    pub fn near_cache_misses(&self) -> u64 {
        self.near_cache_misses.load(Ordering::Relaxed)
    }

    /// Near-cache entries dropped after a server event.
    pub fn near_cache_invalidations(&self) -> u64 {
        self.near_cache_invalidations.load(Ordering::Relaxed)
    }

    /// Listener events handed to listeners.
    pub fn listener_events(&self) -> u64 {
        self.listener_events.load(Ordering::Relaxed)
    }

    /// Time since the counters were created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Copies the current values.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            remote_hits: self.remote_hits(),
            remote_misses: self.remote_misses(),
            remote_stores: self.remote_stores(),
            remote_removes: self.remote_removes(),
            retries: self.retries(),
            near_cache_hits: self.near_cache_hits(),
            near_cache_misses: self.near_cache_misses(),
            near_cache_invalidations: self.near_cache_invalidations(),
            listener_events: self.listener_events(),
            uptime: self.uptime(),
        }
    }
}

/// Point-in-time copy of [`ClientStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    /// Reads that found a value on the server.
    pub remote_hits: u64,
    /// Reads that found nothing on the server.
    pub remote_misses: u64,
    /// Entries written to the server.
    pub remote_stores: u64,
    /// Removals sent to the server.
    pub remote_removes: u64,
    /// Attempts repeated on another server.
    pub retries: u64,
    /// Reads answered by a near cache.
    pub near_cache_hits: u64,
    /// Reads a near cache could not answer.
    pub near_cache_misses: u64,
    /// Near-cache entries dropped after a server event.
    pub near_cache_invalidations: u64,
    /// Listener events handed to listeners.
    pub listener_events: u64,
    /// Time since the client started.
    pub uptime: Duration,
}

impl StatisticsSnapshot {
    /// Fraction of remote reads that found a value, `0.0` without reads.
    pub fn remote_hit_ratio(&self) -> f64 {
        let total = self.remote_hits + self.remote_misses;
        if total == 0 {
            0.0
        } else {
            self.remote_hits as f64 / total as f64
        }
    }

    /// Counters by name, as reported next to server statistics.
    pub fn to_map(&self) -> BTreeMap<&'static str, u64> {
        BTreeMap::from([
            ("remoteHits", self.remote_hits),
            ("remoteMisses", self.remote_misses),
            ("remoteStores", self.remote_stores),
            ("remoteRemoves", self.remote_removes),
            ("retries", self.retries),
            ("nearCacheHits", self.near_cache_hits),
            ("nearCacheMisses", self.near_cache_misses),
            ("nearCacheInvalidations", self.near_cache_invalidations),
            ("listenerEvents", self.listener_events),
            ("timeSinceStart", self.uptime.as_secs()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = ClientStatistics::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.remote_hits, 0);
        assert_eq!(snapshot.retries, 0);
        assert_eq!(snapshot.remote_hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_ratio() {
        let stats = ClientStatistics::new();
        stats.record_remote_hit();
        stats.record_remote_hit();
        stats.record_remote_hit();
        stats.record_remote_miss();

        let snapshot = stats.snapshot();
        assert!((snapshot.remote_hit_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_map() {
        let stats = ClientStatistics::new();
        stats.record_remote_stores(3);
        stats.record_retry();

        let map = stats.snapshot().to_map();
        assert_eq!(map["remoteStores"], 3);
        assert_eq!(map["retries"], 1);
    }

    #[test]
    fn test_statistics_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClientStatistics>();
    }
}
