//! Near-cache implementation for client-side caching.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;

use super::{BloomFilter, EvictionPolicy, NearCacheConfig};

/// Statistics for near-cache operations.
#[derive(Debug, Clone, Default)]
pub struct NearCacheStats {
    hits: u64,
    misses: u64,
    evictions: u64,
    invalidations: u64,
}

impl NearCacheStats {
    /// Returns the number of cache hits.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Returns the number of cache misses.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Returns the number of entries evicted due to capacity.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Returns the number of entries dropped by remote changes.
    pub fn invalidations(&self) -> u64 {
        self.invalidations
    }

    /// Returns the hit ratio (hits / total lookups).
    ///
    /// Returns `0.0` if no lookups have been performed.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry {
    value: Bytes,
    last_accessed: Instant,
    access_count: u64,
}

impl CacheEntry {
    fn new(value: Bytes, now: Instant) -> Self {
        Self {
            value,
            last_accessed: now,
            access_count: 1,
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}

/// Client-side cache of marshalled entries, kept coherent by invalidation events.
pub struct NearCache {
    config: NearCacheConfig,
    store: HashMap<Bytes, CacheEntry>,
    stats: NearCacheStats,
    bloom: Option<BloomFilter>,
    inserts_since_push: u32,
}

impl std::fmt::Debug for NearCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCache")
            .field("config", &self.config)
            .field("store_size", &self.store.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl NearCache {
    /// Creates a near-cache with the given configuration.
    pub fn new(config: NearCacheConfig) -> Self {
        let bloom = config
            .bloom_filter()
            .then(|| BloomFilter::new(config.bloom_filter_bits()));
        Self {
            config,
            store: HashMap::new(),
            stats: NearCacheStats::default(),
            bloom,
            inserts_since_push: 0,
        }
    }

    /// Returns the cached value, if present.
    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        match self.store.get_mut(key) {
            Some(entry) => {
                entry.touch(Instant::now());
                self.stats.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Caches a value read from the server, evicting one entry when full.
    pub fn put(&mut self, key: Bytes, value: Bytes) {
        if !self.store.contains_key(&key) && self.store.len() >= self.config.max_entries() as usize {
            self.evict_one();
        }
        if let Some(bloom) = &mut self.bloom {
            bloom.add(&key);
        }
        self.store.insert(key, CacheEntry::new(value, Instant::now()));
        self.inserts_since_push += 1;
    }

    /// Drops a key after a local write or a remote change event.
    pub fn invalidate(&mut self, key: &[u8]) {
        if self.store.remove(key).is_some() {
            self.stats.invalidations += 1;
        }
    }

    /// Removes all entries from the cache.
    pub fn clear(&mut self) {
        self.store.clear();
        if let Some(bloom) = &mut self.bloom {
            bloom.clear();
        }
    }

    /// Returns the number of entries in the cache.
    pub fn size(&self) -> usize {
        self.store.len()
    }

    /// Returns a copy of the current statistics.
    pub fn stats(&self) -> NearCacheStats {
        self.stats.clone()
    }

    /// Returns a reference to the cache configuration.
    pub fn config(&self) -> &NearCacheConfig {
        &self.config
    }

    /// Returns the current bloom filter bitmap once enough inserts happened.
    ///
    /// The filter is rebuilt from the cached keys first, so keys that were
    /// evicted or invalidated since the last push drop out of it.
    pub fn take_bloom_update(&mut self) -> Option<Vec<u8>> {
        if self.inserts_since_push < self.config.bloom_update_threshold() {
            return None;
        }
        let bloom = self.bloom.as_mut()?;
        bloom.clear();
        for key in self.store.keys() {
            bloom.add(key);
        }
        self.inserts_since_push = 0;
        Some(bloom.to_bytes())
    }

    /// Current bloom filter bitmap, if the filter is enabled.
    pub fn bloom_bitmap(&self) -> Option<Vec<u8>> {
        self.bloom.as_ref().map(BloomFilter::to_bytes)
    }

    fn evict_one(&mut self) {
        let victim = match self.config.eviction_policy() {
            EvictionPolicy::Lru => self
                .store
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Lfu => self
                .store
                .iter()
                .min_by_key(|(_, e)| e.access_count)
                .map(|(k, _)| k.clone()),
        };
        if let Some(key) = victim {
            self.store.remove(&key);
            self.stats.evictions += 1;
        }
    }
}
