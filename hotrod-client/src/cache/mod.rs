//! Near-cache configuration and implementation for client-side caching.

mod bloom;
mod near_cache;

pub use bloom::BloomFilter;
pub use near_cache::{NearCache, NearCacheStats};

use crate::config::ConfigError;

/// Default maximum number of near-cache entries.
const DEFAULT_MAX_ENTRIES: u32 = 10_000;
/// Bloom filter bits reserved per expected entry.
const BLOOM_BITS_PER_ENTRY: u32 = 10;
/// Default number of near-cache inserts between bloom filter pushes.
const DEFAULT_BLOOM_UPDATE_THRESHOLD: u32 = 64;

/// Eviction policy for near-cache when max size is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Least Recently Used - evicts entries that haven't been accessed recently.
    #[default]
    Lru,
    /// Least Frequently Used - evicts entries with the lowest access count.
    Lfu,
}

/// Configuration for a near-cache in front of a remote cache.
///
/// Entries are invalidated through a server-side listener. With the bloom
/// filter enabled, the server only sends invalidations for keys the client
/// may hold, and the client pushes its filter after enough local inserts.
#[derive(Debug, Clone)]
pub struct NearCacheConfig {
    name: String,
    max_entries: u32,
    eviction_policy: EvictionPolicy,
    bloom_filter: bool,
    bloom_filter_bits: u32,
    bloom_update_threshold: u32,
}

impl NearCacheConfig {
    /// Creates a new near-cache configuration builder.
    pub fn builder(name: impl Into<String>) -> NearCacheConfigBuilder {
        NearCacheConfigBuilder::new(name)
    }

    /// Returns the cache name pattern.
    ///
    /// The name can be an exact cache name or a pattern ending in `*`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the maximum number of entries.
    pub fn max_entries(&self) -> u32 {
        self.max_entries
    }

    /// Returns the eviction policy used when the cache is full.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.eviction_policy
    }

    /// Returns whether invalidations are filtered by a bloom filter.
    pub fn bloom_filter(&self) -> bool {
        self.bloom_filter
    }

    /// Returns the bloom filter size in bits.
    pub fn bloom_filter_bits(&self) -> u32 {
        self.bloom_filter_bits
    }

    /// Returns how many inserts trigger a bloom filter push.
    pub fn bloom_update_threshold(&self) -> u32 {
        self.bloom_update_threshold
    }

    /// Checks if this configuration applies to the given cache.
    pub fn matches(&self, cache_name: &str) -> bool {
        match self.name.strip_suffix('*') {
            Some(prefix) => cache_name.starts_with(prefix),
            None => self.name == cache_name,
        }
    }
}

/// Builder for `NearCacheConfig`.
#[derive(Debug, Clone)]
pub struct NearCacheConfigBuilder {
    name: String,
    max_entries: Option<u32>,
    eviction_policy: Option<EvictionPolicy>,
    bloom_filter: Option<bool>,
    bloom_update_threshold: Option<u32>,
}

impl NearCacheConfigBuilder {
    /// Creates a new builder with the given cache name pattern.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_entries: None,
            eviction_policy: None,
            bloom_filter: None,
            bloom_update_threshold: None,
        }
    }

    /// Sets the maximum number of entries.
    pub fn max_entries(mut self, max_entries: u32) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Sets the eviction policy.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    /// Enables bloom filter invalidation.
    pub fn bloom_filter(mut self, enabled: bool) -> Self {
        self.bloom_filter = Some(enabled);
        self
    }

    /// Sets how many inserts trigger a bloom filter push.
    pub fn bloom_update_threshold(mut self, inserts: u32) -> Self {
        self.bloom_update_threshold = Some(inserts);
        self
    }

    /// Builds the near-cache configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the name is empty, `max_entries` is zero, or
    /// the update threshold is zero.
    pub fn build(self) -> Result<NearCacheConfig, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::new("near-cache name must not be empty"));
        }

        let max_entries = self.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES);
        if max_entries == 0 {
            return Err(ConfigError::new(
                "near-cache max_entries must be greater than zero",
            ));
        }

        let bloom_update_threshold = self
            .bloom_update_threshold
            .unwrap_or(DEFAULT_BLOOM_UPDATE_THRESHOLD);
        if bloom_update_threshold == 0 {
            return Err(ConfigError::new(
                "bloom_update_threshold must be greater than zero",
            ));
        }

        Ok(NearCacheConfig {
            name: self.name,
            max_entries,
            eviction_policy: self.eviction_policy.unwrap_or_default(),
            bloom_filter: self.bloom_filter.unwrap_or(false),
            bloom_filter_bits: max_entries.saturating_mul(BLOOM_BITS_PER_ENTRY),
            bloom_update_threshold,
        })
    }
}
