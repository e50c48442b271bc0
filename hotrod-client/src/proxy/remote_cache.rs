//! Remote cache proxy.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use hotrod_core::protocol::{ExpirationParams, Flags};
use hotrod_core::Result;
use parking_lot::Mutex;

use super::iterator::{IterationOptions, RemoteEntryIterator};
use crate::cache::NearCache;
use crate::diagnostics::{ClientStatistics, StatisticsSnapshot};
use crate::listener::{ClientEvent, ClientListener, ListenerId, ListenerOptions};
use crate::operations::{
    CacheOperationsFactory, MetadataValue, OperationHandle, PingResponse, WriteOutcome,
};

/// Near cache of one remote cache, kept valid by a server listener.
///
/// `generation` moves on every eviction and is only changed while `cache`
/// is locked, so a remote read that started before an eviction never
/// repopulates the evicted entry.
#[derive(Debug)]
struct NearCacheState {
    cache: Mutex<NearCache>,
    generation: AtomicU64,
    listener_id: Mutex<Option<ListenerId>>,
    statistics: Arc<ClientStatistics>,
}

impl NearCacheState {
    fn new(cache: NearCache, statistics: Arc<ClientStatistics>) -> Self {
        Self {
            cache: Mutex::new(cache),
            generation: AtomicU64::new(0),
            listener_id: Mutex::new(None),
            statistics,
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn evict(&self, key: &[u8]) {
        let mut cache = self.cache.lock();
        cache.invalidate(key);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn invalidate(&self, key: &[u8]) {
        self.evict(key);
        self.statistics.record_near_cache_invalidation();
    }

    fn clear(&self) {
        let mut cache = self.cache.lock();
        cache.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Caches a value read remotely, unless anything was evicted since `seen`.
    fn fill(&self, seen: u64, key: Bytes, value: Bytes) -> bool {
        let mut cache = self.cache.lock();
        if self.generation() != seen {
            return false;
        }
        cache.put(key, value);
        true
    }
}

struct NearCacheInvalidator(Arc<NearCacheState>);

impl ClientListener for NearCacheInvalidator {
    fn on_modified(&self, event: ClientEvent) {
        if let Some(key) = event.key() {
            self.0.invalidate(key);
        }
    }

    fn on_removed(&self, event: ClientEvent) {
        if let Some(key) = event.key() {
            self.0.invalidate(key);
        }
    }

    fn on_expired(&self, event: ClientEvent) {
        if let Some(key) = event.key() {
            self.0.invalidate(key);
        }
    }

    fn on_failover(&self) {
        tracing::debug!("near cache cleared after listener failover");
        self.0.clear();
    }
}

/// Handle to one named cache on the cluster.
///
/// Keys and values are raw bytes. Cloning is cheap; clones share the near
/// cache, if one is configured.
#[derive(Debug, Clone)]
pub struct RemoteCache {
    name: String,
    operations: CacheOperationsFactory,
    flags: Flags,
    expiration: ExpirationParams,
    statistics: Arc<ClientStatistics>,
    near_cache: Option<Arc<NearCacheState>>,
}

impl RemoteCache {
    pub(crate) fn new(name: String, operations: CacheOperationsFactory, statistics: Arc<ClientStatistics>) -> Self {
        Self {
            name,
            operations,
            flags: Flags::NONE,
            expiration: ExpirationParams::default(),
            statistics,
            near_cache: None,
        }
    }

    /// Attaches a near cache and registers the listener invalidating it.
    pub(crate) async fn enable_near_cache(&mut self, near_cache: NearCache) -> Result<()> {
        let bloom_bits = near_cache
            .config()
            .bloom_filter()
            .then(|| near_cache.config().bloom_filter_bits());
        let state = Arc::new(NearCacheState::new(near_cache, Arc::clone(&self.statistics)));
        let invalidator = Arc::new(NearCacheInvalidator(Arc::clone(&state)));
        let listener_id = match bloom_bits {
            Some(bits) => self.operations.add_bloom_listener(invalidator, bits).await?,
            None => {
                self.operations
                    .add_client_listener(invalidator, ListenerOptions::new())
                    .await?
            }
        };
        *state.listener_id.lock() = Some(listener_id);
        tracing::debug!(cache = %self.name, listener_id = %listener_id, bloom = bloom_bits.is_some(), "near cache enabled");
        self.near_cache = Some(state);
        Ok(())
    }

    /// Name of the cache, empty for the default cache.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a handle sending `flags` with every request.
    pub fn with_flags(&self, flags: Flags) -> Self {
        Self {
            flags,
            ..self.clone()
        }
    }

    /// Returns a handle writing entries with `expiration`.
    pub fn with_expiration(&self, expiration: ExpirationParams) -> Self {
        Self {
            expiration,
            ..self.clone()
        }
    }

    /// The operation factory behind this handle.
    pub fn operations(&self) -> &CacheOperationsFactory {
        &self.operations
    }

    /// Number of entries in the near cache, if one is configured.
    pub fn near_cache_size(&self) -> Option<usize> {
        self.near_cache.as_ref().map(|n| n.cache.lock().size())
    }

    fn invalidate_near(&self, key: &[u8]) {
        if let Some(near) = &self.near_cache {
            near.evict(key);
        }
    }

    fn push_bloom_update(&self) {
        let Some(near) = &self.near_cache else {
            return;
        };
        let Some(bitmap) = near.cache.lock().take_bloom_update() else {
            return;
        };
        let Some(listener_id) = *near.listener_id.lock() else {
            return;
        };
        let operations = self.operations.clone();
        tokio::spawn(async move {
            if let Err(e) = operations.update_bloom_filter(listener_id, Bytes::from(bitmap)).await {
                tracing::debug!(listener_id = %listener_id, error = %e, "bloom filter update failed");
            }
        });
    }

    /// Reads a value, answering from the near cache when possible.
    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        let key = key.into();
        let mut seen = 0;
        if let Some(near) = &self.near_cache {
            seen = near.generation();
            if let Some(value) = near.cache.lock().get(&key) {
                self.statistics.record_near_cache_hit();
                return Ok(Some(value));
            }
            self.statistics.record_near_cache_miss();
        }

        let value = self.operations.get(key.clone(), self.flags).execute().await?;
        match &value {
            Some(v) => {
                self.statistics.record_remote_hit();
                if let Some(near) = &self.near_cache {
                    if near.fill(seen, key, v.clone()) {
                        self.push_bloom_update();
                    } else {
                        tracing::trace!(cache = %self.name, "near cache fill skipped after concurrent invalidation");
                    }
                }
            }
            None => self.statistics.record_remote_miss(),
        }
        Ok(value)
    }

    /// Reads a value on a separate task.
    pub fn get_async(&self, key: impl Into<Bytes>) -> OperationHandle<Option<Bytes>> {
        let cache = self.clone();
        let key = key.into();
        OperationHandle::spawn(async move { cache.get(key).await })
    }

    /// Reads a value with its version and expiration metadata.
    pub async fn get_with_metadata(&self, key: impl Into<Bytes>) -> Result<Option<MetadataValue>> {
        let value = self
            .operations
            .get_with_metadata(key.into(), self.flags)
            .execute()
            .await?;
        if value.is_some() {
            self.statistics.record_remote_hit();
        } else {
            self.statistics.record_remote_miss();
        }
        Ok(value)
    }

    /// Checks whether a key exists.
    pub async fn contains_key(&self, key: impl Into<Bytes>) -> Result<bool> {
        self.operations.contains_key(key.into(), self.flags).execute().await
    }

    /// Stores a value. The previous value is returned when
    /// [`Flags::FORCE_RETURN_VALUE`] is set.
    pub async fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<WriteOutcome> {
        let key = key.into();
        self.invalidate_near(&key);
        let outcome = self
            .operations
            .put(key, value.into(), self.expiration, self.flags)
            .execute()
            .await?;
        self.statistics.record_remote_stores(1);
        Ok(outcome)
    }

    /// Stores a value on a separate task.
    pub fn put_async(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> OperationHandle<WriteOutcome> {
        let cache = self.clone();
        let (key, value) = (key.into(), value.into());
        OperationHandle::spawn(async move { cache.put(key, value).await })
    }

    /// Stores a value unless the key exists.
    pub async fn put_if_absent(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<WriteOutcome> {
        let key = key.into();
        self.invalidate_near(&key);
        let outcome = self
            .operations
            .put_if_absent(key, value.into(), self.expiration, self.flags)
            .execute()
            .await?;
        if outcome.is_success() {
            self.statistics.record_remote_stores(1);
        }
        Ok(outcome)
    }

    /// Stores a value only if the key exists.
    pub async fn replace(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<WriteOutcome> {
        let key = key.into();
        self.invalidate_near(&key);
        let outcome = self
            .operations
            .replace(key, value.into(), self.expiration, self.flags)
            .execute()
            .await?;
        if outcome.is_success() {
            self.statistics.record_remote_stores(1);
        }
        Ok(outcome)
    }

    /// Stores a value only if the entry still has `version`.
    pub async fn replace_with_version(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        version: i64,
    ) -> Result<WriteOutcome> {
        let key = key.into();
        self.invalidate_near(&key);
        let outcome = self
            .operations
            .replace_if_unmodified(key, value.into(), version, self.expiration, self.flags)
            .execute()
            .await?;
        if outcome.is_success() {
            self.statistics.record_remote_stores(1);
        }
        Ok(outcome)
    }

    /// Removes a key.
    pub async fn remove(&self, key: impl Into<Bytes>) -> Result<WriteOutcome> {
        let key = key.into();
        self.invalidate_near(&key);
        let outcome = self.operations.remove(key, self.flags).execute().await?;
        self.statistics.record_remote_remove();
        Ok(outcome)
    }

    /// Removes a key only if the entry still has `version`.
    pub async fn remove_with_version(&self, key: impl Into<Bytes>, version: i64) -> Result<WriteOutcome> {
        let key = key.into();
        self.invalidate_near(&key);
        let outcome = self
            .operations
            .remove_if_unmodified(key, version, self.flags)
            .execute()
            .await?;
        if outcome.is_success() {
            self.statistics.record_remote_remove();
        }
        Ok(outcome)
    }

    /// Reads several keys from the servers owning them.
    pub async fn get_all(&self, keys: impl IntoIterator<Item = Bytes>) -> Result<HashMap<Bytes, Bytes>> {
        let keys: Vec<Bytes> = keys.into_iter().collect();
        let requested = keys.len() as u64;
        let entries = self.operations.get_all(keys, self.flags).await?;
        for _ in 0..entries.len() {
            self.statistics.record_remote_hit();
        }
        for _ in entries.len() as u64..requested {
            self.statistics.record_remote_miss();
        }
        Ok(entries)
    }

    /// Stores several entries on the servers owning them.
    pub async fn put_all(&self, entries: impl IntoIterator<Item = (Bytes, Bytes)>) -> Result<()> {
        let entries: Vec<(Bytes, Bytes)> = entries.into_iter().collect();
        for (key, _) in &entries {
            self.invalidate_near(key);
        }
        let count = entries.len() as u64;
        self.operations
            .put_all(entries, self.expiration, self.flags)
            .await?;
        self.statistics.record_remote_stores(count);
        Ok(())
    }

    /// Counts the entries of the cache.
    pub async fn size(&self) -> Result<u64> {
        self.operations.size(self.flags).execute().await
    }

    /// Returns `true` when the cache has no entries.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.size().await? == 0)
    }

    /// Removes every entry.
    pub async fn clear(&self) -> Result<()> {
        if let Some(near) = &self.near_cache {
            near.clear();
        }
        self.operations.clear(self.flags).execute().await
    }

    /// Reads every key of the cache.
    pub async fn key_set(&self) -> Result<HashSet<Bytes>> {
        self.operations.bulk_get_keys(0, self.flags).execute().await
    }

    /// Iterates the entries of the cache on the server.
    pub fn entries(&self, options: IterationOptions) -> RemoteEntryIterator {
        RemoteEntryIterator::new(self.operations.clone(), options)
    }

    /// Registers a listener for entry events.
    pub async fn add_client_listener(
        &self,
        listener: Arc<dyn ClientListener>,
        options: ListenerOptions,
    ) -> Result<ListenerId> {
        self.operations.add_client_listener(listener, options).await
    }

    /// Removes a listener. Unknown ids are ignored.
    pub async fn remove_client_listener(&self, listener_id: ListenerId) -> Result<()> {
        self.operations.remove_client_listener(listener_id).await
    }

    /// Runs a server task with named parameters.
    pub async fn execute(&self, task_name: &str, params: HashMap<String, Bytes>) -> Result<Bytes> {
        self.operations
            .exec(task_name, params.into_iter().collect(), self.flags)
            .execute()
            .await
    }

    /// Checks that a server answers for this cache.
    pub async fn ping(&self) -> Result<PingResponse> {
        self.operations.ping().execute().await
    }

    /// Server-side statistics of the cache.
    pub async fn server_statistics(&self) -> Result<HashMap<String, String>> {
        self.operations.stats().execute().await
    }

    /// Client-side counters, shared by every cache of the client.
    pub fn client_statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    /// Removes the near-cache listener, if any.
    pub(crate) async fn stop(&self) -> Result<()> {
        let listener_id = self
            .near_cache
            .as_ref()
            .and_then(|near| near.listener_id.lock().take());
        match listener_id {
            Some(id) => self.operations.remove_client_listener(id).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NearCacheConfig;
    use crate::operations::test_context;
    use hotrod_core::protocol::{CacheEvent, EventPayload, EventType};

    fn near_state() -> Arc<NearCacheState> {
        let config = NearCacheConfig::builder("books").max_entries(10).build().unwrap();
        Arc::new(NearCacheState::new(NearCache::new(config), Arc::new(ClientStatistics::new())))
    }

    fn event(event_type: EventType, key: &'static [u8]) -> ClientEvent {
        let id = ListenerId::new();
        ClientEvent::from_cache_event(
            id,
            CacheEvent {
                listener_id: id.to_bytes(),
                event_type,
                retried: false,
                payload: EventPayload::Key(Bytes::from_static(key)),
            },
        )
    }

    #[test]
    fn test_invalidator_drops_changed_keys() {
        let state = near_state();
        state.cache.lock().put(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        state.cache.lock().put(Bytes::from_static(b"b"), Bytes::from_static(b"2"));
        let invalidator = NearCacheInvalidator(Arc::clone(&state));

        invalidator.on_modified(event(EventType::Modified, b"a"));
        invalidator.on_created(event(EventType::Created, b"b"));

        assert_eq!(state.cache.lock().size(), 1);
        assert!(state.cache.lock().get(b"b").is_some());
        assert_eq!(state.statistics.near_cache_invalidations(), 1);
    }

    #[test]
    fn test_invalidator_clears_on_failover() {
        let state = near_state();
        state.cache.lock().put(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        NearCacheInvalidator(Arc::clone(&state)).on_failover();
        assert_eq!(state.cache.lock().size(), 0);
    }

    #[test]
    fn test_fill_after_concurrent_invalidation_is_dropped() {
        let state = near_state();
        let seen = state.generation();
        NearCacheInvalidator(Arc::clone(&state)).on_removed(event(EventType::Removed, b"a"));

        assert!(!state.fill(seen, Bytes::from_static(b"a"), Bytes::from_static(b"stale")));
        assert!(state.cache.lock().get(b"a").is_none());

        let seen = state.generation();
        assert!(state.fill(seen, Bytes::from_static(b"a"), Bytes::from_static(b"fresh")));
        assert_eq!(state.cache.lock().get(b"a"), Some(Bytes::from_static(b"fresh")));
    }

    #[test]
    fn test_fill_after_failover_clear_is_dropped() {
        let state = near_state();
        let seen = state.generation();
        NearCacheInvalidator(Arc::clone(&state)).on_failover();
        assert!(!state.fill(seen, Bytes::from_static(b"a"), Bytes::from_static(b"1")));
        assert_eq!(state.cache.lock().size(), 0);
    }

    #[test]
    fn test_handles_share_settings_independently() {
        let statistics = Arc::new(ClientStatistics::new());
        let factory = CacheOperationsFactory::new(test_context(vec!["127.0.0.1:11222".parse().unwrap()]));
        let cache = RemoteCache::new("books".to_string(), factory, statistics);
        let forced = cache.with_flags(Flags::FORCE_RETURN_VALUE);

        assert_eq!(cache.flags, Flags::NONE);
        assert_eq!(forced.flags, Flags::FORCE_RETURN_VALUE);
        assert_eq!(forced.name(), "books");
        assert!(cache.near_cache_size().is_none());
    }
}
