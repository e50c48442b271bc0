//! Per-cache server lists, topology ids and segment ownership.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use bytes::Bytes;
use hotrod_core::protocol::{DEFAULT_CACHE_TOPOLOGY, SWITCH_CLUSTER_TOPOLOGY};
use hotrod_core::SegmentConsistentHash;

/// Name of the cluster built from the top-level server list.
pub const DEFAULT_CLUSTER_NAME: &str = "___DEFAULT-CLUSTER___";

/// What a cache currently knows about the cluster.
#[derive(Debug, Clone)]
pub struct CacheTopologyInfo {
    servers: Vec<SocketAddr>,
    topology_id: i32,
    consistent_hash: Option<SegmentConsistentHash>,
}

impl CacheTopologyInfo {
    fn initial(servers: &[SocketAddr], topology_id: i32) -> Self {
        Self {
            servers: servers.to_vec(),
            topology_id,
            consistent_hash: None,
        }
    }

    /// Servers requests for this cache may go to.
    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// Topology id sent with requests for this cache.
    pub fn topology_id(&self) -> i32 {
        self.topology_id
    }

    /// Segment ownership, if the server sent one.
    pub fn consistent_hash(&self) -> Option<&SegmentConsistentHash> {
        self.consistent_hash.as_ref()
    }
}

/// Servers that joined and left with an accepted topology update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyChange {
    /// Servers not known to the cache before.
    pub added: Vec<SocketAddr>,
    /// Servers the cache no longer uses.
    pub removed: Vec<SocketAddr>,
}

/// Topology state of every cache the client has talked to.
///
/// The topology age counts cluster switches. A response that was requested
/// under an older age describes the previous cluster and is ignored.
#[derive(Debug)]
pub struct TopologyInfo {
    cluster_name: String,
    initial_servers: Vec<SocketAddr>,
    caches: HashMap<Bytes, CacheTopologyInfo>,
    topology_age: i32,
}

impl TopologyInfo {
    /// Creates topology state for the given initial cluster.
    pub fn new(cluster_name: impl Into<String>, initial_servers: Vec<SocketAddr>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            initial_servers,
            caches: HashMap::new(),
            topology_age: 0,
        }
    }

    /// Name of the cluster currently in use.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Servers the current cluster was configured with.
    pub fn initial_servers(&self) -> &[SocketAddr] {
        &self.initial_servers
    }

    /// Number of cluster switches so far.
    pub fn topology_age(&self) -> i32 {
        self.topology_age
    }

    /// Returns the cache's info, if a topology was ever recorded for it.
    pub fn cache(&self, cache_name: &[u8]) -> Option<&CacheTopologyInfo> {
        self.caches.get(cache_name)
    }

    /// Servers for `cache_name`, falling back to the initial servers.
    pub fn servers(&self, cache_name: &[u8]) -> Vec<SocketAddr> {
        self.caches
            .get(cache_name)
            .map_or_else(|| self.initial_servers.clone(), |c| c.servers.clone())
    }

    /// Every server known to any cache, plus the initial servers.
    pub fn all_servers(&self) -> Vec<SocketAddr> {
        let mut seen = HashSet::new();
        self.initial_servers
            .iter()
            .chain(self.caches.values().flat_map(|c| c.servers.iter()))
            .filter(|server| seen.insert(**server))
            .copied()
            .collect()
    }

    /// Topology id for requests to `cache_name`.
    pub fn topology_id(&self, cache_name: &[u8]) -> i32 {
        self.caches
            .get(cache_name)
            .map_or(DEFAULT_CACHE_TOPOLOGY, |c| c.topology_id)
    }

    /// Primary owner of `key` in `cache_name`, when segment ownership is known.
    pub fn primary_owner(&self, cache_name: &[u8], key: &[u8]) -> Option<SocketAddr> {
        self.caches
            .get(cache_name)?
            .consistent_hash
            .as_ref()?
            .primary_owner(key)
    }

    /// Applies a topology sent by a server.
    ///
    /// Returns `None` when the update was requested under another topology
    /// age or repeats the topology id already in use.
    pub fn update(
        &mut self,
        cache_name: &[u8],
        topology_age: i32,
        topology_id: i32,
        servers: Vec<SocketAddr>,
        consistent_hash: Option<SegmentConsistentHash>,
    ) -> Option<TopologyChange> {
        if topology_age != self.topology_age {
            tracing::debug!(
                received_age = topology_age,
                current_age = self.topology_age,
                "ignoring topology from a previous cluster"
            );
            return None;
        }
        let current_id = self.topology_id(cache_name);
        if topology_id == current_id {
            tracing::trace!(topology_id, "topology already applied");
            return None;
        }

        let old: HashSet<SocketAddr> = self.servers(cache_name).into_iter().collect();
        let new: HashSet<SocketAddr> = servers.iter().copied().collect();
        let change = TopologyChange {
            added: servers.iter().filter(|s| !old.contains(*s)).copied().collect(),
            removed: old.difference(&new).copied().collect(),
        };

        tracing::debug!(
            cache = %String::from_utf8_lossy(cache_name),
            from = current_id,
            to = topology_id,
            servers = servers.len(),
            added = change.added.len(),
            removed = change.removed.len(),
            "updating cache topology"
        );
        self.caches.insert(
            Bytes::copy_from_slice(cache_name),
            CacheTopologyInfo {
                servers,
                topology_id,
                consistent_hash,
            },
        );
        Some(change)
    }

    /// Reverts a cache to the initial server list.
    pub fn reset(&mut self, cache_name: &[u8]) {
        self.caches.insert(
            Bytes::copy_from_slice(cache_name),
            CacheTopologyInfo::initial(&self.initial_servers, DEFAULT_CACHE_TOPOLOGY),
        );
    }

    /// Caches whose every server has failed and that are not already on the initial list.
    pub fn caches_with_failed_servers(&self, failed: &HashSet<SocketAddr>) -> Vec<Bytes> {
        self.caches
            .iter()
            .filter(|(_, info)| {
                info.servers.iter().all(|s| failed.contains(s)) && info.servers != self.initial_servers
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Moves every cache to another cluster and starts a new topology age.
    ///
    /// Returns the servers that are no longer in use.
    pub fn switch_cluster(&mut self, cluster_name: &str, servers: Vec<SocketAddr>) -> Vec<SocketAddr> {
        let keep: HashSet<SocketAddr> = servers.iter().copied().collect();
        let removed = self
            .all_servers()
            .into_iter()
            .filter(|s| !keep.contains(s))
            .collect();

        self.topology_age += 1;
        self.cluster_name = cluster_name.to_string();
        self.initial_servers = servers;
        for info in self.caches.values_mut() {
            *info = CacheTopologyInfo::initial(&self.initial_servers, SWITCH_CLUSTER_TOPOLOGY);
        }
        removed
    }
}
