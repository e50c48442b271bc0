//! Channel lookup, topology tracking and cluster switching.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use hotrod_core::protocol::{TopologyUpdate, DEFAULT_CACHE_TOPOLOGY, SWITCH_CLUSTER_TOPOLOGY};
use hotrod_core::{ClientTopology, HotRodError, Result, SegmentConsistentHash};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::instrument;

use super::balancer::{balancer_for, FailoverRequestBalancer};
use super::channel::{Channel, ChannelId, ChannelNotice, ChannelOptions};
use super::topology::{TopologyInfo, DEFAULT_CLUSTER_NAME};
use crate::config::ClientConfig;

/// Events emitted during channel lifecycle.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connected to a server.
    Connected {
        /// The channel identifier.
        id: ChannelId,
        /// The server address.
        address: SocketAddr,
    },
    /// A channel to a server closed.
    Disconnected {
        /// The channel identifier.
        id: ChannelId,
        /// The server address.
        address: SocketAddr,
    },
    /// Connecting to a server failed.
    ConnectFailed {
        /// The server address.
        address: SocketAddr,
        /// The connection error.
        error: String,
    },
    /// A cache moved to a new topology.
    TopologyChanged {
        /// Cache name, empty for the default cache.
        cache_name: String,
        /// The new topology id.
        topology_id: i32,
    },
    /// The client moved to another cluster.
    ClusterSwitched {
        /// Name of the cluster now in use.
        cluster: String,
    },
}

/// Where a request should go.
#[derive(Debug, Clone, Copy)]
pub enum ChannelTarget<'a> {
    /// The primary owner of this key, if known and not failed.
    Key(&'a [u8]),
    /// This exact server.
    Address(SocketAddr),
    /// Any server chosen by the balancer.
    Any,
}

/// Source of channels for the operation engine.
#[async_trait]
pub trait ChannelFactory: Send + Sync + std::fmt::Debug {
    /// Picks the server for a request, skipping `failed` servers.
    fn select_server(
        &self,
        target: ChannelTarget<'_>,
        failed: Option<&HashSet<SocketAddr>>,
        cache_name: &[u8],
    ) -> Result<SocketAddr>;

    /// Returns an active channel to `address`, connecting if needed.
    async fn channel_for(&self, address: SocketAddr) -> Result<Arc<Channel>>;

    /// Picks a server and returns a channel to it.
    async fn fetch_channel(
        &self,
        target: ChannelTarget<'_>,
        failed: Option<&HashSet<SocketAddr>>,
        cache_name: &[u8],
    ) -> Result<Arc<Channel>> {
        let address = self.select_server(target, failed, cache_name)?;
        self.channel_for(address).await
    }

    /// Hands a channel back after one attempt.
    fn release_channel(&self, channel: &Arc<Channel>);

    /// Number of cluster switches so far.
    fn topology_age(&self) -> i32;

    /// Retry budget of one operation.
    fn max_retries(&self) -> u32;

    /// How long an operation waits for its response.
    fn socket_timeout(&self) -> Duration;

    /// Shared, atomically replaced topology of a cache.
    fn client_topology(&self, cache_name: &[u8]) -> Arc<ArcSwap<ClientTopology>>;

    /// Servers currently used for a cache.
    fn servers(&self, cache_name: &[u8]) -> Vec<SocketAddr>;

    /// Primary owner of a key, when segment ownership is known.
    fn primary_owner(&self, cache_name: &[u8], key: &[u8]) -> Option<SocketAddr>;

    /// Segment of a key and the segment count, when segment ownership is known.
    fn segment_of(&self, cache_name: &[u8], key: &[u8]) -> Option<(usize, usize)>;
}

/// Prepares a freshly connected channel, for example by authenticating.
#[async_trait]
pub trait ChannelInitializer: Send + Sync + std::fmt::Debug {
    /// Runs before the channel is handed to any operation.
    async fn initialize(&self, channel: &Arc<Channel>) -> Result<()>;
}

/// [`ChannelFactory`] over plain TCP channels, one per server.
#[derive(Debug)]
pub struct TcpChannelFactory {
    config: Arc<ClientConfig>,
    options: ChannelOptions,
    channels: Mutex<HashMap<SocketAddr, Arc<Channel>>>,
    connect_locks: Mutex<HashMap<SocketAddr, Arc<tokio::sync::Mutex<()>>>>,
    topology: RwLock<TopologyInfo>,
    client_topologies: Mutex<HashMap<Bytes, Arc<ArcSwap<ClientTopology>>>>,
    connection_failed: Mutex<HashSet<SocketAddr>>,
    balancer: Arc<dyn FailoverRequestBalancer>,
    initializer: OnceLock<Arc<dyn ChannelInitializer>>,
    notices: mpsc::UnboundedSender<ChannelNotice>,
    event_sender: broadcast::Sender<ConnectionEvent>,
    shutdown: AtomicBool,
}

impl TcpChannelFactory {
    /// Creates a factory for the configured servers.
    pub(crate) fn new(config: Arc<ClientConfig>, notices: mpsc::UnboundedSender<ChannelNotice>) -> Self {
        let (event_sender, _) = broadcast::channel(64);
        let network = config.network();
        let options = ChannelOptions {
            connect_timeout: network.connect_timeout(),
            tcp_no_delay: network.tcp_no_delay(),
            tcp_keep_alive: network.tcp_keep_alive(),
        };
        let topology = TopologyInfo::new(DEFAULT_CLUSTER_NAME, network.servers().to_vec());

        Self {
            balancer: balancer_for(config.balancing_strategy()),
            config,
            options,
            channels: Mutex::new(HashMap::new()),
            connect_locks: Mutex::new(HashMap::new()),
            topology: RwLock::new(topology),
            client_topologies: Mutex::new(HashMap::new()),
            connection_failed: Mutex::new(HashSet::new()),
            initializer: OnceLock::new(),
            notices,
            event_sender,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Installs the hook run on every new channel. Only the first call has an effect.
    pub(crate) fn set_initializer(&self, initializer: Arc<dyn ChannelInitializer>) {
        let _ = self.initializer.set(initializer);
    }

    /// Subscribes to channel lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_sender.subscribe()
    }

    /// Name of the cluster currently in use.
    pub fn current_cluster_name(&self) -> String {
        self.topology.read().cluster_name().to_string()
    }

    /// Every server known to any cache.
    pub fn all_servers(&self) -> Vec<SocketAddr> {
        self.topology.read().all_servers()
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().values().filter(|c| c.is_active()).count()
    }

    /// Servers of a configured cluster, including the default one.
    pub fn cluster_servers(&self, cluster_name: &str) -> Option<Vec<SocketAddr>> {
        if cluster_name == DEFAULT_CLUSTER_NAME {
            return Some(self.config.network().servers().to_vec());
        }
        self.config
            .network()
            .clusters()
            .iter()
            .find(|c| c.name() == cluster_name)
            .map(|c| c.servers().to_vec())
    }

    /// Names of the clusters the client may switch to from `current`.
    pub fn alternate_clusters(&self, current: &str) -> Vec<String> {
        std::iter::once(DEFAULT_CLUSTER_NAME.to_string())
            .chain(self.config.network().clusters().iter().map(|c| c.name().to_string()))
            .filter(|name| name != current)
            .collect()
    }

    fn client_topology_ref(&self, cache_name: &[u8]) -> Arc<ArcSwap<ClientTopology>> {
        let mut topologies = self.client_topologies.lock();
        if let Some(existing) = topologies.get(cache_name) {
            return Arc::clone(existing);
        }
        let topology_id = self.topology.read().topology_id(cache_name);
        let created = Arc::new(ArcSwap::from_pointee(ClientTopology::new(
            topology_id,
            self.config.intelligence(),
        )));
        topologies.insert(Bytes::copy_from_slice(cache_name), Arc::clone(&created));
        created
    }

    fn publish_topology_id(&self, cache_name: &[u8], topology_id: i32) {
        let swap = self.client_topology_ref(cache_name);
        swap.store(Arc::new(swap.load().with_topology_id(topology_id)));
    }

    fn close_servers(&self, servers: &[SocketAddr]) {
        let closed: Vec<Arc<Channel>> = {
            let mut channels = self.channels.lock();
            servers.iter().filter_map(|s| channels.remove(s)).collect()
        };
        for channel in closed {
            tracing::debug!(address = %channel.address(), "removing server");
            channel.close();
        }
    }

    /// Applies a topology that arrived with a response.
    ///
    /// Server names are resolved here; servers that do not resolve are left out.
    #[instrument(
        name = "channel_factory.receive_topology",
        skip(self, update),
        fields(
            cache = %String::from_utf8_lossy(cache_name),
            topology_id = update.topology_id,
            topology_age = topology_age
        )
    )]
    pub(crate) async fn receive_topology(
        &self,
        cache_name: &[u8],
        topology_age: i32,
        update: TopologyUpdate,
    ) {
        let mut resolved = Vec::with_capacity(update.servers.len());
        for (host, port) in &update.servers {
            match tokio::net::lookup_host((host.as_str(), *port)).await {
                Ok(mut addrs) => resolved.push(addrs.next()),
                Err(e) => {
                    tracing::warn!(host = %host, port, error = %e, "cannot resolve server from topology");
                    resolved.push(None);
                }
            }
        }
        let servers: Vec<SocketAddr> = resolved.iter().flatten().copied().collect();
        if servers.is_empty() {
            tracing::warn!("topology update without reachable servers ignored");
            return;
        }

        let consistent_hash = update
            .hash
            .as_ref()
            .filter(|h| h.hash_function_version > 0 && !h.segment_owners.is_empty())
            .and_then(|h| {
                let owners = h
                    .segment_owners
                    .iter()
                    .map(|segment| {
                        segment
                            .iter()
                            .filter_map(|index| resolved.get(*index as usize).copied().flatten())
                            .collect()
                    })
                    .collect();
                SegmentConsistentHash::new(owners).ok()
            });

        let change = self.topology.write().update(
            cache_name,
            topology_age,
            update.topology_id,
            servers,
            consistent_hash,
        );
        let Some(change) = change else {
            return;
        };

        self.publish_topology_id(cache_name, update.topology_id);
        for server in &change.added {
            tracing::info!(address = %server, "new server added");
        }
        let still_used: HashSet<SocketAddr> = self.topology.read().all_servers().into_iter().collect();
        let removed: Vec<SocketAddr> = change
            .removed
            .into_iter()
            .filter(|s| !still_used.contains(s))
            .collect();
        self.close_servers(&removed);

        let _ = self.event_sender.send(ConnectionEvent::TopologyChanged {
            cache_name: String::from_utf8_lossy(cache_name).into_owned(),
            topology_id: update.topology_id,
        });
    }

    /// Reverts a cache to the initial server list.
    pub fn reset(&self, cache_name: &[u8]) {
        self.topology.write().reset(cache_name);
        self.publish_topology_id(cache_name, DEFAULT_CACHE_TOPOLOGY);
    }

    fn handle_connection_failure(&self, address: SocketAddr, error: &HotRodError) {
        let _ = self.event_sender.send(ConnectionEvent::ConnectFailed {
            address,
            error: error.to_string(),
        });

        let failed = {
            let mut failed = self.connection_failed.lock();
            failed.insert(address);
            failed.clone()
        };
        let (all_initial_failed, cluster, age, failed_caches) = {
            let topology = self.topology.read();
            (
                topology.initial_servers().iter().all(|s| failed.contains(s)),
                topology.cluster_name().to_string(),
                topology.topology_age(),
                topology.caches_with_failed_servers(&failed),
            )
        };
        let has_clusters = !self.config.network().clusters().is_empty();

        if !all_initial_failed || !has_clusters {
            for cache_name in failed_caches {
                tracing::warn!(
                    cache = %String::from_utf8_lossy(&cache_name),
                    "all servers failed, reverting cache to the initial server list"
                );
                self.reset(&cache_name);
            }
        }
        if all_initial_failed && has_clusters {
            let _ = self.notices.send(ChannelNotice::ClusterUnreachable {
                cluster,
                topology_age: age,
            });
        }
    }

    /// Moves to `cluster_name` if no switch happened since `expected_age`.
    ///
    /// Returns `false` when the cluster is unknown or another switch won.
    #[instrument(name = "channel_factory.switch_cluster", skip(self))]
    pub fn switch_cluster(&self, cluster_name: &str, expected_age: Option<i32>) -> bool {
        let Some(servers) = self.cluster_servers(cluster_name) else {
            tracing::warn!("unknown cluster");
            return false;
        };

        let removed = {
            let mut topology = self.topology.write();
            if expected_age.is_some_and(|age| age != topology.topology_age()) {
                tracing::debug!("cluster already switched");
                return false;
            }
            topology.switch_cluster(cluster_name, servers)
        };

        let caches: Vec<Bytes> = self.client_topologies.lock().keys().cloned().collect();
        for cache_name in caches {
            self.publish_topology_id(&cache_name, SWITCH_CLUSTER_TOPOLOGY);
        }
        self.connection_failed.lock().clear();
        self.close_servers(&removed);

        tracing::info!(cluster = %cluster_name, "switched cluster");
        let _ = self.event_sender.send(ConnectionEvent::ClusterSwitched {
            cluster: cluster_name.to_string(),
        });
        true
    }

    /// Forgets a channel whose reader stopped.
    pub(crate) fn channel_closed(&self, address: SocketAddr, id: ChannelId) {
        let mut channels = self.channels.lock();
        if channels.get(&address).is_some_and(|c| c.id() == id) {
            channels.remove(&address);
        }
        drop(channels);
        let _ = self.event_sender.send(ConnectionEvent::Disconnected { id, address });
    }

    /// Returns `true` once [`TcpChannelFactory::shutdown`] was called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Closes every channel; later fetches fail.
    #[instrument(name = "channel_factory.shutdown", skip(self))]
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let channels: Vec<Arc<Channel>> = self.channels.lock().drain().map(|(_, c)| c).collect();
        tracing::debug!(channel_count = channels.len(), "closing all channels");
        for channel in channels {
            channel.close();
        }
    }

    async fn connect(&self, address: SocketAddr) -> Result<Arc<Channel>> {
        let channel = Channel::connect(address, self.options, self.notices.clone()).await?;
        if let Some(initializer) = self.initializer.get() {
            if let Err(e) = initializer.initialize(&channel).await {
                channel.close();
                return Err(e);
            }
        }
        Ok(channel)
    }
}

#[async_trait]
impl ChannelFactory for TcpChannelFactory {
    fn select_server(
        &self,
        target: ChannelTarget<'_>,
        failed: Option<&HashSet<SocketAddr>>,
        cache_name: &[u8],
    ) -> Result<SocketAddr> {
        let topology = self.topology.read();
        let owner = match target {
            ChannelTarget::Address(address) => return Ok(address),
            ChannelTarget::Key(key) => topology
                .primary_owner(cache_name, key)
                .filter(|owner| !failed.is_some_and(|f| f.contains(owner))),
            ChannelTarget::Any => None,
        };
        if let Some(owner) = owner {
            return Ok(owner);
        }

        let servers = topology.servers(cache_name);
        self.balancer.next_server(&servers, failed).ok_or_else(|| {
            HotRodError::NoAvailableServers(format!(
                "all {} servers of cache '{}' have failed",
                servers.len(),
                String::from_utf8_lossy(cache_name)
            ))
        })
    }

    #[instrument(name = "channel_factory.channel_for", skip(self), fields(address = %address))]
    async fn channel_for(&self, address: SocketAddr) -> Result<Arc<Channel>> {
        if self.is_shutdown() {
            return Err(HotRodError::ChannelInactive("client is shut down".to_string()));
        }
        if let Some(channel) = self.channels.lock().get(&address).filter(|c| c.is_active()) {
            return Ok(Arc::clone(channel));
        }

        let lock = Arc::clone(
            self.connect_locks
                .lock()
                .entry(address)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );
        let _guard = lock.lock().await;
        if let Some(channel) = self.channels.lock().get(&address).filter(|c| c.is_active()) {
            return Ok(Arc::clone(channel));
        }

        match self.connect(address).await {
            Ok(channel) => {
                self.connection_failed.lock().remove(&address);
                self.channels.lock().insert(address, Arc::clone(&channel));
                let _ = self.event_sender.send(ConnectionEvent::Connected {
                    id: channel.id(),
                    address,
                });
                tracing::info!(id = %channel.id(), "connected to server");
                Ok(channel)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to connect");
                self.handle_connection_failure(address, &e);
                Err(e)
            }
        }
    }

    fn release_channel(&self, channel: &Arc<Channel>) {
        tracing::trace!(id = %channel.id(), in_flight = channel.in_flight(), "releasing channel");
        if !channel.is_active() {
            let mut channels = self.channels.lock();
            if channels.get(&channel.address()).is_some_and(|c| c.id() == channel.id()) {
                channels.remove(&channel.address());
            }
        }
    }

    fn topology_age(&self) -> i32 {
        self.topology.read().topology_age()
    }

    fn max_retries(&self) -> u32 {
        self.config.max_retries()
    }

    fn socket_timeout(&self) -> Duration {
        self.config.network().socket_timeout()
    }

    fn client_topology(&self, cache_name: &[u8]) -> Arc<ArcSwap<ClientTopology>> {
        self.client_topology_ref(cache_name)
    }

    fn servers(&self, cache_name: &[u8]) -> Vec<SocketAddr> {
        self.topology.read().servers(cache_name)
    }

    fn primary_owner(&self, cache_name: &[u8], key: &[u8]) -> Option<SocketAddr> {
        self.topology.read().primary_owner(cache_name, key)
    }

    fn segment_of(&self, cache_name: &[u8], key: &[u8]) -> Option<(usize, usize)> {
        let topology = self.topology.read();
        let hash = topology.cache(cache_name)?.consistent_hash()?;
        Some((hash.segment(key), hash.num_segments()))
    }
}
