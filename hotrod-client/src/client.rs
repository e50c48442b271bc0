//! Hot Rod client entry point.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use hotrod_core::protocol::{codec_for_version, Codec, MessageIdGenerator};
use hotrod_core::{HotRodError, Result};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::cache::NearCache;
use crate::config::ClientConfig;
use crate::connection::{
    Channel, ChannelFactory, ChannelInitializer, ChannelNotice, ConnectionEvent, TcpChannelFactory,
};
use crate::diagnostics::{ClientStatistics, StatisticsSnapshot};
use crate::listener::ClientListenerNotifier;
use crate::operations::{CacheOperationsFactory, OperationContext};
use crate::proxy::RemoteCache;

/// SASL mechanism supported by the built-in handshake.
const PLAIN_MECHANISM: &str = "PLAIN";

/// Authenticates every new channel with SASL PLAIN.
#[derive(Debug)]
struct PlainAuthenticator {
    operations: CacheOperationsFactory,
    username: String,
    password: String,
}

impl PlainAuthenticator {
    fn initial_response(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.username.len() + self.password.len() + 2);
        buf.put_u8(0);
        buf.put_slice(self.username.as_bytes());
        buf.put_u8(0);
        buf.put_slice(self.password.as_bytes());
        buf.freeze()
    }
}

#[async_trait]
impl ChannelInitializer for PlainAuthenticator {
    #[instrument(name = "auth.plain", skip_all, fields(address = %channel.address()))]
    async fn initialize(&self, channel: &Arc<Channel>) -> Result<()> {
        let mechanisms = self.operations.auth_mech_list().execute_on(channel).await?;
        if !mechanisms.iter().any(|m| m == PLAIN_MECHANISM) {
            return Err(HotRodError::Configuration(format!(
                "server does not offer {PLAIN_MECHANISM}, available: {}",
                mechanisms.join(", ")
            )));
        }

        let (complete, _) = self
            .operations
            .auth(PLAIN_MECHANISM, self.initial_response())
            .execute_on(channel)
            .await?;
        if !complete {
            return Err(HotRodError::Configuration(
                "authentication did not complete in a single round".to_string(),
            ));
        }
        tracing::debug!("channel authenticated");
        Ok(())
    }
}

/// The main entry point for talking to a Hot Rod cluster.
///
/// A manager owns the channels, the topology and the listener registry.
/// Caches obtained from it share all of them.
///
/// # Example
///
/// ```ignore
/// use hotrod_client::{ClientConfig, RemoteCacheManager};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::builder()
///         .add_server("127.0.0.1:11222".parse()?)
///         .build()?;
///
///     let manager = RemoteCacheManager::start(config).await?;
///     let cache = manager.cache("books").await?;
///
///     cache.put("isbn-1", "Dune").await?;
///     let title = cache.get("isbn-1").await?;
///
///     manager.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct RemoteCacheManager {
    config: Arc<ClientConfig>,
    channel_factory: Arc<TcpChannelFactory>,
    base: OperationContext,
    notifier: Arc<ClientListenerNotifier>,
    statistics: Arc<ClientStatistics>,
    caches: Mutex<HashMap<String, RemoteCache>>,
    notice_task: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteCacheManager {
    /// Starts a client and pings the configured servers.
    ///
    /// Unreachable servers do not fail the start; operations find out later.
    ///
    /// # Errors
    ///
    /// Returns an error if the protocol version is not supported.
    #[instrument(name = "manager.start", skip_all, fields(servers = config.network().servers().len()))]
    pub async fn start(config: ClientConfig) -> Result<Self> {
        let config = Arc::new(config);
        let codec: Arc<dyn Codec> = Arc::from(codec_for_version(config.protocol_version())?);
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let channel_factory = Arc::new(TcpChannelFactory::new(Arc::clone(&config), notices));
        let statistics = Arc::new(ClientStatistics::new());
        let notifier = Arc::new(ClientListenerNotifier::new(Arc::clone(&statistics)));

        let factory_dyn: Arc<dyn ChannelFactory> = Arc::clone(&channel_factory) as Arc<dyn ChannelFactory>;
        let base = OperationContext::new(
            factory_dyn,
            codec,
            Arc::clone(&notifier),
            Arc::clone(&config),
            Arc::clone(&statistics),
            Arc::new(MessageIdGenerator::new()),
            Bytes::new(),
        );

        let security = config.security();
        if let (Some(username), Some(password)) = (security.username(), security.password()) {
            channel_factory.set_initializer(Arc::new(PlainAuthenticator {
                operations: CacheOperationsFactory::new(base.clone()),
                username: username.to_string(),
                password: password.to_string(),
            }));
        }

        let notice_task = tokio::spawn(route_notices(
            notice_rx,
            Arc::clone(&channel_factory),
            Arc::clone(&notifier),
            CacheOperationsFactory::new(base.clone()),
        ));

        let manager = Self {
            config,
            channel_factory,
            base,
            notifier,
            statistics,
            caches: Mutex::new(HashMap::new()),
            notice_task: Mutex::new(Some(notice_task)),
        };

        let servers = manager.config.network().servers().to_vec();
        let reachable = ping_servers(&manager.base, &manager.channel_factory, &servers).await;
        tracing::info!(
            reachable,
            configured = servers.len(),
            protocol_version = manager.config.protocol_version(),
            "Hot Rod client started"
        );
        Ok(manager)
    }

    /// Returns a handle to a cache, with a near cache if one is configured for it.
    ///
    /// Handles are created once per name; later calls return a clone sharing
    /// the same near cache and invalidation listener. An empty name selects
    /// the server's default cache.
    pub async fn cache(&self, name: &str) -> Result<RemoteCache> {
        if let Some(cache) = self.caches.lock().get(name) {
            return Ok(cache.clone());
        }

        let ctx = self.base.for_cache(Bytes::copy_from_slice(name.as_bytes()));
        let mut cache = RemoteCache::new(
            name.to_string(),
            CacheOperationsFactory::new(ctx),
            Arc::clone(&self.statistics),
        );
        if let Some(near_config) = self.config.find_near_cache(name) {
            cache.enable_near_cache(NearCache::new(near_config.clone())).await?;
        }

        let raced = {
            let mut caches = self.caches.lock();
            match caches.get(name) {
                Some(existing) => Some((existing.clone(), cache.clone())),
                None => {
                    caches.insert(name.to_string(), cache.clone());
                    None
                }
            }
        };
        match raced {
            Some((existing, duplicate)) => {
                if let Err(e) = duplicate.stop().await {
                    tracing::debug!(cache = %name, error = %e, "duplicate near cache listener not removed");
                }
                Ok(existing)
            }
            None => Ok(cache),
        }
    }

    /// Creates a cache on the server from a named template.
    pub async fn create_cache(&self, name: &str, template: &str) -> Result<()> {
        let params = vec![
            ("name".to_string(), Bytes::copy_from_slice(name.as_bytes())),
            ("template".to_string(), Bytes::copy_from_slice(template.as_bytes())),
        ];
        self.admin().admin_task("cache@create", params).execute().await?;
        tracing::info!(cache = %name, template = %template, "cache created");
        Ok(())
    }

    /// Removes a cache from the server.
    pub async fn remove_cache(&self, name: &str) -> Result<()> {
        let params = vec![("name".to_string(), Bytes::copy_from_slice(name.as_bytes()))];
        self.admin().admin_task("cache@remove", params).execute().await?;
        tracing::info!(cache = %name, "cache removed");
        Ok(())
    }

    /// Names of the caches defined on the server.
    pub async fn cache_names(&self) -> Result<Vec<String>> {
        let names = self.admin().admin_task("cache@names", Vec::new()).execute().await?;
        parse_name_list(&names)
    }

    fn admin(&self) -> CacheOperationsFactory {
        CacheOperationsFactory::new(self.base.clone())
    }

    /// Moves to a configured cluster.
    ///
    /// Returns `false` when the cluster is not configured.
    pub fn switch_to_cluster(&self, cluster_name: &str) -> bool {
        self.channel_factory.switch_cluster(cluster_name, None)
    }

    /// Moves back to the servers the client was configured with.
    pub fn switch_to_default_cluster(&self) -> bool {
        self.switch_to_cluster(crate::connection::DEFAULT_CLUSTER_NAME)
    }

    /// Name of the cluster in use.
    pub fn current_cluster_name(&self) -> String {
        self.channel_factory.current_cluster_name()
    }

    /// Every server known to the client.
    pub fn servers(&self) -> Vec<SocketAddr> {
        self.channel_factory.all_servers()
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.channel_factory.channel_count()
    }

    /// The channel factory, for inspecting routing and topology.
    pub fn channel_factory(&self) -> &Arc<TcpChannelFactory> {
        &self.channel_factory
    }

    /// Subscribes to channel and topology events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.channel_factory.subscribe()
    }

    /// Client-side counters.
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    /// The listener registry.
    pub fn listener_notifier(&self) -> &Arc<ClientListenerNotifier> {
        &self.notifier
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Removes near-cache listeners, stops routing notices and closes every channel.
    #[instrument(name = "manager.shutdown", skip(self))]
    pub async fn shutdown(&self) {
        let caches: Vec<RemoteCache> = self.caches.lock().drain().map(|(_, cache)| cache).collect();
        for cache in caches {
            if let Err(e) = cache.stop().await {
                tracing::debug!(cache = %cache.name(), error = %e, "near cache listener not removed");
            }
        }
        self.notifier.shutdown();
        if let Some(task) = self.notice_task.lock().take() {
            task.abort();
        }
        self.channel_factory.shutdown();
        tracing::info!("Hot Rod client stopped");
    }
}

impl Drop for RemoteCacheManager {
    fn drop(&mut self) {
        if let Some(task) = self.notice_task.lock().take() {
            task.abort();
        }
    }
}

/// Pings each server on its own channel; returns how many answered.
async fn ping_servers(base: &OperationContext, factory: &TcpChannelFactory, servers: &[SocketAddr]) -> usize {
    let operations = CacheOperationsFactory::new(base.clone());
    let mut reachable = 0;
    for &address in servers {
        match ping_server(&operations, factory, address).await {
            Ok(()) => reachable += 1,
            Err(e) => tracing::debug!(address = %address, error = %e, "ping failed"),
        }
    }
    reachable
}

async fn ping_server(
    operations: &CacheOperationsFactory,
    factory: &TcpChannelFactory,
    address: SocketAddr,
) -> Result<()> {
    let channel = factory.channel_for(address).await?;
    let outcome = operations.ping().execute_on(&channel).await;
    factory.release_channel(&channel);
    outcome.map(|_| ())
}

/// Applies what channel readers report until every sender is gone.
async fn route_notices(
    mut notices: mpsc::UnboundedReceiver<ChannelNotice>,
    factory: Arc<TcpChannelFactory>,
    notifier: Arc<ClientListenerNotifier>,
    operations: CacheOperationsFactory,
) {
    while let Some(notice) = notices.recv().await {
        match notice {
            ChannelNotice::Topology {
                address,
                cache_name,
                topology_age,
                update,
            } => {
                tracing::debug!(address = %address, topology_id = update.topology_id, "topology received");
                factory.receive_topology(&cache_name, topology_age, update).await;
            }
            ChannelNotice::Event { address, event } => notifier.dispatch(address, event),
            ChannelNotice::Closed {
                address,
                channel_id,
                listeners,
            } => {
                factory.channel_closed(address, channel_id);
                if !listeners.is_empty() {
                    notifier.failover(&listeners);
                }
            }
            ChannelNotice::ClusterUnreachable {
                cluster,
                topology_age,
            } => {
                tokio::spawn(find_alternate_cluster(
                    Arc::clone(&factory),
                    operations.clone(),
                    cluster,
                    topology_age,
                ));
            }
        }
    }
    tracing::debug!("notice routing stopped");
}

/// Switches to the first alternate cluster whose servers all answer a ping.
#[instrument(skip(factory, operations))]
async fn find_alternate_cluster(
    factory: Arc<TcpChannelFactory>,
    operations: CacheOperationsFactory,
    cluster: String,
    topology_age: i32,
) {
    for candidate in factory.alternate_clusters(&cluster) {
        let Some(servers) = factory.cluster_servers(&candidate) else {
            continue;
        };
        let mut all_answered = !servers.is_empty();
        for &address in &servers {
            if let Err(e) = ping_server(&operations, &factory, address).await {
                tracing::debug!(cluster = %candidate, address = %address, error = %e, "alternate cluster server unreachable");
                all_answered = false;
                break;
            }
        }
        if all_answered {
            if factory.switch_cluster(&candidate, Some(topology_age)) {
                tracing::warn!(from = %cluster, to = %candidate, "switched to alternate cluster");
            }
            return;
        }
    }
    tracing::warn!(cluster = %cluster, "no alternate cluster reachable");
}

/// Parses the cache name list returned by the server, a JSON string array.
fn parse_name_list(raw: &[u8]) -> Result<Vec<String>> {
    serde_json::from_slice(raw)
        .map_err(|e| HotRodError::Decode(format!("invalid cache name list: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RemoteCacheManager>();
    }

    #[test]
    fn test_plain_initial_response() {
        let ctx = crate::operations::test_context(vec!["127.0.0.1:11222".parse().unwrap()]);
        let auth = PlainAuthenticator {
            operations: CacheOperationsFactory::new(ctx),
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(auth.initial_response().as_ref(), b"\0admin\0secret");
    }

    #[test]
    fn test_parse_name_list() {
        assert_eq!(
            parse_name_list(br#"["books", "___protobuf_metadata","users"]"#).unwrap(),
            vec!["books", "___protobuf_metadata", "users"]
        );
        assert!(parse_name_list(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_name_list_keeps_escaped_characters() {
        assert_eq!(parse_name_list(br#"["a,b","c"]"#).unwrap(), vec!["a,b", "c"]);
        assert_eq!(
            parse_name_list(br#"["say \"hi\"", "x]y"]"#).unwrap(),
            vec![r#"say "hi""#, "x]y"]
        );
    }

    #[test]
    fn test_parse_name_list_rejects_malformed_input() {
        assert!(matches!(parse_name_list(b"books,users"), Err(HotRodError::Decode(_))));
        assert!(matches!(parse_name_list(br#"["books""#), Err(HotRodError::Decode(_))));
    }

    #[tokio::test]
    async fn test_start_tolerates_unreachable_servers() {
        let config = ClientConfig::builder()
            .add_server("127.0.0.1:1".parse().unwrap())
            .connect_timeout(std::time::Duration::from_millis(200))
            .build()
            .unwrap();
        let manager = RemoteCacheManager::start(config).await.unwrap();
        assert_eq!(manager.channel_count(), 0);
        assert_eq!(manager.current_cluster_name(), crate::connection::DEFAULT_CLUSTER_NAME);
        manager.shutdown().await;
    }
}
