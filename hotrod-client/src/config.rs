//! Client configuration types and builders.

use std::net::SocketAddr;
use std::time::Duration;

use hotrod_core::protocol::{VERSION_30, VERSION_31};
use hotrod_core::{ClientIntelligence, HotRodError};

use crate::cache::NearCacheConfig;

/// Default Hot Rod server address.
const DEFAULT_SERVER: &str = "127.0.0.1:11222";
/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default socket (response) timeout.
const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(60);
/// Default number of retries after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default iteration batch size.
const DEFAULT_BATCH_SIZE: u32 = 10_000;
/// Default SASL mechanism.
const DEFAULT_SASL_MECHANISM: &str = "PLAIN";

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for HotRodError {
    fn from(err: ConfigError) -> Self {
        HotRodError::Configuration(err.message)
    }
}

/// Strategy used to pick a server when no key owner applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalancingStrategy {
    /// Cycle through servers in order.
    #[default]
    RoundRobin,
    /// Pick a random server.
    Random,
}

/// Named group of servers the client can switch to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    name: String,
    servers: Vec<SocketAddr>,
}

impl ClusterConfig {
    /// Creates a cluster definition.
    pub fn new(name: impl Into<String>, servers: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            name: name.into(),
            servers: servers.into_iter().collect(),
        }
    }

    /// Returns the cluster name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the cluster's servers.
    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }
}

/// Network configuration for server connections.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    servers: Vec<SocketAddr>,
    clusters: Vec<ClusterConfig>,
    connect_timeout: Duration,
    socket_timeout: Duration,
    tcp_no_delay: bool,
    tcp_keep_alive: bool,
}

impl NetworkConfig {
    /// Returns the initial server list.
    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// Returns the alternate clusters.
    pub fn clusters(&self) -> &[ClusterConfig] {
        &self.clusters
    }

    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns how long an operation waits for its response.
    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    /// Returns whether Nagle's algorithm is disabled.
    pub fn tcp_no_delay(&self) -> bool {
        self.tcp_no_delay
    }

    /// Returns whether TCP keep-alive is enabled.
    pub fn tcp_keep_alive(&self) -> bool {
        self.tcp_keep_alive
    }
}

/// Builder for `NetworkConfig`.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfigBuilder {
    servers: Vec<SocketAddr>,
    clusters: Vec<ClusterConfig>,
    connect_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    tcp_no_delay: Option<bool>,
    tcp_keep_alive: Option<bool>,
}

impl NetworkConfigBuilder {
    /// Creates a new network configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a server address.
    pub fn add_server(mut self, address: SocketAddr) -> Self {
        self.servers.push(address);
        self
    }

    /// Sets the server addresses, replacing any previously configured.
    pub fn servers(mut self, servers: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.servers = servers.into_iter().collect();
        self
    }

    /// Adds an alternate cluster.
    pub fn add_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.clusters.push(cluster);
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the socket timeout.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Enables or disables `TCP_NODELAY`.
    pub fn tcp_no_delay(mut self, enabled: bool) -> Self {
        self.tcp_no_delay = Some(enabled);
        self
    }

    /// Enables or disables TCP keep-alive.
    pub fn tcp_keep_alive(mut self, enabled: bool) -> Self {
        self.tcp_keep_alive = Some(enabled);
        self
    }

    /// Builds the network configuration.
    pub fn build(self) -> Result<NetworkConfig, ConfigError> {
        let servers = if self.servers.is_empty() {
            vec![DEFAULT_SERVER
                .parse()
                .map_err(|e| ConfigError::new(format!("invalid default server: {e}")))?]
        } else {
            self.servers
        };

        let socket_timeout = self.socket_timeout.unwrap_or(DEFAULT_SOCKET_TIMEOUT);
        if socket_timeout.is_zero() {
            return Err(ConfigError::new("socket_timeout must be greater than zero"));
        }

        let mut names = std::collections::HashSet::new();
        for cluster in &self.clusters {
            if cluster.name.is_empty() {
                return Err(ConfigError::new("cluster name must not be empty"));
            }
            if cluster.servers.is_empty() {
                return Err(ConfigError::new(format!(
                    "cluster '{}' has no servers",
                    cluster.name
                )));
            }
            if !names.insert(cluster.name.as_str()) {
                return Err(ConfigError::new(format!(
                    "duplicate cluster name '{}'",
                    cluster.name
                )));
            }
        }

        Ok(NetworkConfig {
            servers,
            clusters: self.clusters,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            socket_timeout,
            tcp_no_delay: self.tcp_no_delay.unwrap_or(true),
            tcp_keep_alive: self.tcp_keep_alive.unwrap_or(false),
        })
    }
}

/// Security configuration for SASL authentication.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    username: Option<String>,
    password: Option<String>,
    mechanism: String,
}

impl SecurityConfig {
    /// Returns the configured username.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns the configured password.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Returns the SASL mechanism.
    pub fn mechanism(&self) -> &str {
        &self.mechanism
    }

    /// Returns true if username/password credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// Builder for `SecurityConfig`.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfigBuilder {
    username: Option<String>,
    password: Option<String>,
    mechanism: Option<String>,
}

impl SecurityConfigBuilder {
    /// Creates a new security configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets both username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets the SASL mechanism.
    pub fn mechanism(mut self, mechanism: impl Into<String>) -> Self {
        self.mechanism = Some(mechanism.into());
        self
    }

    /// Builds the security configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if only one of username or password is set, or
    /// if a mechanism other than `PLAIN` is requested.
    pub fn build(self) -> Result<SecurityConfig, ConfigError> {
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::new(
                "both username and password must be provided together",
            ));
        }
        let mechanism = self
            .mechanism
            .unwrap_or_else(|| DEFAULT_SASL_MECHANISM.to_string());
        if mechanism != DEFAULT_SASL_MECHANISM {
            return Err(ConfigError::new(format!(
                "unsupported SASL mechanism '{mechanism}'"
            )));
        }
        Ok(SecurityConfig {
            username: self.username,
            password: self.password,
            mechanism,
        })
    }
}

/// Main client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    network: NetworkConfig,
    security: SecurityConfig,
    max_retries: u32,
    intelligence: ClientIntelligence,
    protocol_version: u8,
    balancing_strategy: BalancingStrategy,
    batch_size: u32,
    near_caches: Vec<NearCacheConfig>,
}

impl ClientConfig {
    /// Creates a new client configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Returns the security configuration.
    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    /// Returns how many times a failed operation is retried.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the requested client intelligence.
    pub fn intelligence(&self) -> ClientIntelligence {
        self.intelligence
    }

    /// Returns the protocol version byte.
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Returns the server balancing strategy.
    pub fn balancing_strategy(&self) -> BalancingStrategy {
        self.balancing_strategy
    }

    /// Returns the iteration batch size.
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Returns the near-cache configurations.
    pub fn near_caches(&self) -> &[NearCacheConfig] {
        &self.near_caches
    }

    /// Finds a near-cache configuration matching the given cache name.
    pub fn find_near_cache(&self, cache_name: &str) -> Option<&NearCacheConfig> {
        self.near_caches.iter().find(|nc| nc.matches(cache_name))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                servers: DEFAULT_SERVER.parse::<SocketAddr>().into_iter().collect(),
                clusters: Vec::new(),
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                socket_timeout: DEFAULT_SOCKET_TIMEOUT,
                tcp_no_delay: true,
                tcp_keep_alive: false,
            },
            security: SecurityConfig {
                username: None,
                password: None,
                mechanism: DEFAULT_SASL_MECHANISM.to_string(),
            },
            max_retries: DEFAULT_MAX_RETRIES,
            intelligence: ClientIntelligence::default(),
            protocol_version: VERSION_31,
            balancing_strategy: BalancingStrategy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            near_caches: Vec::new(),
        }
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    network: NetworkConfigBuilder,
    security: SecurityConfigBuilder,
    max_retries: Option<u32>,
    intelligence: Option<ClientIntelligence>,
    protocol_version: Option<u8>,
    balancing_strategy: Option<BalancingStrategy>,
    batch_size: Option<u32>,
    near_caches: Vec<NearCacheConfig>,
}

impl ClientConfigBuilder {
    /// Creates a new client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures network settings using a builder function.
    pub fn network<F>(mut self, f: F) -> Self
    where
        F: FnOnce(NetworkConfigBuilder) -> NetworkConfigBuilder,
    {
        self.network = f(self.network);
        self
    }

    /// Configures security settings using a builder function.
    pub fn security<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SecurityConfigBuilder) -> SecurityConfigBuilder,
    {
        self.security = f(self.security);
        self
    }

    /// Adds a server address.
    pub fn add_server(mut self, address: SocketAddr) -> Self {
        self.network = self.network.add_server(address);
        self
    }

    /// Sets the server addresses.
    pub fn servers(mut self, servers: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.network = self.network.servers(servers);
        self
    }

    /// Sets the socket timeout.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.socket_timeout(timeout);
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.connect_timeout(timeout);
        self
    }

    /// Sets credentials for authentication.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.security = self.security.credentials(username, password);
        self
    }

    /// Sets how many times a failed operation is retried.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the client intelligence.
    pub fn intelligence(mut self, intelligence: ClientIntelligence) -> Self {
        self.intelligence = Some(intelligence);
        self
    }

    /// Sets the protocol version byte (30 or 31).
    pub fn protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Sets the server balancing strategy.
    pub fn balancing_strategy(mut self, strategy: BalancingStrategy) -> Self {
        self.balancing_strategy = Some(strategy);
        self
    }

    /// Sets the iteration batch size.
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Adds a near-cache configuration.
    pub fn add_near_cache_config(mut self, config: NearCacheConfig) -> Self {
        self.near_caches.push(config);
        self
    }

    /// Builds the client configuration, returning an error if validation fails.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let network = self.network.build()?;
        let security = self.security.build()?;

        let protocol_version = self.protocol_version.unwrap_or(VERSION_31);
        if protocol_version != VERSION_30 && protocol_version != VERSION_31 {
            return Err(ConfigError::new(format!(
                "unsupported protocol version {protocol_version}"
            )));
        }

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(ConfigError::new("batch_size must be greater than zero"));
        }

        if protocol_version < VERSION_31 && self.near_caches.iter().any(|nc| nc.bloom_filter()) {
            return Err(ConfigError::new(
                "bloom filter near caches require protocol version 31",
            ));
        }

        Ok(ClientConfig {
            network,
            security,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            intelligence: self.intelligence.unwrap_or_default(),
            protocol_version,
            balancing_strategy: self.balancing_strategy.unwrap_or_default(),
            batch_size,
            near_caches: self.near_caches,
        })
    }
}
