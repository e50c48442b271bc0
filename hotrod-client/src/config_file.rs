//! Declarative configuration loading from TOML, properties and environment variables.
//!
//! A [`FileConfig`] mirrors [`ClientConfig`](crate::config::ClientConfig) with
//! plain, serde-friendly fields and is converted through the builder API, so
//! every source goes through the same validation.
//!
//! # Supported Sources
//!
//! - **TOML** (requires `config-file` feature): `ClientConfig::from_toml("hotrod-client.toml")`
//! - **Properties** (always available): `ClientConfig::from_properties(&map)` with
//!   `infinispan.client.hotrod.*` keys
//! - **Environment Variables** (always available): `ClientConfig::from_env()`
//!
//! # Example TOML
//!
//! ```toml
//! servers = ["10.0.0.1:11222", "10.0.0.2:11222"]
//! connect-timeout-ms = 10000
//! socket-timeout-ms = 5000
//! max-retries = 5
//! intelligence = "hash-distribution-aware"
//! protocol-version = "3.1"
//! balancing-strategy = "round-robin"
//!
//! [security]
//! username = "admin"
//! password = "secret"
//!
//! [[clusters]]
//! name = "backup"
//! servers = ["10.1.0.1:11222"]
//!
//! [[near-caches]]
//! name = "books"
//! max-entries = 1000
//! bloom-filter = true
//! ```

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

#[cfg(feature = "config-file")]
use serde::{Deserialize, Serialize};

use hotrod_core::protocol::{VERSION_30, VERSION_31};
use hotrod_core::ClientIntelligence;

use crate::cache::NearCacheConfig;
use crate::config::{BalancingStrategy, ClientConfig, ClientConfigBuilder, ClusterConfig, ConfigError};

/// Prefix of Hot Rod client properties.
pub const PROPERTY_PREFIX: &str = "infinispan.client.hotrod.";

/// Top-level file-based configuration.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(rename_all = "kebab-case", default))]
pub struct FileConfig {
    /// Initial servers as `host:port`.
    pub servers: Option<Vec<String>>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Response timeout in milliseconds.
    pub socket_timeout_ms: Option<u64>,
    /// Retries after the first attempt.
    pub max_retries: Option<u32>,
    /// `basic`, `topology-aware` or `hash-distribution-aware`.
    pub intelligence: Option<String>,
    /// `3.0` or `3.1`.
    pub protocol_version: Option<String>,
    /// `round-robin` or `random`.
    pub balancing_strategy: Option<String>,
    /// Entries per iteration batch.
    pub batch_size: Option<u32>,
    /// Disable Nagle's algorithm.
    pub tcp_no_delay: Option<bool>,
    /// Enable TCP keep-alive.
    pub tcp_keep_alive: Option<bool>,
    /// SASL settings.
    pub security: Option<FileSecurityConfig>,
    /// Alternate clusters.
    pub clusters: Vec<FileClusterConfig>,
    /// Near caches by cache name.
    pub near_caches: Vec<FileNearCacheConfig>,
}

/// SASL section of a [`FileConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(rename_all = "kebab-case", default))]
pub struct FileSecurityConfig {
    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// SASL mechanism; only `PLAIN` is supported.
    pub mechanism: Option<String>,
}

/// Alternate cluster of a [`FileConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(rename_all = "kebab-case", default))]
pub struct FileClusterConfig {
    /// Cluster name.
    pub name: String,
    /// Servers as `host:port`.
    pub servers: Vec<String>,
}

/// Near cache of a [`FileConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "config-file", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config-file", serde(rename_all = "kebab-case", default))]
pub struct FileNearCacheConfig {
    /// Cache name.
    pub name: String,
    /// Entry bound.
    pub max_entries: Option<u32>,
    /// Use a bloom filter listener.
    pub bloom_filter: Option<bool>,
}

fn resolve(address: &str) -> Result<SocketAddr, ConfigError> {
    let address = address.trim();
    address
        .to_socket_addrs()
        .map_err(|e| ConfigError::new(format!("invalid server address '{address}': {e}")))?
        .next()
        .ok_or_else(|| ConfigError::new(format!("server address '{address}' did not resolve")))
}

fn resolve_all(addresses: &[String]) -> Result<Vec<SocketAddr>, ConfigError> {
    addresses.iter().map(|a| resolve(a)).collect()
}

fn parse_intelligence(value: &str) -> Result<ClientIntelligence, ConfigError> {
    match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "basic" => Ok(ClientIntelligence::Basic),
        "topology-aware" => Ok(ClientIntelligence::TopologyAware),
        "hash-distribution-aware" => Ok(ClientIntelligence::HashDistributionAware),
        other => Err(ConfigError::new(format!("unknown client intelligence '{other}'"))),
    }
}

fn parse_protocol_version(value: &str) -> Result<u8, ConfigError> {
    match value.trim() {
        "3.0" | "30" => Ok(VERSION_30),
        "3.1" | "31" => Ok(VERSION_31),
        other => Err(ConfigError::new(format!("unsupported protocol version '{other}'"))),
    }
}

fn parse_balancing_strategy(value: &str) -> Result<BalancingStrategy, ConfigError> {
    match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "round-robin" => Ok(BalancingStrategy::RoundRobin),
        "random" => Ok(BalancingStrategy::Random),
        other => Err(ConfigError::new(format!("unknown balancing strategy '{other}'"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::new(format!("'{key}' expects a number, got '{value}'")))
}

fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Splits a `host:port;host:port` server list.
fn split_servers(value: &str) -> Vec<String> {
    value
        .split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl TryFrom<FileConfig> for ClientConfig {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, Self::Error> {
        let mut builder = ClientConfigBuilder::new();

        if let Some(servers) = &file.servers {
            builder = builder.servers(resolve_all(servers)?);
        }
        let clusters = file
            .clusters
            .iter()
            .map(|c| Ok(ClusterConfig::new(c.name.clone(), resolve_all(&c.servers)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let tcp_no_delay = file.tcp_no_delay;
        let tcp_keep_alive = file.tcp_keep_alive;
        builder = builder.network(|mut network| {
            for cluster in clusters {
                network = network.add_cluster(cluster);
            }
            if let Some(enabled) = tcp_no_delay {
                network = network.tcp_no_delay(enabled);
            }
            if let Some(enabled) = tcp_keep_alive {
                network = network.tcp_keep_alive(enabled);
            }
            network
        });

        if let Some(ms) = file.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = file.socket_timeout_ms {
            builder = builder.socket_timeout(Duration::from_millis(ms));
        }
        if let Some(n) = file.max_retries {
            builder = builder.max_retries(n);
        }
        if let Some(value) = &file.intelligence {
            builder = builder.intelligence(parse_intelligence(value)?);
        }
        if let Some(value) = &file.protocol_version {
            builder = builder.protocol_version(parse_protocol_version(value)?);
        }
        if let Some(value) = &file.balancing_strategy {
            builder = builder.balancing_strategy(parse_balancing_strategy(value)?);
        }
        if let Some(n) = file.batch_size {
            builder = builder.batch_size(n);
        }

        if let Some(security) = file.security {
            builder = builder.security(|mut s| {
                if let (Some(user), Some(password)) = (security.username, security.password) {
                    s = s.credentials(user, password);
                }
                if let Some(mechanism) = security.mechanism {
                    s = s.mechanism(mechanism);
                }
                s
            });
        }

        for near in file.near_caches {
            let mut near_builder = NearCacheConfig::builder(near.name);
            if let Some(max) = near.max_entries {
                near_builder = near_builder.max_entries(max);
            }
            if let Some(enabled) = near.bloom_filter {
                near_builder = near_builder.bloom_filter(enabled);
            }
            builder = builder.add_near_cache_config(near_builder.build()?);
        }

        builder.build()
    }
}

impl FileConfig {
    /// Reads `infinispan.client.hotrod.*` keys.
    ///
    /// Unknown keys are ignored. Alternate clusters use
    /// `cluster.<name>=host:port;host:port`, near caches use
    /// `cache.<name>.near_cache.max_entries` and `cache.<name>.near_cache.bloom_filter`.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut file = FileConfig::default();
        let mut near_caches: HashMap<String, FileNearCacheConfig> = HashMap::new();

        for (key, value) in properties {
            let Some(name) = key.strip_prefix(PROPERTY_PREFIX) else {
                continue;
            };
            match name {
                "server_list" => file.servers = Some(split_servers(value)),
                "connect_timeout" => file.connect_timeout_ms = Some(parse_number(key, value)?),
                "socket_timeout" => file.socket_timeout_ms = Some(parse_number(key, value)?),
                "max_retries" => file.max_retries = Some(parse_number(key, value)?),
                "client_intelligence" => file.intelligence = Some(value.clone()),
                "protocol_version" => file.protocol_version = Some(value.clone()),
                "request_balancing_strategy" => file.balancing_strategy = Some(value.clone()),
                "batch_size" => file.batch_size = Some(parse_number(key, value)?),
                "tcp_no_delay" => file.tcp_no_delay = Some(parse_bool(value)),
                "tcp_keep_alive" => file.tcp_keep_alive = Some(parse_bool(value)),
                "auth_username" => {
                    file.security.get_or_insert_with(Default::default).username = Some(value.clone())
                }
                "auth_password" => {
                    file.security.get_or_insert_with(Default::default).password = Some(value.clone())
                }
                "sasl_mechanism" => {
                    file.security.get_or_insert_with(Default::default).mechanism = Some(value.clone())
                }
                other => {
                    if let Some(cluster) = other.strip_prefix("cluster.") {
                        file.clusters.push(FileClusterConfig {
                            name: cluster.to_string(),
                            servers: split_servers(value),
                        });
                    } else if let Some(rest) = other.strip_prefix("cache.") {
                        if let Some((cache, setting)) = rest.rsplit_once(".near_cache.") {
                            let near = near_caches
                                .entry(cache.to_string())
                                .or_insert_with(|| FileNearCacheConfig {
                                    name: cache.to_string(),
                                    ..Default::default()
                                });
                            match setting {
                                "max_entries" => near.max_entries = Some(parse_number(key, value)?),
                                "bloom_filter" => near.bloom_filter = Some(parse_bool(value)),
                                _ => tracing::debug!(key = %key, "ignoring unknown near cache property"),
                            }
                        }
                    } else {
                        tracing::debug!(key = %key, "ignoring unknown property");
                    }
                }
            }
        }

        file.clusters.sort_by(|a, b| a.name.cmp(&b.name));
        let mut near: Vec<FileNearCacheConfig> = near_caches.into_values().collect();
        near.sort_by(|a, b| a.name.cmp(&b.name));
        file.near_caches = near;
        Ok(file)
    }

    /// Reads `HOTROD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut file = FileConfig::default();

        if let Ok(val) = std::env::var("HOTROD_SERVERS") {
            file.servers = Some(split_servers(&val));
        }

        if let Ok(val) = std::env::var("HOTROD_CONNECT_TIMEOUT_MS") {
            file.connect_timeout_ms = Some(parse_number("HOTROD_CONNECT_TIMEOUT_MS", &val)?);
        }

        if let Ok(val) = std::env::var("HOTROD_SOCKET_TIMEOUT_MS") {
            file.socket_timeout_ms = Some(parse_number("HOTROD_SOCKET_TIMEOUT_MS", &val)?);
        }

        if let Ok(val) = std::env::var("HOTROD_MAX_RETRIES") {
            file.max_retries = Some(parse_number("HOTROD_MAX_RETRIES", &val)?);
        }

        if let Ok(val) = std::env::var("HOTROD_INTELLIGENCE") {
            file.intelligence = Some(val);
        }

        if let Ok(val) = std::env::var("HOTROD_PROTOCOL_VERSION") {
            file.protocol_version = Some(val);
        }

        if let Ok(val) = std::env::var("HOTROD_BALANCING_STRATEGY") {
            file.balancing_strategy = Some(val);
        }

        if let Ok(user) = std::env::var("HOTROD_USERNAME") {
            let security = file.security.get_or_insert_with(Default::default);
            security.username = Some(user);
            security.password = std::env::var("HOTROD_PASSWORD").ok();
        }

        Ok(file)
    }
}

impl ClientConfig {
    /// Loads configuration from a TOML file.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(content)
            .map_err(|e| ConfigError::new(format!("invalid TOML config: {e}")))?;
        file.try_into()
    }

    /// Loads configuration from `infinispan.client.hotrod.*` properties.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut props = HashMap::new();
    /// props.insert("infinispan.client.hotrod.server_list".into(), "10.0.0.1:11222;10.0.0.2:11222".into());
    /// props.insert("infinispan.client.hotrod.max_retries".into(), "5".into());
    /// let config = ClientConfig::from_properties(&props)?;
    /// ```
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        FileConfig::from_properties(properties)?.try_into()
    }

    /// Loads configuration from environment variables.
    ///
    /// # Supported Environment Variables
    ///
    /// | Variable | Maps to |
    /// |----------|---------|
    /// | `HOTROD_SERVERS` | `host:port` list separated by `;` or `,` |
    /// | `HOTROD_CONNECT_TIMEOUT_MS` | Connect timeout in milliseconds |
    /// | `HOTROD_SOCKET_TIMEOUT_MS` | Response timeout in milliseconds |
    /// | `HOTROD_MAX_RETRIES` | Retries after the first attempt |
    /// | `HOTROD_INTELLIGENCE` | `basic`, `topology-aware`, `hash-distribution-aware` |
    /// | `HOTROD_PROTOCOL_VERSION` | `3.0` or `3.1` |
    /// | `HOTROD_BALANCING_STRATEGY` | `round-robin` or `random` |
    /// | `HOTROD_USERNAME` / `HOTROD_PASSWORD` | SASL PLAIN credentials |
    pub fn from_env() -> Result<Self, ConfigError> {
        FileConfig::from_env()?.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (format!("{PROPERTY_PREFIX}{k}"), v.to_string()))
            .collect()
    }

    #[test]
    fn test_file_config_defaults_produce_valid_client_config() {
        let config: ClientConfig = FileConfig::default().try_into().unwrap();
        assert_eq!(config.network().servers().len(), 1);
        assert_eq!(config.max_retries(), 3);
    }

    #[test]
    fn test_properties_map_to_client_config() {
        let config = ClientConfig::from_properties(&props(&[
            ("server_list", "127.0.0.1:11222;127.0.0.1:11223"),
            ("connect_timeout", "1500"),
            ("socket_timeout", "2500"),
            ("max_retries", "7"),
            ("client_intelligence", "TOPOLOGY_AWARE"),
            ("protocol_version", "3.0"),
            ("request_balancing_strategy", "random"),
            ("batch_size", "500"),
            ("auth_username", "admin"),
            ("auth_password", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.network().servers().len(), 2);
        assert_eq!(config.network().connect_timeout(), Duration::from_millis(1500));
        assert_eq!(config.network().socket_timeout(), Duration::from_millis(2500));
        assert_eq!(config.max_retries(), 7);
        assert_eq!(config.intelligence(), ClientIntelligence::TopologyAware);
        assert_eq!(config.protocol_version(), VERSION_30);
        assert_eq!(config.balancing_strategy(), BalancingStrategy::Random);
        assert_eq!(config.batch_size(), 500);
        assert_eq!(config.security().username(), Some("admin"));
    }

    #[test]
    fn test_properties_clusters_and_near_caches() {
        let file = FileConfig::from_properties(&props(&[
            ("cluster.site-b", "127.0.0.1:12222"),
            ("cache.books.near_cache.max_entries", "100"),
            ("cache.books.near_cache.bloom_filter", "true"),
        ]))
        .unwrap();

        assert_eq!(file.clusters.len(), 1);
        assert_eq!(file.clusters[0].name, "site-b");
        assert_eq!(file.near_caches.len(), 1);
        assert_eq!(file.near_caches[0].max_entries, Some(100));
        assert_eq!(file.near_caches[0].bloom_filter, Some(true));

        let config: ClientConfig = file.try_into().unwrap();
        assert_eq!(config.network().clusters()[0].name(), "site-b");
        assert!(config.find_near_cache("books").is_some());
    }

    #[test]
    fn test_properties_without_prefix_are_ignored() {
        let mut map = HashMap::new();
        map.insert("other.max_retries".to_string(), "nope".to_string());
        assert_eq!(FileConfig::from_properties(&map).unwrap(), FileConfig::default());
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(ClientConfig::from_properties(&props(&[("max_retries", "many")])).is_err());
        assert!(ClientConfig::from_properties(&props(&[("protocol_version", "2.8")])).is_err());
        assert!(ClientConfig::from_properties(&props(&[("client_intelligence", "genius")])).is_err());
    }

    #[test]
    fn test_from_env_reads_max_retries() {
        std::env::set_var("HOTROD_MAX_RETRIES", "9");
        let file = FileConfig::from_env().unwrap();
        std::env::remove_var("HOTROD_MAX_RETRIES");
        assert_eq!(file.max_retries, Some(9));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_toml_config() {
        let config = ClientConfig::from_toml_str(
            r#"
            servers = ["127.0.0.1:11222"]
            max-retries = 2
            protocol-version = "3.1"

            [[clusters]]
            name = "backup"
            servers = ["127.0.0.1:12222"]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries(), 2);
        assert_eq!(config.network().clusters().len(), 1);
    }
}
