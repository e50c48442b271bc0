//! Async Rust client for Hot Rod, the binary protocol of Infinispan remote caches.
//!
//! The client keeps one multiplexed TCP channel per server and routes every
//! keyed request to the key's primary owner once the server has sent its
//! segment ownership. Failed attempts move to another server, multi-key
//! requests are split per owner and run in parallel, and server-side
//! listeners follow their channel onto a new server when it closes.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hotrod_client::{ClientConfig, RemoteCacheManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .add_server("127.0.0.1:11222".parse()?)
//!         .build()?;
//!     let manager = RemoteCacheManager::start(config).await?;
//!
//!     let books = manager.cache("books").await?;
//!     books.put("isbn-1", "Dune").await?;
//!     assert_eq!(books.get("isbn-1").await?.as_deref(), Some(&b"Dune"[..]));
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Listeners
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hotrod_client::{FnClientListener, ListenerOptions};
//!
//! let listener = FnClientListener::builder()
//!     .on_created(|event| println!("created {:?}", event.key()))
//!     .on_failover(|| println!("listener moved to another server"))
//!     .build();
//! let id = books.add_client_listener(Arc::new(listener), ListenerOptions::new()).await?;
//! books.remove_client_listener(id).await?;
//! ```
//!
//! # Configuration
//!
//! [`ClientConfig::builder()`](ClientConfig::builder) builds a config in code;
//! [`ClientConfig::from_properties`] and [`ClientConfig::from_env`] read the
//! usual `infinispan.client.hotrod.*` keys and `HOTROD_*` variables. TOML
//! files need the `config-file` feature.
//!
//! # Logging
//!
//! Everything is logged through [`tracing`]. The library installs no
//! subscriber.

#![warn(missing_docs)]

pub mod cache;
mod client;
pub mod config;
pub mod config_file;
pub mod connection;
pub mod diagnostics;
pub mod listener;
pub mod operations;
pub mod proxy;

pub use cache::{BloomFilter, EvictionPolicy, NearCache, NearCacheConfig, NearCacheConfigBuilder};
pub use client::RemoteCacheManager;
pub use config::{
    BalancingStrategy, ClientConfig, ClientConfigBuilder, ClusterConfig, ConfigError,
    NetworkConfig, NetworkConfigBuilder, SecurityConfig, SecurityConfigBuilder,
};
pub use connection::{ChannelFactory, ChannelTarget, ConnectionEvent, TcpChannelFactory};
pub use diagnostics::{ClientStatistics, StatisticsSnapshot};
pub use hotrod_core as core;
pub use hotrod_core::{HotRodError, Result};
pub use listener::{
    ClientEvent, ClientListener, ClientListenerNotifier, FnClientListener, FnClientListenerBuilder,
    ListenerId, ListenerOptions, ListenerStats,
};
pub use operations::{CacheOperationsFactory, Operation, OperationHandle, WriteOutcome};
pub use proxy::{IterationOptions, RemoteCache, RemoteEntryIterator};
