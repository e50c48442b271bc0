//! Channels to Hot Rod servers and the topology they are chosen from.

mod balancer;
mod channel;
mod decoder;
mod factory;
mod topology;

pub use balancer::{balancer_for, FailoverRequestBalancer, RandomBalancer, RoundRobinBalancer};
pub use channel::{Channel, ChannelId};
pub(crate) use channel::{ChannelNotice, ChannelOptions};
pub use factory::{
    ChannelFactory, ChannelInitializer, ChannelTarget, ConnectionEvent, TcpChannelFactory,
};
pub use topology::{CacheTopologyInfo, TopologyChange, TopologyInfo, DEFAULT_CLUSTER_NAME};
