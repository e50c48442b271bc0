//! Server selection strategies for requests that are not routed by key.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::config::BalancingStrategy;

/// Picks the next server for a request, skipping servers that already failed it.
pub trait FailoverRequestBalancer: Send + Sync + std::fmt::Debug {
    /// Selects a server from `servers` that is not in `excluding`.
    ///
    /// Returns `None` when `servers` is empty or every server is excluded.
    fn next_server(
        &self,
        servers: &[SocketAddr],
        excluding: Option<&HashSet<SocketAddr>>,
    ) -> Option<SocketAddr>;
}

fn is_excluded(excluding: Option<&HashSet<SocketAddr>>, server: &SocketAddr) -> bool {
    excluding.is_some_and(|failed| failed.contains(server))
}

/// Cycles through the servers in order.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    index: AtomicUsize,
}

impl RoundRobinBalancer {
    /// Creates a new round-robin balancer.
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
        }
    }
}

impl FailoverRequestBalancer for RoundRobinBalancer {
    fn next_server(
        &self,
        servers: &[SocketAddr],
        excluding: Option<&HashSet<SocketAddr>>,
    ) -> Option<SocketAddr> {
        if servers.is_empty() {
            return None;
        }
        let start = self.index.fetch_add(1, Ordering::Relaxed);
        (0..servers.len())
            .map(|offset| servers[(start + offset) % servers.len()])
            .find(|server| !is_excluded(excluding, server))
    }
}

/// Picks a random server among the candidates.
#[derive(Debug, Default)]
pub struct RandomBalancer;

impl RandomBalancer {
    /// Creates a new random balancer.
    pub fn new() -> Self {
        Self
    }
}

impl FailoverRequestBalancer for RandomBalancer {
    fn next_server(
        &self,
        servers: &[SocketAddr],
        excluding: Option<&HashSet<SocketAddr>>,
    ) -> Option<SocketAddr> {
        let candidates: Vec<SocketAddr> = servers
            .iter()
            .filter(|server| !is_excluded(excluding, server))
            .copied()
            .collect();
        candidates.choose(&mut rand::thread_rng()).copied()
    }
}

/// Creates the balancer for a configured strategy.
pub fn balancer_for(strategy: BalancingStrategy) -> Arc<dyn FailoverRequestBalancer> {
    match strategy {
        BalancingStrategy::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        BalancingStrategy::Random => Arc::new(RandomBalancer::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers(count: u16) -> Vec<SocketAddr> {
        (0..count)
            .map(|i| SocketAddr::from(([127, 0, 0, 1], 11222 + i)))
            .collect()
    }

    #[test]
    fn test_round_robin_empty_servers() {
        let balancer = RoundRobinBalancer::new();
        assert!(balancer.next_server(&[], None).is_none());
    }

    #[test]
    fn test_round_robin_cycles_through_servers() {
        let balancer = RoundRobinBalancer::new();
        let servers = servers(3);

        let picked: Vec<SocketAddr> = (0..6)
            .map(|_| balancer.next_server(&servers, None).unwrap())
            .collect();

        assert_eq!(&picked[..3], &servers[..]);
        assert_eq!(&picked[3..], &servers[..]);
    }

    #[test]
    fn test_round_robin_skips_failed_servers() {
        let balancer = RoundRobinBalancer::new();
        let servers = servers(3);
        let failed: HashSet<SocketAddr> = [servers[0], servers[1]].into_iter().collect();

        for _ in 0..5 {
            assert_eq!(balancer.next_server(&servers, Some(&failed)), Some(servers[2]));
        }
    }

    #[test]
    fn test_all_servers_failed_yields_none() {
        let servers = servers(2);
        let failed: HashSet<SocketAddr> = servers.iter().copied().collect();

        assert!(RoundRobinBalancer::new()
            .next_server(&servers, Some(&failed))
            .is_none());
        assert!(RandomBalancer::new()
            .next_server(&servers, Some(&failed))
            .is_none());
    }

    #[test]
    fn test_random_never_returns_failed_server() {
        let balancer = RandomBalancer::new();
        let servers = servers(4);
        let failed: HashSet<SocketAddr> = [servers[3]].into_iter().collect();

        for _ in 0..50 {
            let picked = balancer.next_server(&servers, Some(&failed)).unwrap();
            assert_ne!(picked, servers[3]);
        }
    }

    #[test]
    fn test_balancer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RoundRobinBalancer>();
        assert_send_sync::<RandomBalancer>();
    }
}
