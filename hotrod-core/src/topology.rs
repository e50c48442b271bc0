//! Cluster shape as seen by the client.

use std::fmt;
use std::net::SocketAddr;

use crate::error::{HotRodError, Result};
use crate::hash::key_hash;
use crate::protocol::constants::DEFAULT_CACHE_TOPOLOGY;

/// How much cluster knowledge the client asks the server for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientIntelligence {
    /// No topology updates.
    Basic,
    /// Server list updates.
    TopologyAware,
    /// Server list and segment ownership updates.
    #[default]
    HashDistributionAware,
}

impl ClientIntelligence {
    /// Wire value.
    pub fn value(self) -> u8 {
        match self {
            Self::Basic => 0x01,
            Self::TopologyAware => 0x02,
            Self::HashDistributionAware => 0x03,
        }
    }

    /// Parses the wire value.
    pub fn from_value(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Basic),
            0x02 => Ok(Self::TopologyAware),
            0x03 => Ok(Self::HashDistributionAware),
            other => Err(HotRodError::Configuration(format!(
                "unknown client intelligence {other:#04x}"
            ))),
        }
    }
}

impl fmt::Display for ClientIntelligence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Basic => "BASIC",
            Self::TopologyAware => "TOPOLOGY_AWARE",
            Self::HashDistributionAware => "HASH_DISTRIBUTION_AWARE",
        };
        f.write_str(name)
    }
}

/// Topology id and intelligence written into every request header.
///
/// Replaced as a whole whenever the cluster changes; readers take a snapshot
/// at send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTopology {
    /// Last topology id received for the cache.
    pub topology_id: i32,
    /// Intelligence requested by the client.
    pub intelligence: ClientIntelligence,
}

impl ClientTopology {
    /// Creates a topology snapshot.
    pub fn new(topology_id: i32, intelligence: ClientIntelligence) -> Self {
        Self {
            topology_id,
            intelligence,
        }
    }

    /// Topology used before the first server response.
    pub fn initial(intelligence: ClientIntelligence) -> Self {
        Self::new(DEFAULT_CACHE_TOPOLOGY, intelligence)
    }

    /// Returns a copy with another topology id.
    pub fn with_topology_id(self, topology_id: i32) -> Self {
        Self {
            topology_id,
            ..self
        }
    }
}

/// Segment-based ownership map pushed by hash-aware servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentConsistentHash {
    segment_owners: Vec<Vec<SocketAddr>>,
    segment_size: u32,
}

impl SegmentConsistentHash {
    /// Builds the hash from the owners of every segment, primary first.
    pub fn new(segment_owners: Vec<Vec<SocketAddr>>) -> Result<Self> {
        if segment_owners.is_empty() {
            return Err(HotRodError::Decode(
                "consistent hash with zero segments".to_string(),
            ));
        }
        let segments = segment_owners.len() as u32;
        let segment_size = (i32::MAX as u32).div_ceil(segments);
        Ok(Self {
            segment_owners,
            segment_size,
        })
    }

    /// Number of segments.
    pub fn num_segments(&self) -> usize {
        self.segment_owners.len()
    }

    /// Segment that owns `key`.
    pub fn segment(&self, key: &[u8]) -> usize {
        let normalized = (key_hash(key) & i32::MAX) as u32;
        ((normalized / self.segment_size) as usize).min(self.segment_owners.len() - 1)
    }

    /// Primary owner of `key`, if the segment has any owner.
    pub fn primary_owner(&self, key: &[u8]) -> Option<SocketAddr> {
        self.segment_owners[self.segment(key)].first().copied()
    }

    /// All owners of `segment`.
    pub fn owners(&self, segment: usize) -> &[SocketAddr] {
        self.segment_owners
            .get(segment)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Segments whose primary owner is `server`.
    pub fn primary_segments_of(&self, server: SocketAddr) -> Vec<usize> {
        self.segment_owners
            .iter()
            .enumerate()
            .filter(|(_, owners)| owners.first() == Some(&server))
            .map(|(segment, _)| segment)
            .collect()
    }
}
