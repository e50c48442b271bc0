//! Core types and protocol encoding for Hot Rod clients.

#![warn(missing_docs)]

pub mod error;
pub mod hash;
pub mod protocol;
pub mod topology;

pub use error::{HotRodError, Result};
pub use topology::{ClientIntelligence, ClientTopology, SegmentConsistentHash};
