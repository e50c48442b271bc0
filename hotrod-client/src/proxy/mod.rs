//! Cache handles exposed to applications.

mod iterator;
mod remote_cache;

pub use iterator::{IterationOptions, RemoteEntryIterator};
pub use remote_cache::RemoteCache;
