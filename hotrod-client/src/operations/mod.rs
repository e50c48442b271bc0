//! The operation engine: request encoding, resumable response decoding,
//! retry with failover, scatter/gather and listener lifecycles.
//!
//! A logical call is a [`Request`] plus a header, built by the
//! [`CacheOperationsFactory`]. Running it picks a channel, writes the
//! request, and waits for the body decoder to produce a [`Response`].
//! Transport failures are retried on other servers; errors reported by a
//! healthy server are not.

mod context;
mod decode;
mod factory;
mod handle;
mod listener;
mod parallel;
mod request;
mod response;
mod retry;

pub use context::OperationContext;
#[cfg(test)]
pub(crate) use context::test_context;
pub use decode::{
    AuthDecoder, AuthMechListDecoder, BodyDecoder, BulkKeysDecoder, ExecDecoder, GetAllDecoder,
    IterationNextDecoder, IterationStartDecoder, MetadataDecoder, PingDecoder, SizeDecoder,
    StatsDecoder, StatusDecoder, ValueDecoder, WriteDecoder,
};
pub use factory::{CacheOperationsFactory, Operation};
pub use handle::OperationHandle;
pub use request::Request;
pub use response::{
    EntryMetadata, IterationBatch, IterationEntry, MetadataValue, PingResponse, Response,
    WriteOutcome,
};
pub use retry::{RetryDecision, RetryState};
