//! Decoded response bodies and the typed results handed to callers.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use bytes::Bytes;
use hotrod_core::protocol::{has_previous, is_not_executed, is_not_exist, is_success, MediaType};
use hotrod_core::{HotRodError, Result};

/// A fully decoded response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Only the status byte carries information.
    Status(u8),
    /// Value of a read, `None` when the key does not exist.
    Value(Option<Bytes>),
    /// Outcome of a conditional or unconditional write.
    Write(WriteOutcome),
    /// Value with its metadata, `None` when the key does not exist.
    Metadata(Option<MetadataValue>),
    /// Number of entries.
    Size(u64),
    /// Server statistics.
    Stats(HashMap<String, String>),
    /// Server capabilities.
    Ping(PingResponse),
    /// Entries of a bulk read.
    Entries(HashMap<Bytes, Bytes>),
    /// Keys of a bulk key read.
    Keys(HashSet<Bytes>),
    /// Id of a started iteration.
    IterationStarted(String),
    /// A batch of iterated entries.
    IterationBatch(IterationBatch),
    /// Result of a server task.
    Exec(Bytes),
    /// SASL mechanisms the server accepts.
    Mechanisms(Vec<String>),
    /// Result of one authentication round.
    Auth {
        /// `true` once the server considers the client authenticated.
        complete: bool,
        /// Challenge for the next round, empty when complete.
        challenge: Bytes,
    },
}

impl Response {
    fn unexpected(self, expected: &str) -> HotRodError {
        HotRodError::Decode(format!("expected {expected} response, got {self:?}"))
    }

    pub(crate) fn into_status(self) -> Result<u8> {
        match self {
            Self::Status(status) => Ok(status),
            other => Err(other.unexpected("status")),
        }
    }

    pub(crate) fn into_value(self) -> Result<Option<Bytes>> {
        match self {
            Self::Value(value) => Ok(value),
            other => Err(other.unexpected("value")),
        }
    }

    pub(crate) fn into_write(self) -> Result<WriteOutcome> {
        match self {
            Self::Write(outcome) => Ok(outcome),
            other => Err(other.unexpected("write")),
        }
    }

    pub(crate) fn into_metadata(self) -> Result<Option<MetadataValue>> {
        match self {
            Self::Metadata(value) => Ok(value),
            other => Err(other.unexpected("metadata")),
        }
    }

    pub(crate) fn into_size(self) -> Result<u64> {
        match self {
            Self::Size(size) => Ok(size),
            other => Err(other.unexpected("size")),
        }
    }

    pub(crate) fn into_stats(self) -> Result<HashMap<String, String>> {
        match self {
            Self::Stats(stats) => Ok(stats),
            other => Err(other.unexpected("stats")),
        }
    }

    pub(crate) fn into_ping(self) -> Result<PingResponse> {
        match self {
            Self::Ping(ping) => Ok(ping),
            other => Err(other.unexpected("ping")),
        }
    }

    pub(crate) fn into_entries(self) -> Result<HashMap<Bytes, Bytes>> {
        match self {
            Self::Entries(entries) => Ok(entries),
            other => Err(other.unexpected("entries")),
        }
    }

    pub(crate) fn into_keys(self) -> Result<HashSet<Bytes>> {
        match self {
            Self::Keys(keys) => Ok(keys),
            other => Err(other.unexpected("keys")),
        }
    }

    pub(crate) fn into_iteration_id(self) -> Result<String> {
        match self {
            Self::IterationStarted(id) => Ok(id),
            other => Err(other.unexpected("iteration start")),
        }
    }

    pub(crate) fn into_iteration_batch(self) -> Result<IterationBatch> {
        match self {
            Self::IterationBatch(batch) => Ok(batch),
            other => Err(other.unexpected("iteration batch")),
        }
    }

    pub(crate) fn into_exec(self) -> Result<Bytes> {
        match self {
            Self::Exec(result) => Ok(result),
            other => Err(other.unexpected("exec")),
        }
    }

    pub(crate) fn into_mechanisms(self) -> Result<Vec<String>> {
        match self {
            Self::Mechanisms(mechanisms) => Ok(mechanisms),
            other => Err(other.unexpected("mechanism list")),
        }
    }

    pub(crate) fn into_auth(self) -> Result<(bool, Bytes)> {
        match self {
            Self::Auth {
                complete,
                challenge,
            } => Ok((complete, challenge)),
            other => Err(other.unexpected("auth")),
        }
    }
}

/// Status of a write and the previous value, when the server returned one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    status: u8,
    previous: Option<Bytes>,
}

impl WriteOutcome {
    pub(crate) fn new(status: u8, previous: Option<Bytes>) -> Self {
        Self { status, previous }
    }

    /// Raw status byte.
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Returns `true` when the write was applied.
    pub fn is_success(&self) -> bool {
        is_success(self.status)
    }

    /// Returns `true` when a condition prevented the write.
    pub fn is_not_executed(&self) -> bool {
        is_not_executed(self.status)
    }

    /// Returns `true` when the key did not exist.
    pub fn is_not_exist(&self) -> bool {
        is_not_exist(self.status)
    }

    /// Returns `true` when the server sent the previous value.
    pub fn has_previous(&self) -> bool {
        has_previous(self.status) && self.previous.is_some()
    }

    /// Previous value, if the server sent one.
    pub fn previous(&self) -> Option<&Bytes> {
        self.previous.as_ref()
    }

    /// Consumes the outcome, returning the previous value.
    pub fn into_previous(self) -> Option<Bytes> {
        self.previous
    }
}

/// Lifetime information of an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Creation time in milliseconds since the epoch, when the entry has a lifespan.
    pub created: Option<i64>,
    /// Lifespan, `None` when infinite.
    pub lifespan: Option<Duration>,
    /// Last access in milliseconds since the epoch, when the entry has a max idle.
    pub last_used: Option<i64>,
    /// Max idle, `None` when infinite.
    pub max_idle: Option<Duration>,
    /// Entry version, usable with the versioned replace and remove.
    pub version: i64,
}

/// A value read together with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataValue {
    /// Entry metadata.
    pub metadata: EntryMetadata,
    /// Marshalled value.
    pub value: Bytes,
}

impl MetadataValue {
    /// Entry version.
    pub fn version(&self) -> i64 {
        self.metadata.version
    }
}

/// What a server reported on ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResponse {
    /// Status byte.
    pub status: u8,
    /// Key media type configured on the cache.
    pub key_type: Option<MediaType>,
    /// Value media type configured on the cache.
    pub value_type: Option<MediaType>,
    /// Highest protocol version the server speaks.
    pub server_version: u8,
    /// Request opcodes the server accepts.
    pub supported_operations: Vec<u16>,
}

impl PingResponse {
    /// Returns `true` when the server answered successfully.
    pub fn is_success(&self) -> bool {
        is_success(self.status)
    }
}

/// One entry of an iteration batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationEntry {
    /// Marshalled key.
    pub key: Bytes,
    /// Marshalled value, or the projected values.
    pub values: Vec<Bytes>,
    /// Entry metadata, when requested at iteration start.
    pub metadata: Option<EntryMetadata>,
}

impl IterationEntry {
    /// The first value, which is the entry value without projections.
    pub fn value(&self) -> Option<&Bytes> {
        self.values.first()
    }
}

/// Entries returned by one iteration next call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationBatch {
    /// Segments the server finished with this batch.
    pub finished_segments: Vec<u32>,
    /// Entries of the batch.
    pub entries: Vec<IterationEntry>,
}

impl IterationBatch {
    /// Returns `true` when the iteration has no more entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotrod_core::protocol::{NOT_EXECUTED_WITH_PREVIOUS, NO_ERROR_STATUS};

    #[test]
    fn test_write_outcome_with_previous() {
        let outcome = WriteOutcome::new(NOT_EXECUTED_WITH_PREVIOUS, Some(Bytes::from_static(b"v1")));
        assert!(outcome.is_not_executed());
        assert!(outcome.has_previous());
        assert_eq!(outcome.previous().unwrap().as_ref(), b"v1");
    }

    #[test]
    fn test_write_outcome_without_previous() {
        let outcome = WriteOutcome::new(NO_ERROR_STATUS, None);
        assert!(outcome.is_success());
        assert!(!outcome.has_previous());
        assert!(outcome.into_previous().is_none());
    }

    #[test]
    fn test_unexpected_variant_is_decode_error() {
        let err = Response::Size(3).into_value().unwrap_err();
        assert!(matches!(err, HotRodError::Decode(_)));
    }
}
