//! Request envelope: header parameters, flags and data formats.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use super::constants::response_opcode;

/// Request flags, sent as a vint bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u32);

impl Flags {
    /// No flags.
    pub const NONE: Flags = Flags(0);
    /// Ask the server to return the previous value of a write.
    pub const FORCE_RETURN_VALUE: Flags = Flags(0x0001);
    /// Use the cache's default lifespan.
    pub const DEFAULT_LIFESPAN: Flags = Flags(0x0002);
    /// Use the cache's default max idle.
    pub const DEFAULT_MAXIDLE: Flags = Flags(0x0004);
    /// Do not load from a cache store.
    pub const SKIP_CACHE_LOAD: Flags = Flags(0x0008);
    /// Do not update indexes.
    pub const SKIP_INDEXING: Flags = Flags(0x0010);
    /// Do not notify listeners of this write.
    pub const SKIP_LISTENER_NOTIFICATION: Flags = Flags(0x0020);

    /// Builds flags from their wire value.
    pub const fn from_bits(bits: u32) -> Self {
        Flags(bits)
    }

    /// The wire value.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` when every bit of `other` is set.
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns a copy with `other` added.
    pub const fn with(self, other: Flags) -> Self {
        Flags(self.0 | other.0)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.with(rhs)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Name part of a media type: either a server-known id or a full string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaTypeName {
    /// Predefined id shared by client and server.
    Id(u32),
    /// Full media type string such as `application/json`.
    Named(String),
}

/// A media type with optional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// Type name.
    pub name: MediaTypeName,
    /// Parameters such as `charset`.
    pub params: Vec<(String, String)>,
}

impl MediaType {
    /// Creates a named media type without parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: MediaTypeName::Named(name.into()),
            params: Vec::new(),
        }
    }

    /// Adds a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// `application/octet-stream`, the format of raw byte payloads.
    pub fn octet_stream() -> Self {
        Self::new("application/octet-stream")
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            MediaTypeName::Id(id) => write!(f, "#{id}")?,
            MediaTypeName::Named(name) => f.write_str(name)?,
        }
        for (k, v) in &self.params {
            write!(f, "; {k}={v}")?;
        }
        Ok(())
    }
}

/// Key and value formats requested for an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataFormat {
    /// Format of keys.
    pub key_type: Option<MediaType>,
    /// Format of values.
    pub value_type: Option<MediaType>,
}

/// Per-operation request envelope.
///
/// Built once per logical call. The message id never changes; the topology
/// age is refreshed before every attempt and the topology id and client
/// intelligence are captured when the header is written.
#[derive(Debug, Clone)]
pub struct HeaderParams {
    /// Request opcode.
    pub op_code: u8,
    /// Expected response opcode.
    pub op_resp_code: u8,
    /// Request flags.
    pub flags: Flags,
    /// Transaction marker, 0 outside transactions.
    pub tx_marker: u8,
    /// Message id, unique per client.
    pub message_id: u64,
    /// Optional key/value formats.
    pub data_format: Option<DataFormat>,
    /// Target cache, empty for the default cache.
    pub cache_name: Bytes,
    /// Topology age the request was sent under.
    pub topology_age: i32,
    /// Topology id written into the header.
    pub topology_id: i32,
    /// Client intelligence written into the header.
    pub client_intelligence: u8,
}

impl HeaderParams {
    /// Creates a header for `op_code` with its paired response opcode.
    pub fn new(op_code: u8, message_id: u64) -> Self {
        Self {
            op_code,
            op_resp_code: response_opcode(op_code),
            flags: Flags::NONE,
            tx_marker: 0,
            message_id,
            data_format: None,
            cache_name: Bytes::new(),
            topology_age: 0,
            topology_id: 0,
            client_intelligence: 0,
        }
    }

    /// Sets the target cache.
    pub fn cache_name(mut self, name: impl Into<Bytes>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Sets the request flags.
    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the key and value media types.
    pub fn data_format(mut self, format: Option<DataFormat>) -> Self {
        self.data_format = format;
        self
    }

    /// Sets the topology age the request is sent under.
    pub fn topology_age(mut self, age: i32) -> Self {
        self.topology_age = age;
        self
    }

    /// Cache name for log output.
    pub fn cache_name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.cache_name).into_owned()
    }
}

/// Source of message ids, owned by one client instance.
#[derive(Debug)]
pub struct MessageIdGenerator {
    next: AtomicU64,
}

impl MessageIdGenerator {
    /// Creates a generator whose first id is 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns a fresh id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::GET_REQUEST;

    #[test]
    fn test_flags_combine() {
        let flags = Flags::FORCE_RETURN_VALUE | Flags::SKIP_CACHE_LOAD;
        assert_eq!(flags.bits(), 0x09);
        assert!(flags.contains(Flags::FORCE_RETURN_VALUE));
        assert!(!flags.contains(Flags::SKIP_INDEXING));
    }

    #[test]
    fn test_header_pairs_response_opcode() {
        let header = HeaderParams::new(GET_REQUEST, 42).cache_name("books");
        assert_eq!(header.op_resp_code, GET_REQUEST + 1);
        assert_eq!(header.message_id, 42);
        assert_eq!(header.cache_name_lossy(), "books");
    }

    #[test]
    fn test_message_ids_are_unique_across_threads() {
        let generator = std::sync::Arc::new(MessageIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let g = generator.clone();
                std::thread::spawn(move || (0..1000).map(|_| g.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000);
    }

    #[test]
    fn test_media_type_display() {
        let mt = MediaType::new("text/plain").with_param("charset", "UTF-8");
        assert_eq!(mt.to_string(), "text/plain; charset=UTF-8");
    }
}
