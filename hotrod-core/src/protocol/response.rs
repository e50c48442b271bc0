//! Response header, topology update and pushed event parsing.
//!
//! Every function here reads one complete unit from a [`Reader`] or reports
//! [`ReadError::Incomplete`] so the caller can wait for more bytes.

use bytes::Bytes;

use super::buf::{ReadError, ReadResult, Reader};
use super::constants::{
    is_event_opcode, CACHE_ENTRY_CREATED_EVENT_RESPONSE, CACHE_ENTRY_EXPIRED_EVENT_RESPONSE,
    CACHE_ENTRY_MODIFIED_EVENT_RESPONSE, CACHE_ENTRY_REMOVED_EVENT_RESPONSE, RESPONSE_MAGIC,
};
use super::header::{MediaType, MediaTypeName};
use crate::error::HotRodError;
use crate::topology::ClientIntelligence;

/// Ownership data of a hash-aware topology update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashUpdate {
    /// Hash function version, 0 when the cache is not distributed.
    pub hash_function_version: u8,
    /// Number of segments.
    pub num_segments: u32,
    /// Owner indexes into the server list, per segment. Empty for version 0.
    pub segment_owners: Vec<Vec<u32>>,
}

/// New cluster view carried by a response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyUpdate {
    /// New topology id.
    pub topology_id: i32,
    /// Unresolved server addresses as host and port.
    pub servers: Vec<(String, u16)>,
    /// Segment ownership, present only for hash-aware requests.
    pub hash: Option<HashUpdate>,
}

/// Fixed part of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Message id of the request this answers.
    pub message_id: u64,
    /// Response opcode.
    pub op_code: u8,
    /// Status byte.
    pub status: u8,
    /// Topology change, if the server sent one.
    pub topology: Option<TopologyUpdate>,
}

/// First bytes of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundStart {
    /// A response to a request.
    Response(ResponseHeader),
    /// A pushed listener event; the event body follows.
    Event {
        /// Message id, usually 0 for events.
        message_id: u64,
        /// Event opcode.
        op_code: u8,
    },
}

/// Reads the magic byte and message id.
pub fn read_message_id(r: &mut Reader<'_>) -> ReadResult<u64> {
    let magic = r.read_u8()?;
    if magic != RESPONSE_MAGIC {
        return Err(HotRodError::Decode(format!(
            "invalid magic number: expected {RESPONSE_MAGIC:#04x}, received {magic:#04x}"
        ))
        .into());
    }
    r.read_vlong()
}

/// Reads a response or event start.
///
/// `intelligence` maps the message id to the intelligence its request was
/// sent with, which decides whether segment ownership follows the servers.
pub fn read_inbound_start(
    r: &mut Reader<'_>,
    intelligence: impl FnOnce(u64) -> u8,
) -> ReadResult<InboundStart> {
    let message_id = read_message_id(r)?;
    let op_code = r.read_u8()?;
    if is_event_opcode(op_code) {
        return Ok(InboundStart::Event {
            message_id,
            op_code,
        });
    }
    let status = r.read_u8()?;
    let topology = match r.read_u8()? {
        1 => Some(read_topology_update(r, intelligence(message_id))?),
        _ => None,
    };
    Ok(InboundStart::Response(ResponseHeader {
        message_id,
        op_code,
        status,
        topology,
    }))
}

/// Reads a topology update following a set topology marker.
pub fn read_topology_update(r: &mut Reader<'_>, intelligence: u8) -> ReadResult<TopologyUpdate> {
    let topology_id = r.read_vint()? as i32;
    let cluster_size = r.read_vint()? as usize;
    let mut servers = Vec::with_capacity(cluster_size.min(1024));
    for _ in 0..cluster_size {
        let host = r.read_string()?;
        let port = r.read_u16()?;
        servers.push((host, port));
    }

    let hash = if intelligence == ClientIntelligence::HashDistributionAware.value() {
        let hash_function_version = r.read_u8()?;
        let num_segments = r.read_vint()?;
        let mut segment_owners = Vec::new();
        if hash_function_version > 0 {
            segment_owners.reserve(num_segments.min(65_536) as usize);
            for _ in 0..num_segments {
                let owners = r.read_u8()?;
                let mut segment = Vec::with_capacity(owners as usize);
                for _ in 0..owners {
                    let index = r.read_vint()?;
                    if index as usize >= servers.len() {
                        return Err(HotRodError::Decode(format!(
                            "segment owner index {index} outside cluster of {}",
                            servers.len()
                        ))
                        .into());
                    }
                    segment.push(index);
                }
                segment_owners.push(segment);
            }
        }
        Some(HashUpdate {
            hash_function_version,
            num_segments,
            segment_owners,
        })
    } else {
        None
    };

    Ok(TopologyUpdate {
        topology_id,
        servers,
        hash,
    })
}

/// Reads a media type as written in request headers and ping responses.
pub fn read_media_type(r: &mut Reader<'_>) -> ReadResult<Option<MediaType>> {
    let name = match r.read_u8()? {
        0 => return Ok(None),
        1 => MediaTypeName::Id(r.read_vint()?),
        2 => MediaTypeName::Named(r.read_string()?),
        other => {
            return Err(
                HotRodError::Decode(format!("unknown media type marker {other}")).into(),
            )
        }
    };
    let count = r.read_vint()?;
    let mut params = Vec::new();
    for _ in 0..count {
        params.push((r.read_string()?, r.read_string()?));
    }
    Ok(Some(MediaType { name, params }))
}

/// Kind of entry change an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Entry created.
    Created,
    /// Entry modified.
    Modified,
    /// Entry removed.
    Removed,
    /// Entry expired.
    Expired,
}

impl EventType {
    /// Maps an event opcode.
    pub fn from_opcode(op_code: u8) -> Option<Self> {
        match op_code {
            CACHE_ENTRY_CREATED_EVENT_RESPONSE => Some(Self::Created),
            CACHE_ENTRY_MODIFIED_EVENT_RESPONSE => Some(Self::Modified),
            CACHE_ENTRY_REMOVED_EVENT_RESPONSE => Some(Self::Removed),
            CACHE_ENTRY_EXPIRED_EVENT_RESPONSE => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Payload of a pushed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Key and entry version.
    Versioned {
        /// Marshalled key.
        key: Bytes,
        /// Entry version after the change.
        version: i64,
    },
    /// Key only.
    Key(Bytes),
    /// Converter output.
    Custom {
        /// Marshalled event data.
        data: Bytes,
        /// `true` when the converter asked for raw bytes.
        raw: bool,
    },
}

/// An event as pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    /// Listener the event is addressed to.
    pub listener_id: Bytes,
    /// Change kind.
    pub event_type: EventType,
    /// `true` when the server may have delivered it before.
    pub retried: bool,
    /// Event data.
    pub payload: EventPayload,
}

impl CacheEvent {
    /// Key of a non-custom event.
    pub fn key(&self) -> Option<&Bytes> {
        match &self.payload {
            EventPayload::Versioned { key, .. } | EventPayload::Key(key) => Some(key),
            EventPayload::Custom { .. } => None,
        }
    }
}

/// Reads an event body after [`InboundStart::Event`].
pub fn read_cache_event(r: &mut Reader<'_>, op_code: u8) -> ReadResult<CacheEvent> {
    let _status = r.read_u8()?;
    let _topology_marker = r.read_u8()?;
    let event_type = EventType::from_opcode(op_code).ok_or_else(|| {
        ReadError::Invalid(HotRodError::Decode(format!("unknown event {op_code:#04x}")))
    })?;
    let listener_id = r.read_array()?;
    let is_custom = r.read_u8()?;
    let retried = r.read_u8()? == 1;

    let payload = match is_custom {
        1 | 2 => EventPayload::Custom {
            data: r.read_array()?,
            raw: is_custom == 2,
        },
        _ => {
            let key = r.read_array()?;
            match event_type {
                EventType::Created | EventType::Modified => EventPayload::Versioned {
                    key,
                    version: r.read_i64()?,
                },
                EventType::Removed | EventType::Expired => EventPayload::Key(key),
            }
        }
    };

    Ok(CacheEvent {
        listener_id,
        event_type,
        retried: retried && event_type != EventType::Expired,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::buf::{try_read, write_array, write_string, write_vint, write_vlong};
    use bytes::{BufMut, BytesMut};

    fn response_prefix(buf: &mut BytesMut, message_id: u64, op_code: u8, status: u8) {
        buf.put_u8(RESPONSE_MAGIC);
        write_vlong(buf, message_id);
        buf.put_u8(op_code);
        buf.put_u8(status);
    }

    #[test]
    fn test_plain_response_header() {
        let mut buf = BytesMut::new();
        response_prefix(&mut buf, 9, 0x04, 0x00);
        buf.put_u8(0);
        let (start, used) = try_read(&buf, |r| read_inbound_start(r, |_| 3)).unwrap().unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(
            start,
            InboundStart::Response(ResponseHeader {
                message_id: 9,
                op_code: 0x04,
                status: 0,
                topology: None,
            })
        );
    }

    fn topology_bytes(buf: &mut BytesMut) {
        buf.put_u8(1);
        write_vint(buf, 12);
        write_vint(buf, 2);
        write_string(buf, "10.0.0.1");
        buf.put_u16(11222);
        write_string(buf, "10.0.0.2");
        buf.put_u16(11222);
    }

    #[test]
    fn test_hash_aware_topology() {
        let mut buf = BytesMut::new();
        response_prefix(&mut buf, 1, 0x18, 0);
        topology_bytes(&mut buf);
        buf.put_u8(3);
        write_vint(&mut buf, 2);
        buf.put_u8(2);
        write_vint(&mut buf, 0);
        write_vint(&mut buf, 1);
        buf.put_u8(1);
        write_vint(&mut buf, 1);

        let (start, _) = try_read(&buf, |r| read_inbound_start(r, |_| 3)).unwrap().unwrap();
        let InboundStart::Response(header) = start else {
            panic!("expected response");
        };
        let topology = header.topology.unwrap();
        assert_eq!(topology.topology_id, 12);
        assert_eq!(topology.servers[1], ("10.0.0.2".to_string(), 11222));
        let hash = topology.hash.unwrap();
        assert_eq!(hash.segment_owners, vec![vec![0, 1], vec![1]]);
    }

    #[test]
    fn test_topology_aware_skips_hash() {
        let mut buf = BytesMut::new();
        response_prefix(&mut buf, 1, 0x18, 0);
        topology_bytes(&mut buf);
        let (start, used) = try_read(&buf, |r| read_inbound_start(r, |_| 2)).unwrap().unwrap();
        assert_eq!(used, buf.len());
        let InboundStart::Response(header) = start else {
            panic!("expected response");
        };
        assert!(header.topology.unwrap().hash.is_none());
    }

    #[test]
    fn test_partial_header_is_incomplete() {
        let mut buf = BytesMut::new();
        response_prefix(&mut buf, 1, 0x18, 0);
        topology_bytes(&mut buf);
        for cut in 0..buf.len() {
            assert!(try_read(&buf[..cut], |r| read_inbound_start(r, |_| 2))
                .unwrap()
                .is_none());
        }
    }

    #[test]
    fn test_bad_magic() {
        let buf = [0xA0u8, 0x01, 0x04, 0x00, 0x00];
        assert!(try_read(&buf, |r| read_inbound_start(r, |_| 1)).is_err());
    }

    #[test]
    fn test_owner_index_out_of_range() {
        let mut buf = BytesMut::new();
        response_prefix(&mut buf, 1, 0x18, 0);
        topology_bytes(&mut buf);
        buf.put_u8(3);
        write_vint(&mut buf, 1);
        buf.put_u8(1);
        write_vint(&mut buf, 5);
        assert!(try_read(&buf, |r| read_inbound_start(r, |_| 3)).is_err());
    }

    #[test]
    fn test_created_event() {
        let mut buf = BytesMut::new();
        buf.put_u8(RESPONSE_MAGIC);
        write_vlong(&mut buf, 0);
        buf.put_u8(CACHE_ENTRY_CREATED_EVENT_RESPONSE);
        buf.put_u8(0);
        buf.put_u8(0);
        write_array(&mut buf, b"listener-id");
        buf.put_u8(0);
        buf.put_u8(1);
        write_array(&mut buf, b"k");
        buf.put_i64(42);

        let (event, used) = try_read(&buf, |r| match read_inbound_start(r, |_| 1)? {
            InboundStart::Event { op_code, .. } => read_cache_event(r, op_code),
            other => panic!("unexpected {other:?}"),
        })
        .unwrap()
        .unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(event.event_type, EventType::Created);
        assert!(event.retried);
        assert_eq!(
            event.payload,
            EventPayload::Versioned {
                key: Bytes::from_static(b"k"),
                version: 42
            }
        );
    }

    #[test]
    fn test_raw_custom_event() {
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u8(0);
        write_array(&mut buf, b"id");
        buf.put_u8(2);
        buf.put_u8(0);
        write_array(&mut buf, b"payload");
        let (event, _) = try_read(&buf, |r| read_cache_event(r, CACHE_ENTRY_REMOVED_EVENT_RESPONSE))
            .unwrap()
            .unwrap();
        assert_eq!(event.key(), None);
        assert_eq!(
            event.payload,
            EventPayload::Custom {
                data: Bytes::from_static(b"payload"),
                raw: true
            }
        );
    }

    #[test]
    fn test_read_media_type() {
        let mut buf = BytesMut::new();
        buf.put_u8(2);
        write_string(&mut buf, "application/json");
        write_vint(&mut buf, 1);
        write_string(&mut buf, "charset");
        write_string(&mut buf, "UTF-8");
        buf.put_u8(0);
        let (pair, _) = try_read(&buf, |r| Ok((read_media_type(r)?, read_media_type(r)?)))
            .unwrap()
            .unwrap();
        assert_eq!(
            pair.0,
            Some(MediaType::new("application/json").with_param("charset", "UTF-8"))
        );
        assert_eq!(pair.1, None);
    }
}
