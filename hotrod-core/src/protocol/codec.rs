//! Version-specific request encoding.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::buf::{
    array_size, vint_size, vlong_size, write_array, write_optional_array, write_optional_string,
    write_signed_vint, write_string, write_vint, write_vlong,
};
use super::constants::{REQUEST_MAGIC, VERSION_30, VERSION_31};
use super::expiration::ExpirationParams;
use super::header::{DataFormat, HeaderParams, MediaType, MediaTypeName};
use crate::error::{HotRodError, Result};
use crate::topology::ClientTopology;

/// A server-side factory referenced by name, with marshalled parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFactory {
    /// Factory name registered on the server.
    pub name: String,
    /// Marshalled parameters.
    pub params: Vec<Bytes>,
}

impl NamedFactory {
    /// Creates a factory reference without parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Adds a marshalled parameter.
    pub fn with_param(mut self, param: impl Into<Bytes>) -> Self {
        self.params.push(param.into());
        self
    }
}

/// Subscription options sent when registering a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientListenerParams {
    /// Receive a created event for every existing entry on registration.
    pub include_current_state: bool,
    /// Server-side event filter.
    pub filter_factory: Option<NamedFactory>,
    /// Server-side event converter.
    pub converter_factory: Option<NamedFactory>,
    /// Deliver custom events as raw bytes.
    pub use_raw_data: bool,
    /// Bitmask of event types to receive.
    pub interests: u8,
}

/// Options of an iteration start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationStartParams {
    /// Segments to iterate, `None` for all.
    pub segments: Option<Vec<u32>>,
    /// Optional server-side filter/converter.
    pub filter_converter: Option<NamedFactory>,
    /// Entries per batch.
    pub batch_size: u32,
    /// Include entry metadata.
    pub metadata: bool,
}

/// Encodes a segment set as a little-endian bitset without trailing zero bytes.
pub fn segments_to_bitset(segments: &[u32]) -> Vec<u8> {
    let Some(max) = segments.iter().max() else {
        return Vec::new();
    };
    let mut bits = vec![0u8; (*max as usize / 8) + 1];
    for s in segments {
        bits[*s as usize / 8] |= 1 << (s % 8);
    }
    bits
}

/// Decodes a little-endian bitset into segment numbers.
pub fn bitset_to_segments(bits: &[u8]) -> Vec<u32> {
    let mut segments = Vec::new();
    for (i, byte) in bits.iter().enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) != 0 {
                segments.push((i * 8 + bit) as u32);
            }
        }
    }
    segments
}

/// Per-protocol-version request encoder.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Protocol version byte.
    fn version(&self) -> u8;

    /// Upper bound of the bytes [`Codec::write_header`] emits.
    fn estimate_header_size(&self, params: &HeaderParams, topology: &ClientTopology) -> usize;

    /// Writes the request header.
    ///
    /// Records the topology id and intelligence actually sent into `params`,
    /// since the response parser needs the intelligence.
    fn write_header(&self, buf: &mut BytesMut, params: &mut HeaderParams, topology: &ClientTopology);

    /// Bytes [`Codec::write_expiration_params`] emits.
    fn estimate_expiration_size(&self, expiration: ExpirationParams) -> usize {
        let (_, lifespan, max_idle) = expiration.encoded();
        1 + lifespan.map_or(0, vlong_size) + max_idle.map_or(0, vlong_size)
    }

    /// Writes the time-units byte and the present lifespan/max-idle values.
    fn write_expiration_params(&self, buf: &mut BytesMut, expiration: ExpirationParams) {
        let (units, lifespan, max_idle) = expiration.encoded();
        buf.put_u8(units);
        if let Some(v) = lifespan {
            write_vlong(buf, v);
        }
        if let Some(v) = max_idle {
            write_vlong(buf, v);
        }
    }

    /// Writes listener options, without the listener id and interests.
    fn write_client_listener_params(&self, buf: &mut BytesMut, params: &ClientListenerParams) {
        buf.put_u8(u8::from(params.include_current_state));
        write_named_factory(buf, params.filter_factory.as_ref());
        write_named_factory(buf, params.converter_factory.as_ref());
        buf.put_u8(u8::from(params.use_raw_data));
    }

    /// Writes the listener interest bitmask.
    fn write_client_listener_interests(&self, buf: &mut BytesMut, interests: u8) {
        write_vint(buf, u32::from(interests));
    }

    /// Writes the bloom filter size of a near-cache listener.
    fn write_bloom_filter(&self, buf: &mut BytesMut, bloom_filter_bits: u32) -> Result<()>;

    /// Writes an iteration start body.
    fn write_iteration_start(&self, buf: &mut BytesMut, params: &IterationStartParams) {
        match &params.segments {
            None => write_signed_vint(buf, -1),
            Some(segments) => write_optional_array(buf, Some(&segments_to_bitset(segments))),
        }
        write_optional_string(buf, params.filter_converter.as_ref().map(|f| f.name.as_str()));
        if let Some(factory) = &params.filter_converter {
            buf.put_u8(factory.params.len() as u8);
            for p in &factory.params {
                write_array(buf, p);
            }
        }
        write_vint(buf, params.batch_size);
        buf.put_u8(u8::from(params.metadata));
    }
}

fn write_named_factory(buf: &mut BytesMut, factory: Option<&NamedFactory>) {
    match factory {
        Some(f) if !f.name.is_empty() => {
            write_string(buf, &f.name);
            buf.put_u8(f.params.len() as u8);
            for p in &f.params {
                write_array(buf, p);
            }
        }
        _ => write_string(buf, ""),
    }
}

fn write_media_type(buf: &mut BytesMut, media_type: Option<&MediaType>) {
    let Some(mt) = media_type else {
        buf.put_u8(0);
        return;
    };
    match &mt.name {
        MediaTypeName::Id(id) => {
            buf.put_u8(1);
            write_vint(buf, *id);
        }
        MediaTypeName::Named(name) => {
            buf.put_u8(2);
            write_string(buf, name);
        }
    }
    write_vint(buf, mt.params.len() as u32);
    for (k, v) in &mt.params {
        write_string(buf, k);
        write_string(buf, v);
    }
}

fn media_type_size(media_type: Option<&MediaType>) -> usize {
    let Some(mt) = media_type else {
        return 1;
    };
    let name = match &mt.name {
        MediaTypeName::Id(id) => vint_size(*id),
        MediaTypeName::Named(name) => array_size(name.len()),
    };
    let params: usize = mt
        .params
        .iter()
        .map(|(k, v)| array_size(k.len()) + array_size(v.len()))
        .sum();
    1 + name + vint_size(mt.params.len() as u32) + params
}

fn write_header_v3(
    buf: &mut BytesMut,
    params: &mut HeaderParams,
    topology: &ClientTopology,
    version: u8,
) {
    let intelligence = topology.intelligence.value();
    params.client_intelligence = intelligence;
    params.topology_id = topology.topology_id;

    buf.put_u8(REQUEST_MAGIC);
    write_vlong(buf, params.message_id);
    buf.put_u8(version);
    buf.put_u8(params.op_code);
    write_array(buf, &params.cache_name);
    write_vint(buf, params.flags.bits());
    buf.put_u8(intelligence);
    write_vint(buf, topology.topology_id as u32);

    let format = params.data_format.as_ref();
    write_media_type(buf, format.and_then(|f: &DataFormat| f.key_type.as_ref()));
    write_media_type(buf, format.and_then(|f| f.value_type.as_ref()));

    tracing::trace!(
        cache = %params.cache_name_lossy(),
        message_id = params.message_id,
        op_code = params.op_code,
        flags = params.flags.bits(),
        topology_id = topology.topology_id,
        "wrote request header"
    );
}

fn estimate_header_v3(params: &HeaderParams, topology: &ClientTopology) -> usize {
    let format = params.data_format.as_ref();
    1 + vlong_size(params.message_id)
        + 1
        + 1
        + array_size(params.cache_name.len())
        + vint_size(params.flags.bits())
        + 1
        + vint_size(topology.topology_id as u32)
        + media_type_size(format.and_then(|f| f.key_type.as_ref()))
        + media_type_size(format.and_then(|f| f.value_type.as_ref()))
}

/// Protocol 3.0 encoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct Codec30;

impl Codec for Codec30 {
    fn version(&self) -> u8 {
        VERSION_30
    }

    fn estimate_header_size(&self, params: &HeaderParams, topology: &ClientTopology) -> usize {
        estimate_header_v3(params, topology)
    }

    fn write_header(&self, buf: &mut BytesMut, params: &mut HeaderParams, topology: &ClientTopology) {
        write_header_v3(buf, params, topology, VERSION_30);
    }

    fn write_bloom_filter(&self, _buf: &mut BytesMut, bloom_filter_bits: u32) -> Result<()> {
        if bloom_filter_bits > 0 {
            return Err(HotRodError::Unsupported(
                "bloom filter near caching requires protocol 3.1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Protocol 3.1 encoder, adding bloom filter near-cache listeners.
#[derive(Debug, Default, Clone, Copy)]
pub struct Codec31;

impl Codec for Codec31 {
    fn version(&self) -> u8 {
        VERSION_31
    }

    fn estimate_header_size(&self, params: &HeaderParams, topology: &ClientTopology) -> usize {
        estimate_header_v3(params, topology)
    }

    fn write_header(&self, buf: &mut BytesMut, params: &mut HeaderParams, topology: &ClientTopology) {
        write_header_v3(buf, params, topology, VERSION_31);
    }

    fn write_bloom_filter(&self, buf: &mut BytesMut, bloom_filter_bits: u32) -> Result<()> {
        write_vint(buf, bloom_filter_bits);
        Ok(())
    }
}

/// Returns the encoder for a protocol version byte.
pub fn codec_for_version(version: u8) -> Result<Box<dyn Codec>> {
    match version {
        VERSION_30 => Ok(Box::new(Codec30)),
        VERSION_31 => Ok(Box::new(Codec31)),
        other => Err(HotRodError::Configuration(format!(
            "unsupported protocol version {other}"
        ))),
    }
}
