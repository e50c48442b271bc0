//! Resumable response body decoders.
//!
//! A body may arrive over several reads. Each decoder consumes only complete
//! items from the buffer and keeps what it has read so far, so a later call
//! continues where the previous one stopped.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use hotrod_core::protocol::buf::{try_read, ReadResult, Reader};
use hotrod_core::protocol::{bitset_to_segments, has_previous, is_success, read_media_type, ResponseHeader};
use hotrod_core::Result;

use super::response::{
    EntryMetadata, IterationBatch, IterationEntry, MetadataValue, PingResponse, Response, WriteOutcome,
};

const INFINITE_LIFESPAN: u8 = 0x01;
const INFINITE_MAXIDLE: u8 = 0x02;

/// Decodes the body of one response, possibly over several calls.
pub trait BodyDecoder: Send {
    /// Consumes body bytes from `src`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Bytes of items that
    /// were fully read are removed from `src`; partial items are left.
    fn decode(&mut self, header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>>;
}

/// Reads one complete item and removes its bytes from `src`.
fn step<T>(src: &mut BytesMut, f: impl FnOnce(&mut Reader<'_>) -> ReadResult<T>) -> Result<Option<T>> {
    match try_read(&src[..], f)? {
        Some((value, used)) => {
            src.advance(used);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn read_metadata(r: &mut Reader<'_>) -> ReadResult<EntryMetadata> {
    let flags = r.read_u8()?;
    let mut metadata = EntryMetadata::default();
    if flags & INFINITE_LIFESPAN == 0 {
        metadata.created = Some(r.read_i64()?);
        metadata.lifespan = Some(Duration::from_secs(u64::from(r.read_vint()?)));
    }
    if flags & INFINITE_MAXIDLE == 0 {
        metadata.last_used = Some(r.read_i64()?);
        metadata.max_idle = Some(Duration::from_secs(u64::from(r.read_vint()?)));
    }
    metadata.version = r.read_i64()?;
    Ok(metadata)
}

/// Responses whose status byte is the whole answer.
#[derive(Debug, Default)]
pub struct StatusDecoder;

impl BodyDecoder for StatusDecoder {
    fn decode(&mut self, header: &ResponseHeader, _src: &mut BytesMut) -> Result<Option<Response>> {
        Ok(Some(Response::Status(header.status)))
    }
}

/// A value that is present only on success.
#[derive(Debug, Default)]
pub struct ValueDecoder;

impl BodyDecoder for ValueDecoder {
    fn decode(&mut self, header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        if !is_success(header.status) {
            return Ok(Some(Response::Value(None)));
        }
        Ok(step(src, |r| r.read_array())?.map(|value| Response::Value(Some(value))))
    }
}

/// Write status followed by the previous value when the status says so.
#[derive(Debug, Default)]
pub struct WriteDecoder;

impl BodyDecoder for WriteDecoder {
    fn decode(&mut self, header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        if !has_previous(header.status) {
            return Ok(Some(Response::Write(WriteOutcome::new(header.status, None))));
        }
        Ok(step(src, |r| r.read_array())?.map(|previous| {
            let previous = (!previous.is_empty()).then_some(previous);
            Response::Write(WriteOutcome::new(header.status, previous))
        }))
    }
}

/// Value with lifespan, max idle and version.
#[derive(Debug, Default)]
pub struct MetadataDecoder;

impl BodyDecoder for MetadataDecoder {
    fn decode(&mut self, header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        if !is_success(header.status) {
            return Ok(Some(Response::Metadata(None)));
        }
        let read = step(src, |r| {
            let metadata = read_metadata(r)?;
            let value = r.read_array()?;
            Ok(MetadataValue { metadata, value })
        })?;
        Ok(read.map(|value| Response::Metadata(Some(value))))
    }
}

/// Entry count as a vlong.
#[derive(Debug, Default)]
pub struct SizeDecoder;

impl BodyDecoder for SizeDecoder {
    fn decode(&mut self, _header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        Ok(step(src, |r| r.read_vlong())?.map(Response::Size))
    }
}

/// Progress through a count-prefixed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Counted {
    Count,
    Items { remaining: u32 },
}

impl Counted {
    /// Reads the count if it is still unknown. Returns the items left, or `None` if incomplete.
    fn remaining(&mut self, src: &mut BytesMut) -> Result<Option<u32>> {
        if let Counted::Count = self {
            match step(src, |r| r.read_vint())? {
                Some(count) => *self = Counted::Items { remaining: count },
                None => return Ok(None),
            }
        }
        match self {
            Counted::Items { remaining } => Ok(Some(*remaining)),
            Counted::Count => Ok(None),
        }
    }

    fn consumed_one(&mut self) {
        if let Counted::Items { remaining } = self {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

/// Server statistics as name/value pairs.
#[derive(Debug)]
pub struct StatsDecoder {
    phase: Counted,
    stats: HashMap<String, String>,
}

impl Default for StatsDecoder {
    fn default() -> Self {
        Self {
            phase: Counted::Count,
            stats: HashMap::new(),
        }
    }
}

impl BodyDecoder for StatsDecoder {
    fn decode(&mut self, _header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        loop {
            match self.phase.remaining(src)? {
                None => return Ok(None),
                Some(0) => return Ok(Some(Response::Stats(std::mem::take(&mut self.stats)))),
                Some(_) => {
                    let Some((name, value)) = step(src, |r| Ok((r.read_string()?, r.read_string()?)))?
                    else {
                        return Ok(None);
                    };
                    self.stats.insert(name, value);
                    self.phase.consumed_one();
                }
            }
        }
    }
}

/// Entries of a bulk read.
#[derive(Debug)]
pub struct GetAllDecoder {
    phase: Counted,
    entries: HashMap<Bytes, Bytes>,
}

impl Default for GetAllDecoder {
    fn default() -> Self {
        Self {
            phase: Counted::Count,
            entries: HashMap::new(),
        }
    }
}

impl BodyDecoder for GetAllDecoder {
    fn decode(&mut self, header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        if !is_success(header.status) {
            return Ok(Some(Response::Entries(HashMap::new())));
        }
        loop {
            match self.phase.remaining(src)? {
                None => return Ok(None),
                Some(0) => return Ok(Some(Response::Entries(std::mem::take(&mut self.entries)))),
                Some(_) => {
                    let Some((key, value)) = step(src, |r| Ok((r.read_array()?, r.read_array()?)))?
                    else {
                        return Ok(None);
                    };
                    self.entries.insert(key, value);
                    self.phase.consumed_one();
                }
            }
        }
    }
}

/// Keys, each preceded by a "more" marker and terminated by a zero marker.
#[derive(Debug, Default)]
pub struct BulkKeysDecoder {
    keys: HashSet<Bytes>,
}

impl BodyDecoder for BulkKeysDecoder {
    fn decode(&mut self, header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        if !is_success(header.status) {
            return Ok(Some(Response::Keys(HashSet::new())));
        }
        loop {
            let item = step(src, |r| match r.read_u8()? {
                0 => Ok(None),
                _ => r.read_array().map(Some),
            })?;
            match item {
                None => return Ok(None),
                Some(None) => return Ok(Some(Response::Keys(std::mem::take(&mut self.keys)))),
                Some(Some(key)) => {
                    self.keys.insert(key);
                }
            }
        }
    }
}

/// Media types, server version and supported opcodes.
#[derive(Debug, Default)]
pub struct PingDecoder;

impl BodyDecoder for PingDecoder {
    fn decode(&mut self, header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        let status = header.status;
        if !is_success(status) {
            return Ok(Some(Response::Ping(PingResponse {
                status,
                key_type: None,
                value_type: None,
                server_version: 0,
                supported_operations: Vec::new(),
            })));
        }
        let read = step(src, |r| {
            let key_type = read_media_type(r)?;
            let value_type = read_media_type(r)?;
            let server_version = r.read_u8()?;
            let count = r.read_vint()?;
            let mut supported_operations = Vec::with_capacity(count.min(256) as usize);
            for _ in 0..count {
                supported_operations.push(r.read_u16()?);
            }
            Ok(PingResponse {
                status,
                key_type,
                value_type,
                server_version,
                supported_operations,
            })
        })?;
        Ok(read.map(Response::Ping))
    }
}

/// Iteration id of a started iteration.
#[derive(Debug, Default)]
pub struct IterationStartDecoder;

impl BodyDecoder for IterationStartDecoder {
    fn decode(&mut self, _header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        Ok(step(src, |r| r.read_string())?.map(Response::IterationStarted))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterationPhase {
    Segments,
    Count,
    Projections { count: u32 },
    Entries { remaining: u32, projections: u32 },
}

/// Finished segments and a batch of entries.
#[derive(Debug)]
pub struct IterationNextDecoder {
    phase: IterationPhase,
    batch: IterationBatch,
}

impl IterationNextDecoder {
    /// Creates a decoder for a batch.
    pub fn new() -> Self {
        Self {
            phase: IterationPhase::Segments,
            batch: IterationBatch::default(),
        }
    }
}

impl Default for IterationNextDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyDecoder for IterationNextDecoder {
    fn decode(&mut self, _header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        loop {
            match self.phase {
                IterationPhase::Segments => {
                    let Some(bits) = step(src, |r| r.read_array())? else {
                        return Ok(None);
                    };
                    self.batch.finished_segments = bitset_to_segments(&bits);
                    self.phase = IterationPhase::Count;
                }
                IterationPhase::Count => {
                    let Some(count) = step(src, |r| r.read_vint())? else {
                        return Ok(None);
                    };
                    self.phase = if count == 0 {
                        IterationPhase::Entries {
                            remaining: 0,
                            projections: 1,
                        }
                    } else {
                        IterationPhase::Projections { count }
                    };
                }
                IterationPhase::Projections { count } => {
                    let Some(projections) = step(src, |r| r.read_vint())? else {
                        return Ok(None);
                    };
                    self.batch.entries.reserve(count.min(1024) as usize);
                    self.phase = IterationPhase::Entries {
                        remaining: count,
                        projections,
                    };
                }
                IterationPhase::Entries { remaining: 0, .. } => {
                    return Ok(Some(Response::IterationBatch(std::mem::take(&mut self.batch))));
                }
                IterationPhase::Entries {
                    remaining,
                    projections,
                } => {
                    let entry = step(src, |r| {
                        let metadata = match r.read_u8()? {
                            1 => Some(read_metadata(r)?),
                            _ => None,
                        };
                        let key = r.read_array()?;
                        let mut values = Vec::with_capacity(projections as usize);
                        for _ in 0..projections {
                            values.push(r.read_array()?);
                        }
                        Ok(IterationEntry {
                            key,
                            values,
                            metadata,
                        })
                    })?;
                    let Some(entry) = entry else {
                        return Ok(None);
                    };
                    self.batch.entries.push(entry);
                    self.phase = IterationPhase::Entries {
                        remaining: remaining - 1,
                        projections,
                    };
                }
            }
        }
    }
}

/// Result of a server task.
#[derive(Debug, Default)]
pub struct ExecDecoder;

impl BodyDecoder for ExecDecoder {
    fn decode(&mut self, _header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        Ok(step(src, |r| r.read_array())?.map(Response::Exec))
    }
}

/// SASL mechanism names.
#[derive(Debug)]
pub struct AuthMechListDecoder {
    phase: Counted,
    mechanisms: Vec<String>,
}

impl Default for AuthMechListDecoder {
    fn default() -> Self {
        Self {
            phase: Counted::Count,
            mechanisms: Vec::new(),
        }
    }
}

impl BodyDecoder for AuthMechListDecoder {
    fn decode(&mut self, _header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        loop {
            match self.phase.remaining(src)? {
                None => return Ok(None),
                Some(0) => {
                    return Ok(Some(Response::Mechanisms(std::mem::take(&mut self.mechanisms))));
                }
                Some(_) => {
                    let Some(name) = step(src, |r| r.read_string())? else {
                        return Ok(None);
                    };
                    self.mechanisms.push(name);
                    self.phase.consumed_one();
                }
            }
        }
    }
}

/// Completion flag and challenge of an authentication round.
#[derive(Debug, Default)]
pub struct AuthDecoder;

impl BodyDecoder for AuthDecoder {
    fn decode(&mut self, _header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        let read = step(src, |r| Ok((r.read_u8()? != 0, r.read_array()?)))?;
        Ok(read.map(|(complete, challenge)| Response::Auth {
            complete,
            challenge,
        }))
    }
}
