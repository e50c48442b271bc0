//! Inbound frame decoder shared by every operation on a channel.
//!
//! Responses are not length-prefixed, so the decoder reads the response
//! header itself and hands the body to the decoder the waiting operation
//! registered. Body decoding state therefore lives with the operation.

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};
use hotrod_core::protocol::buf::try_read;
use hotrod_core::protocol::{
    is_error, read_cache_event, read_inbound_start, CacheEvent, InboundStart, ResponseHeader,
    ERROR_RESPONSE,
};
use hotrod_core::{ClientIntelligence, HotRodError, Result};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::codec::Decoder;

use crate::operations::{BodyDecoder, Response};

/// An operation waiting for its response on a channel.
pub(crate) struct PendingOperation {
    pub(crate) decoder: Box<dyn BodyDecoder>,
    pub(crate) reply: oneshot::Sender<Result<Response>>,
    pub(crate) expected_op_code: u8,
    pub(crate) intelligence: u8,
    pub(crate) cache_name: Bytes,
    pub(crate) topology_age: i32,
}

/// What the reader needs once an operation has its outcome.
pub(crate) struct Completion {
    pub(crate) reply: oneshot::Sender<Result<Response>>,
    pub(crate) cache_name: Bytes,
    pub(crate) topology_age: i32,
}

impl From<PendingOperation> for Completion {
    fn from(op: PendingOperation) -> Self {
        Self {
            reply: op.reply,
            cache_name: op.cache_name,
            topology_age: op.topology_age,
        }
    }
}

/// Operations in flight on one channel, keyed by message id.
#[derive(Default)]
pub(crate) struct PendingRegistry {
    operations: Mutex<HashMap<u64, PendingOperation>>,
}

impl PendingRegistry {
    pub(crate) fn register(&self, message_id: u64, operation: PendingOperation) {
        self.operations.lock().insert(message_id, operation);
    }

    pub(crate) fn remove(&self, message_id: u64) -> Option<PendingOperation> {
        self.operations.lock().remove(&message_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.operations.lock().len()
    }

    /// Operations whose caller is still waiting.
    pub(crate) fn waiting(&self) -> usize {
        self.operations.lock().values().filter(|op| !op.reply.is_closed()).count()
    }

    /// Operations whose caller gave up, kept until their response is consumed.
    pub(crate) fn abandoned(&self) -> usize {
        self.operations.lock().values().filter(|op| op.reply.is_closed()).count()
    }

    fn intelligence(&self, message_id: u64) -> u8 {
        self.operations
            .lock()
            .get(&message_id)
            .map_or(ClientIntelligence::Basic.value(), |op| op.intelligence)
    }

    fn expected_op_code(&self, message_id: u64) -> Option<u8> {
        self.operations
            .lock()
            .get(&message_id)
            .map(|op| op.expected_op_code)
    }

    fn decode_body(&self, header: &ResponseHeader, src: &mut BytesMut) -> Result<Option<Response>> {
        let mut operations = self.operations.lock();
        match operations.get_mut(&header.message_id) {
            Some(op) => op.decoder.decode(header, src),
            None => Err(HotRodError::Decode(format!(
                "no operation waiting for message {}",
                header.message_id
            ))),
        }
    }

    /// Fails every waiting operation, leaving the registry empty.
    pub(crate) fn fail_all(&self, cause: &HotRodError) {
        let drained: Vec<PendingOperation> = self.operations.lock().drain().map(|(_, op)| op).collect();
        for op in drained {
            let _ = op.reply.send(Err(cause.duplicate()));
        }
    }
}

impl std::fmt::Debug for PendingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("in_flight", &self.len())
            .finish()
    }
}

/// A complete inbound message.
pub(crate) enum Inbound {
    /// Outcome of a waiting operation.
    Reply {
        header: ResponseHeader,
        completion: Completion,
        outcome: Result<Response>,
    },
    /// Error response nobody is waiting for any more.
    Unmatched { header: ResponseHeader, message: String },
    /// Pushed listener event.
    Event(CacheEvent),
}

enum DecodeState {
    Header,
    Body(ResponseHeader),
    Error(ResponseHeader),
    Event { op_code: u8 },
}

/// `tokio_util` decoder for everything a server sends on a channel.
pub(crate) struct InboundDecoder {
    pending: std::sync::Arc<PendingRegistry>,
    state: DecodeState,
}

impl InboundDecoder {
    pub(crate) fn new(pending: std::sync::Arc<PendingRegistry>) -> Self {
        Self {
            pending,
            state: DecodeState::Header,
        }
    }

    fn fail(&self, message_id: u64, err: &HotRodError) {
        if let Some(op) = self.pending.remove(message_id) {
            let _ = op.reply.send(Err(err.duplicate()));
        }
    }

    fn next_state(&self, header: ResponseHeader) -> Result<DecodeState> {
        if header.op_code == ERROR_RESPONSE || is_error(header.status) {
            return Ok(DecodeState::Error(header));
        }
        match self.pending.expected_op_code(header.message_id) {
            Some(expected) if expected == header.op_code => Ok(DecodeState::Body(header)),
            Some(expected) => {
                let err = HotRodError::Decode(format!(
                    "invalid response operation: expected {expected:#04x}, received {:#04x}",
                    header.op_code
                ));
                self.fail(header.message_id, &err);
                Err(err)
            }
            None => Err(HotRodError::Decode(format!(
                "response {:#04x} for unknown message {}",
                header.op_code, header.message_id
            ))),
        }
    }
}

impl Decoder for InboundDecoder {
    type Item = Inbound;
    type Error = HotRodError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        loop {
            match std::mem::replace(&mut self.state, DecodeState::Header) {
                DecodeState::Header => {
                    let pending = &self.pending;
                    let Some((start, used)) =
                        try_read(&src[..], |r| read_inbound_start(r, |id| pending.intelligence(id)))?
                    else {
                        return Ok(None);
                    };
                    src.advance(used);
                    self.state = match start {
                        InboundStart::Event { op_code, .. } => DecodeState::Event { op_code },
                        InboundStart::Response(header) => {
                            tracing::trace!(
                                message_id = header.message_id,
                                op_code = header.op_code,
                                status = header.status,
                                topology_change = header.topology.is_some(),
                                "received response header"
                            );
                            self.next_state(header)?
                        }
                    };
                }
                DecodeState::Body(header) => match self.pending.decode_body(&header, src) {
                    Ok(None) => {
                        self.state = DecodeState::Body(header);
                        return Ok(None);
                    }
                    Ok(Some(response)) => {
                        let Some(op) = self.pending.remove(header.message_id) else {
                            continue;
                        };
                        return Ok(Some(Inbound::Reply {
                            header,
                            completion: op.into(),
                            outcome: Ok(response),
                        }));
                    }
                    Err(err) => {
                        self.fail(header.message_id, &err);
                        return Err(err);
                    }
                },
                DecodeState::Error(header) => {
                    let Some((message, used)) = try_read(&src[..], |r| r.read_string())? else {
                        self.state = DecodeState::Error(header);
                        return Ok(None);
                    };
                    src.advance(used);
                    return Ok(Some(match self.pending.remove(header.message_id) {
                        Some(op) => {
                            let err = HotRodError::Server {
                                message_id: header.message_id,
                                status: header.status,
                                message,
                            };
                            Inbound::Reply {
                                header,
                                completion: op.into(),
                                outcome: Err(err),
                            }
                        }
                        None => Inbound::Unmatched { header, message },
                    }));
                }
                DecodeState::Event { op_code } => {
                    let Some((event, used)) = try_read(&src[..], |r| read_cache_event(r, op_code))? else {
                        self.state = DecodeState::Event { op_code };
                        return Ok(None);
                    };
                    src.advance(used);
                    return Ok(Some(Inbound::Event(event)));
                }
            }
        }
    }
}
