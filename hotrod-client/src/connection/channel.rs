//! Single multiplexed connection to a Hot Rod server.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use hotrod_core::protocol::{CacheEvent, HeaderParams, TopologyUpdate};
use hotrod_core::{HotRodError, Result};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use super::decoder::{InboundDecoder, Inbound, PendingOperation, PendingRegistry};
use crate::listener::ListenerId;
use crate::operations::{BodyDecoder, Response};

/// Timed-out requests a channel tolerates before it is considered stuck.
const MAX_ABANDONED: usize = 64;

/// Unique identifier for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Generates a new unique channel ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// Socket settings applied when a channel connects.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelOptions {
    pub(crate) connect_timeout: Duration,
    pub(crate) tcp_no_delay: bool,
    pub(crate) tcp_keep_alive: bool,
}

/// Something a channel's reader learned that the rest of the client must act on.
#[derive(Debug)]
pub(crate) enum ChannelNotice {
    /// A response carried a new topology for a cache.
    Topology {
        address: SocketAddr,
        cache_name: Bytes,
        topology_age: i32,
        update: TopologyUpdate,
    },
    /// A listener event arrived.
    Event {
        address: SocketAddr,
        event: CacheEvent,
    },
    /// The channel is gone, together with the listeners it carried.
    Closed {
        address: SocketAddr,
        channel_id: ChannelId,
        listeners: Vec<ListenerId>,
    },
    /// Every initial server of the current cluster refused connections.
    ClusterUnreachable { cluster: String, topology_age: i32 },
}

/// A connection to a single server, shared by every operation routed there.
///
/// Requests are written under an async lock. A reader task decodes
/// everything the server sends and completes the waiting operations by
/// message id; listener events are forwarded as [`ChannelNotice::Event`].
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    address: SocketAddr,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    pending: Arc<PendingRegistry>,
    listeners: Arc<Mutex<HashSet<ListenerId>>>,
    closed: CancellationToken,
    created_at: Instant,
}

impl Channel {
    /// Establishes a new channel to the given address and starts its reader.
    pub(crate) async fn connect(
        address: SocketAddr,
        options: ChannelOptions,
        notices: mpsc::UnboundedSender<ChannelNotice>,
    ) -> Result<Arc<Self>> {
        let socket = if address.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(options.tcp_keep_alive)?;

        let stream = tokio::time::timeout(options.connect_timeout, socket.connect(address))
            .await
            .map_err(|_| {
                HotRodError::Timeout(format!(
                    "connection to {} timed out after {:?}",
                    address, options.connect_timeout
                ))
            })?
            .map_err(|e| HotRodError::Connection(format!("failed to connect to {}: {}", address, e)))?;

        stream.set_nodelay(options.tcp_no_delay).map_err(|e| {
            HotRodError::Connection(format!("failed to set TCP_NODELAY: {}", e))
        })?;

        let (read_half, write_half) = stream.into_split();
        let channel = Arc::new(Self {
            id: ChannelId::new(),
            address,
            writer: Arc::new(tokio::sync::Mutex::new(write_half)),
            pending: Arc::new(PendingRegistry::default()),
            listeners: Arc::new(Mutex::new(HashSet::new())),
            closed: CancellationToken::new(),
            created_at: Instant::now(),
        });

        let reader = ChannelReader {
            id: channel.id,
            address,
            pending: Arc::clone(&channel.pending),
            listeners: Arc::clone(&channel.listeners),
            writer: Arc::clone(&channel.writer),
            closed: channel.closed.clone(),
            notices,
        };
        tokio::spawn(reader.run(FramedRead::new(
            read_half,
            InboundDecoder::new(Arc::clone(&channel.pending)),
        )));

        tracing::debug!(id = %channel.id, address = %address, "established channel");
        Ok(channel)
    }

    /// Returns the channel's unique identifier.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Returns the server address of this channel.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns when this channel was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns `true` until the channel is closed by either side.
    pub fn is_active(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Number of operations waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.pending.waiting()
    }

    /// Sends an encoded request and waits for the decoded response.
    ///
    /// The operation is registered under its message id before the bytes are
    /// written. When no response arrives within `timeout` only this operation
    /// fails. Its body decoder stays registered so that a late response is
    /// still consumed and dropped, keeping the stream aligned for the other
    /// operations. A channel holding more than `MAX_ABANDONED` such requests
    /// is closed.
    pub(crate) async fn invoke(
        &self,
        header: &HeaderParams,
        request: Bytes,
        decoder: Box<dyn BodyDecoder>,
        timeout: Duration,
    ) -> Result<Response> {
        if !self.is_active() {
            return Err(HotRodError::ChannelInactive(format!(
                "{} to {} is closed",
                self.id, self.address
            )));
        }

        let message_id = header.message_id;
        let (tx, rx) = oneshot::channel();
        self.pending.register(
            message_id,
            PendingOperation {
                decoder,
                reply: tx,
                expected_op_code: header.op_resp_code,
                intelligence: header.client_intelligence,
                cache_name: header.cache_name.clone(),
                topology_age: header.topology_age,
            },
        );

        let written = {
            let mut writer = self.writer.lock().await;
            writer.write_all(&request).await
        };
        if let Err(e) = written {
            self.pending.remove(message_id);
            self.close();
            return Err(HotRodError::ChannelInactive(format!(
                "failed to write to {}: {}",
                self.address, e
            )));
        }
        tracing::trace!(
            message_id,
            op_code = header.op_code,
            address = %self.address,
            bytes = request.len(),
            "request written"
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(HotRodError::ChannelInactive(format!(
                "{} to {} closed before message {} completed",
                self.id, self.address, message_id
            ))),
            Err(_) => {
                let abandoned = self.pending.abandoned();
                if abandoned > MAX_ABANDONED {
                    tracing::warn!(
                        id = %self.id,
                        address = %self.address,
                        abandoned,
                        "closing channel with too many unanswered requests"
                    );
                    self.close();
                } else {
                    tracing::debug!(message_id, address = %self.address, "request timed out, channel kept");
                }
                Err(HotRodError::Timeout(format!(
                    "no response to message {} from {} within {:?}",
                    message_id, self.address, timeout
                )))
            }
        }
    }

    /// Records that events for `listener_id` arrive on this channel.
    pub(crate) fn add_listener(&self, listener_id: ListenerId) {
        self.listeners.lock().insert(listener_id);
    }

    /// Stops tracking `listener_id` on this channel.
    pub(crate) fn remove_listener(&self, listener_id: &ListenerId) {
        self.listeners.lock().remove(listener_id);
    }

    /// Listeners whose events this channel carries.
    pub fn listener_ids(&self) -> Vec<ListenerId> {
        self.listeners.lock().iter().copied().collect()
    }

    /// Closes this channel. Waiting operations fail with `ChannelInactive`.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            tracing::debug!(id = %self.id, address = %self.address, "closing channel");
            self.closed.cancel();
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

struct ChannelReader {
    id: ChannelId,
    address: SocketAddr,
    pending: Arc<PendingRegistry>,
    listeners: Arc<Mutex<HashSet<ListenerId>>>,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    closed: CancellationToken,
    notices: mpsc::UnboundedSender<ChannelNotice>,
}

impl ChannelReader {
    async fn run(self, mut frames: FramedRead<OwnedReadHalf, InboundDecoder>) {
        let cause = loop {
            tokio::select! {
                _ = self.closed.cancelled() => {
                    break HotRodError::ChannelInactive(format!("{} to {} closed", self.id, self.address));
                }
                next = frames.next() => match next {
                    Some(Ok(inbound)) => self.deliver(inbound),
                    Some(Err(e)) => {
                        let e = e.unwrap_framing();
                        tracing::warn!(id = %self.id, address = %self.address, error = %e, "closing channel after read failure");
                        break e;
                    }
                    None => {
                        break HotRodError::ChannelInactive(format!(
                            "connection to {} closed by the server",
                            self.address
                        ));
                    }
                }
            }
        };

        self.closed.cancel();
        self.pending.fail_all(&cause);
        if let Err(e) = self.writer.lock().await.shutdown().await {
            tracing::trace!(id = %self.id, error = %e, "shutdown of write half failed");
        }

        let listeners = self.listeners.lock().drain().collect();
        let _ = self.notices.send(ChannelNotice::Closed {
            address: self.address,
            channel_id: self.id,
            listeners,
        });
        tracing::debug!(id = %self.id, address = %self.address, reason = %cause, "channel closed");
    }

    fn deliver(&self, inbound: Inbound) {
        match inbound {
            Inbound::Reply {
                header,
                completion,
                outcome,
            } => {
                if let Some(update) = header.topology {
                    let _ = self.notices.send(ChannelNotice::Topology {
                        address: self.address,
                        cache_name: completion.cache_name.clone(),
                        topology_age: completion.topology_age,
                        update,
                    });
                }
                if completion.reply.send(outcome).is_err() {
                    tracing::trace!(
                        address = %self.address,
                        message_id = header.message_id,
                        "dropped response of an operation that stopped waiting"
                    );
                }
            }
            Inbound::Unmatched { header, message } => {
                tracing::warn!(
                    address = %self.address,
                    message_id = header.message_id,
                    status = header.status,
                    error = %message,
                    "error response for an operation that is no longer waiting"
                );
            }
            Inbound::Event(event) => {
                let _ = self.notices.send(ChannelNotice::Event {
                    address: self.address,
                    event,
                });
            }
        }
    }
}
