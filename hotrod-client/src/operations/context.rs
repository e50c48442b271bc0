//! Per-cache state shared by every operation.

use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::{Bytes, BytesMut};
use hotrod_core::protocol::{Codec, DataFormat, Flags, HeaderParams, MessageIdGenerator};
use hotrod_core::{ClientTopology, Result};

use super::request::Request;
use crate::config::ClientConfig;
use crate::connection::ChannelFactory;
use crate::diagnostics::ClientStatistics;
use crate::listener::ClientListenerNotifier;

/// Collaborators an operation needs to run, bound to one cache.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub(crate) channel_factory: Arc<dyn ChannelFactory>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) client_topology: Arc<ArcSwap<ClientTopology>>,
    pub(crate) notifier: Arc<ClientListenerNotifier>,
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) statistics: Arc<ClientStatistics>,
    pub(crate) message_ids: Arc<MessageIdGenerator>,
    pub(crate) cache_name: Bytes,
}

impl OperationContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        channel_factory: Arc<dyn ChannelFactory>,
        codec: Arc<dyn Codec>,
        notifier: Arc<ClientListenerNotifier>,
        config: Arc<ClientConfig>,
        statistics: Arc<ClientStatistics>,
        message_ids: Arc<MessageIdGenerator>,
        cache_name: Bytes,
    ) -> Self {
        Self {
            client_topology: channel_factory.client_topology(&cache_name),
            channel_factory,
            codec,
            notifier,
            config,
            statistics,
            message_ids,
            cache_name,
        }
    }

    /// Name of the cache, empty for the default cache.
    pub fn cache_name(&self) -> &Bytes {
        &self.cache_name
    }

    /// Cache name for log output.
    pub fn cache_name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.cache_name).into_owned()
    }

    /// Same collaborators, bound to another cache.
    pub(crate) fn for_cache(&self, cache_name: Bytes) -> Self {
        Self {
            client_topology: self.channel_factory.client_topology(&cache_name),
            cache_name,
            ..self.clone()
        }
    }

    /// Creates the header of a new logical call with a fresh message id.
    pub(crate) fn header(
        &self,
        op_code: u8,
        flags: Flags,
        data_format: Option<DataFormat>,
    ) -> HeaderParams {
        HeaderParams::new(op_code, self.message_ids.next_id())
            .cache_name(self.cache_name.clone())
            .flags(flags)
            .data_format(data_format)
    }

    /// Encodes header and body for one attempt.
    ///
    /// The topology age is read from the channel factory every time, since a
    /// cluster switch may have happened since the previous attempt.
    pub(crate) fn encode(&self, header: &mut HeaderParams, request: &Request) -> Result<Bytes> {
        header.topology_age = self.channel_factory.topology_age();
        let topology = self.client_topology.load();
        let capacity = self.codec.estimate_header_size(header, &topology)
            + request.estimate_body_size(self.codec.as_ref());
        let mut buf = BytesMut::with_capacity(capacity);
        self.codec.write_header(&mut buf, header, &topology);
        request.write_body(self.codec.as_ref(), &mut buf)?;
        Ok(buf.freeze())
    }
}

#[cfg(test)]
pub(crate) fn test_context(servers: Vec<std::net::SocketAddr>) -> OperationContext {
    use crate::connection::TcpChannelFactory;
    use hotrod_core::protocol::Codec31;

    let config = Arc::new(ClientConfig::builder().servers(servers).build().unwrap());
    let (notices, _) = tokio::sync::mpsc::unbounded_channel();
    let statistics = Arc::new(ClientStatistics::new());
    OperationContext::new(
        Arc::new(TcpChannelFactory::new(Arc::clone(&config), notices)),
        Arc::new(Codec31),
        Arc::new(ClientListenerNotifier::new(Arc::clone(&statistics))),
        config,
        statistics,
        Arc::new(MessageIdGenerator::new()),
        Bytes::from_static(b"books"),
    )
}
