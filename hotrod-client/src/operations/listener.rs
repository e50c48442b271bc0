//! Listener registration, failover and removal.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hotrod_core::protocol::{DataFormat, Flags};
use hotrod_core::{HotRodError, Result};
use tracing::instrument;

use super::context::OperationContext;
use super::request::Request;
use super::retry::{execute_with_retry, invoke_on};
use crate::connection::ChannelTarget;
use crate::listener::{ClientListener, FailoverHandler, ListenerId, ListenerOptions};

#[derive(Debug, Clone)]
enum Subscription {
    Client(ListenerOptions),
    Bloom { bits: u32 },
}

/// A listener subscription that outlives the request registering it.
///
/// The id is generated once and reused by every re-registration, so the
/// server never holds two subscriptions for the same listener.
#[derive(Debug)]
pub(crate) struct ListenerOperation {
    ctx: OperationContext,
    listener_id: ListenerId,
    subscription: Subscription,
    data_format: Option<DataFormat>,
}

impl ListenerOperation {
    fn request(&self) -> Request {
        match &self.subscription {
            Subscription::Client(options) => Request::AddClientListener {
                listener_id: self.listener_id,
                params: options.to_params(),
            },
            Subscription::Bloom { bits } => Request::AddBloomListener {
                listener_id: self.listener_id,
                bloom_bits: *bits,
            },
        }
    }

    fn is_registered(&self) -> bool {
        self.ctx.notifier.cache_name(&self.listener_id).is_some()
    }

    /// Sends the registration and binds the listener to the answering channel.
    #[instrument(name = "listener.register", skip(self), fields(listener_id = %self.listener_id))]
    async fn register(&self) -> Result<SocketAddr> {
        let request = self.request();
        let mut header = self
            .ctx
            .header(request.op_code(), Flags::NONE, self.data_format.clone());
        let (response, channel) =
            execute_with_retry(&self.ctx, ChannelTarget::Any, &mut header, &request).await?;
        response.into_status()?;

        let address = channel.address();
        channel.add_listener(self.listener_id);
        self.ctx.notifier.start_client_listener(self.listener_id, address);
        if !channel.is_active() {
            // Closed before the listener was attached, so the close notice missed it.
            self.ctx.notifier.failover(&[self.listener_id]);
        }
        tracing::debug!(address = %address, "listener registered");
        Ok(address)
    }
}

#[async_trait]
impl FailoverHandler for ListenerOperation {
    async fn failover(&self) {
        if !self.is_registered() {
            return;
        }
        match self.register().await {
            Ok(address) if !self.is_registered() => {
                tracing::debug!(listener_id = %self.listener_id, "listener removed during failover");
                let _ = send_remove(&self.ctx, self.listener_id, address).await;
            }
            Ok(address) => {
                tracing::info!(listener_id = %self.listener_id, address = %address, "listener failed over");
            }
            Err(e) => {
                tracing::error!(
                    listener_id = %self.listener_id,
                    error = %e,
                    "could not re-register listener, events are no longer delivered"
                );
            }
        }
    }
}

async fn register_new(
    ctx: &OperationContext,
    listener: Arc<dyn ClientListener>,
    subscription: Subscription,
    data_format: Option<DataFormat>,
) -> Result<ListenerId> {
    let listener_id = ListenerId::new();
    let operation = Arc::new(ListenerOperation {
        ctx: ctx.clone(),
        listener_id,
        subscription,
        data_format,
    });

    // Events, including replayed current state, may arrive before the response.
    ctx.notifier
        .add_dispatcher(listener_id, ctx.cache_name.clone(), listener, operation.clone());

    match operation.register().await {
        Ok(_) => Ok(listener_id),
        Err(e) => {
            ctx.notifier.remove_client_listener(&listener_id);
            Err(e)
        }
    }
}

/// Registers `listener` and returns its id once the server accepted it.
pub(crate) async fn add_client_listener(
    ctx: &OperationContext,
    listener: Arc<dyn ClientListener>,
    options: ListenerOptions,
    data_format: Option<DataFormat>,
) -> Result<ListenerId> {
    register_new(ctx, listener, Subscription::Client(options), data_format).await
}

/// Registers a near-cache invalidation listener backed by a bloom filter of
/// `bits` bits.
pub(crate) async fn add_bloom_listener(
    ctx: &OperationContext,
    listener: Arc<dyn ClientListener>,
    bits: u32,
) -> Result<ListenerId> {
    register_new(ctx, listener, Subscription::Bloom { bits }, None).await
}

async fn send_remove(ctx: &OperationContext, listener_id: ListenerId, address: SocketAddr) -> Result<()> {
    let request = Request::RemoveClientListener { listener_id };
    let mut header = ctx.header(request.op_code(), Flags::NONE, None);
    let channel = ctx.channel_factory.channel_for(address).await?;
    let outcome = invoke_on(ctx, &channel, &mut header, &request).await;
    channel.remove_listener(&listener_id);
    ctx.channel_factory.release_channel(&channel);
    outcome?.into_status().map(|_| ())
}

/// Unsubscribes a listener on the server hosting it.
///
/// Unknown listeners are removed as a no-op.
#[instrument(name = "listener.remove", skip_all, fields(listener_id = %listener_id))]
pub(crate) async fn remove_client_listener(ctx: &OperationContext, listener_id: ListenerId) -> Result<()> {
    let address = ctx.notifier.find_address(&listener_id);
    let known = ctx.notifier.remove_client_listener(&listener_id);
    match address {
        Some(address) => send_remove(ctx, listener_id, address).await,
        None => {
            if !known {
                tracing::debug!("listener not registered, nothing to remove");
            }
            Ok(())
        }
    }
}

/// Pushes the near-cache bloom filter to the server hosting its listener.
pub(crate) async fn update_bloom_filter(
    ctx: &OperationContext,
    listener_id: ListenerId,
    bitmap: Bytes,
) -> Result<()> {
    let address = ctx.notifier.find_address(&listener_id).ok_or_else(|| {
        HotRodError::ChannelInactive(format!("{} is not bound to a server", listener_id))
    })?;
    let request = Request::UpdateBloomFilter { bitmap };
    let mut header = ctx.header(request.op_code(), Flags::NONE, None);
    let channel = ctx.channel_factory.channel_for(address).await?;
    let outcome = invoke_on(ctx, &channel, &mut header, &request).await;
    ctx.channel_factory.release_channel(&channel);
    outcome?.into_status().map(|_| ())
}
