//! Retry and failover of a single logical call.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use hotrod_core::protocol::HeaderParams;
use hotrod_core::{HotRodError, Result};
use tracing::instrument;

use super::context::OperationContext;
use super::request::Request;
use super::response::Response;
use crate::connection::{Channel, ChannelTarget};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again on another server.
    Retry,
    /// Give up and surface the error.
    Fail,
}

/// Failed servers and retry budget of one logical call.
#[derive(Debug, Clone)]
pub struct RetryState {
    failed: Option<HashSet<SocketAddr>>,
    retry_count: u32,
    max_retries: u32,
}

impl RetryState {
    /// Creates a state allowing `max_retries` retries after the first attempt.
    pub fn new(max_retries: u32) -> Self {
        Self {
            failed: None,
            retry_count: 0,
            max_retries,
        }
    }

    /// Servers that failed so far.
    pub fn failed_servers(&self) -> Option<&HashSet<SocketAddr>> {
        self.failed.as_ref()
    }

    /// Retries performed so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Records a failed attempt against `address`.
    ///
    /// Errors reported by a healthy server are final. Transport errors,
    /// timeouts, and the statuses a stopping server answers with are retried
    /// elsewhere until the budget is spent.
    pub fn record_failure(&mut self, address: SocketAddr, error: &HotRodError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Fail;
        }
        self.failed.get_or_insert_with(HashSet::new).insert(address);
        self.retry_count += 1;
        if self.retry_count <= self.max_retries {
            RetryDecision::Retry
        } else {
            RetryDecision::Fail
        }
    }
}

/// Runs one attempt against `address`.
async fn attempt(
    ctx: &OperationContext,
    address: SocketAddr,
    header: &mut HeaderParams,
    request: &Request,
) -> Result<(Response, Arc<Channel>)> {
    let factory = &ctx.channel_factory;
    let channel = factory.channel_for(address).await?;
    let outcome = invoke_on(ctx, &channel, header, request).await;
    factory.release_channel(&channel);
    outcome.map(|response| (response, channel))
}

/// Sends `request` on `channel` once, without failover.
pub(crate) async fn invoke_on(
    ctx: &OperationContext,
    channel: &Arc<Channel>,
    header: &mut HeaderParams,
    request: &Request,
) -> Result<Response> {
    let bytes = ctx.encode(header, request)?;
    channel
        .invoke(header, bytes, request.decoder(), ctx.channel_factory.socket_timeout())
        .await
}

/// Sends `request`, failing over to other servers on transport errors.
///
/// Returns the response and the channel that produced it. When no server is
/// left to try, the last transport error is returned.
#[instrument(
    name = "operation.execute",
    skip_all,
    fields(op = request.name(), message_id = header.message_id, cache = %ctx.cache_name_lossy())
)]
pub(crate) async fn execute_with_retry(
    ctx: &OperationContext,
    target: ChannelTarget<'_>,
    header: &mut HeaderParams,
    request: &Request,
) -> Result<(Response, Arc<Channel>)> {
    let max_retries = if request.supports_retry() {
        ctx.channel_factory.max_retries()
    } else {
        0
    };
    let mut state = RetryState::new(max_retries);
    let mut last_error: Option<HotRodError> = None;

    loop {
        let address = match ctx.channel_factory.select_server(
            target,
            state.failed_servers(),
            &ctx.cache_name,
        ) {
            Ok(address) => address,
            Err(e) => return Err(last_error.unwrap_or(e)),
        };

        let error = match attempt(ctx, address, header, request).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => e,
        };

        match state.record_failure(address, &error) {
            RetryDecision::Retry => {
                tracing::warn!(
                    address = %address,
                    retry = state.retry_count(),
                    max_retries,
                    error = %error,
                    "attempt failed, retrying on another server"
                );
                ctx.statistics.record_retry();
                last_error = Some(error);
            }
            RetryDecision::Fail => {
                if state.retry_count() > max_retries {
                    tracing::warn!(
                        address = %address,
                        retries = max_retries,
                        error = %error,
                        "no retries left"
                    );
                }
                return Err(error);
            }
        }
    }
}
