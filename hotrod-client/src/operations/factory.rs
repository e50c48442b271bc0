//! Construction of operations for one cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use hotrod_core::protocol::{
    is_success, DataFormat, ExpirationParams, Flags, HeaderParams, IterationStartParams,
    ADMIN_TASK_PREFIX,
};
use hotrod_core::Result;

use super::context::OperationContext;
use super::handle::OperationHandle;
use super::listener;
use super::parallel::{partition_by_owner, scatter};
use super::request::Request;
use super::response::{IterationBatch, MetadataValue, PingResponse, Response, WriteOutcome};
use super::retry::{execute_with_retry, invoke_on};
use crate::connection::{Channel, ChannelTarget};
use crate::listener::{ClientListener, ListenerId, ListenerOptions};

type Convert<T> = fn(Response) -> Result<T>;

/// A ready-to-run logical call.
///
/// Holds the header, whose message id is fixed for every attempt, the
/// request, and the conversion of the decoded response into the caller's
/// result type.
#[derive(Debug)]
pub struct Operation<T> {
    ctx: OperationContext,
    header: HeaderParams,
    request: Request,
    convert: Convert<T>,
}

impl<T: Send + 'static> Operation<T> {
    /// The request this operation sends.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The request header.
    pub fn header(&self) -> &HeaderParams {
        &self.header
    }

    /// Runs the operation with failover and returns the result with the
    /// channel that answered.
    pub async fn execute_with_channel(self) -> Result<(T, Arc<Channel>)> {
        let Self {
            ctx,
            mut header,
            request,
            convert,
        } = self;
        let target = match request.routing_key() {
            Some(key) => ChannelTarget::Key(key),
            None => ChannelTarget::Any,
        };
        let (response, channel) = execute_with_retry(&ctx, target, &mut header, &request).await?;
        Ok((convert(response)?, channel))
    }

    /// Runs the operation with failover.
    pub async fn execute(self) -> Result<T> {
        self.execute_with_channel().await.map(|(result, _)| result)
    }

    /// Runs the operation once on `channel`, without failover.
    pub async fn execute_on(mut self, channel: &Arc<Channel>) -> Result<T> {
        let response = invoke_on(&self.ctx, channel, &mut self.header, &self.request).await?;
        (self.convert)(response)
    }

    /// Runs the operation on its own task.
    pub fn spawn(self) -> OperationHandle<T> {
        OperationHandle::spawn(self.execute())
    }
}

/// Maps each logical call to a concrete [`Operation`].
///
/// Flags are passed per call. No I/O happens here.
#[derive(Debug, Clone)]
pub struct CacheOperationsFactory {
    ctx: OperationContext,
    data_format: Option<DataFormat>,
}

impl CacheOperationsFactory {
    pub(crate) fn new(ctx: OperationContext) -> Self {
        Self {
            ctx,
            data_format: None,
        }
    }

    /// Returns a factory sending `data_format` with every request.
    pub fn with_data_format(&self, data_format: DataFormat) -> Self {
        Self {
            ctx: self.ctx.clone(),
            data_format: Some(data_format),
        }
    }

    /// Name of the cache, empty for the default cache.
    pub fn cache_name(&self) -> &Bytes {
        self.ctx.cache_name()
    }

    pub(crate) fn context(&self) -> &OperationContext {
        &self.ctx
    }

    fn operation<T>(&self, request: Request, flags: Flags, convert: Convert<T>) -> Operation<T> {
        Operation {
            header: self
                .ctx
                .header(request.op_code(), flags, self.data_format.clone()),
            ctx: self.ctx.clone(),
            request,
            convert,
        }
    }

    /// Reads a value.
    pub fn get(&self, key: Bytes, flags: Flags) -> Operation<Option<Bytes>> {
        self.operation(Request::Get { key }, flags, Response::into_value)
    }

    /// Reads a value with its version and expiration metadata.
    pub fn get_with_metadata(&self, key: Bytes, flags: Flags) -> Operation<Option<MetadataValue>> {
        self.operation(Request::GetWithMetadata { key }, flags, Response::into_metadata)
    }

    /// Checks whether a key exists.
    pub fn contains_key(&self, key: Bytes, flags: Flags) -> Operation<bool> {
        self.operation(Request::ContainsKey { key }, flags, |r| {
            r.into_status().map(is_success)
        })
    }

    /// Stores a value.
    pub fn put(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: ExpirationParams,
        flags: Flags,
    ) -> Operation<WriteOutcome> {
        self.operation(
            Request::Put {
                key,
                value,
                expiration,
            },
            flags,
            Response::into_write,
        )
    }

    /// Stores a value unless the key exists.
    pub fn put_if_absent(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: ExpirationParams,
        flags: Flags,
    ) -> Operation<WriteOutcome> {
        self.operation(
            Request::PutIfAbsent {
                key,
                value,
                expiration,
            },
            flags,
            Response::into_write,
        )
    }

    /// Stores a value only if the key exists.
    pub fn replace(
        &self,
        key: Bytes,
        value: Bytes,
        expiration: ExpirationParams,
        flags: Flags,
    ) -> Operation<WriteOutcome> {
        self.operation(
            Request::Replace {
                key,
                value,
                expiration,
            },
            flags,
            Response::into_write,
        )
    }

    /// Stores a value only if the entry still has `version`.
    pub fn replace_if_unmodified(
        &self,
        key: Bytes,
        value: Bytes,
        version: i64,
        expiration: ExpirationParams,
        flags: Flags,
    ) -> Operation<WriteOutcome> {
        self.operation(
            Request::ReplaceIfUnmodified {
                key,
                value,
                version,
                expiration,
            },
            flags,
            Response::into_write,
        )
    }

    /// Removes a key.
    pub fn remove(&self, key: Bytes, flags: Flags) -> Operation<WriteOutcome> {
        self.operation(Request::Remove { key }, flags, Response::into_write)
    }

    /// Removes a key only if the entry still has `version`.
    pub fn remove_if_unmodified(&self, key: Bytes, version: i64, flags: Flags) -> Operation<WriteOutcome> {
        self.operation(
            Request::RemoveIfUnmodified { key, version },
            flags,
            Response::into_write,
        )
    }

    /// Removes every entry.
    pub fn clear(&self, flags: Flags) -> Operation<()> {
        self.operation(Request::Clear, flags, |r| r.into_status().map(|_| ()))
    }

    /// Counts entries.
    pub fn size(&self, flags: Flags) -> Operation<u64> {
        self.operation(Request::Size, flags, Response::into_size)
    }

    /// Reads server statistics.
    pub fn stats(&self) -> Operation<HashMap<String, String>> {
        self.operation(Request::Stats, Flags::NONE, Response::into_stats)
    }

    /// Checks liveness of a server and learns the topology.
    pub fn ping(&self) -> Operation<PingResponse> {
        self.operation(Request::Ping, Flags::NONE, Response::into_ping)
    }

    /// Reads every key. `scope` 0 reads the whole cluster.
    pub fn bulk_get_keys(&self, scope: u32, flags: Flags) -> Operation<HashSet<Bytes>> {
        self.operation(Request::BulkGetKeys { scope }, flags, Response::into_keys)
    }

    /// Reads keys from the servers owning them, in parallel.
    pub fn get_all(&self, keys: Vec<Bytes>, flags: Flags) -> BoxFuture<'static, Result<HashMap<Bytes, Bytes>>> {
        let factory = self.clone();
        async move {
            let groups = factory.partition(keys, |k| k);
            scatter(
                groups,
                move |keys| {
                    factory
                        .operation(Request::GetAll { keys }, flags, Response::into_entries)
                        .execute()
                },
                |all: &mut HashMap<Bytes, Bytes>, part| all.extend(part),
            )
            .await
        }
        .boxed()
    }

    /// Stores entries on the servers owning them, in parallel.
    pub fn put_all(
        &self,
        entries: Vec<(Bytes, Bytes)>,
        expiration: ExpirationParams,
        flags: Flags,
    ) -> BoxFuture<'static, Result<()>> {
        let factory = self.clone();
        async move {
            let groups = factory.partition(entries, |(k, _)| k);
            scatter(
                groups,
                move |entries| {
                    factory
                        .operation(
                            Request::PutAll {
                                entries,
                                expiration,
                            },
                            flags,
                            |r| r.into_status().map(|_| ()),
                        )
                        .execute()
                },
                |_: &mut (), _: ()| {},
            )
            .await
        }
        .boxed()
    }

    fn partition<K>(&self, items: Vec<K>, key_of: impl Fn(&K) -> &Bytes) -> Vec<Vec<K>> {
        let factory = &self.ctx.channel_factory;
        let cache_name = self.cache_name();
        partition_by_owner(items, |item| factory.primary_owner(cache_name, key_of(item)))
            .into_values()
            .collect()
    }

    /// Starts a server-side iteration.
    pub fn iteration_start(&self, params: IterationStartParams, flags: Flags) -> Operation<String> {
        self.operation(Request::IterationStart(params), flags, Response::into_iteration_id)
    }

    /// Fetches the next batch of an iteration. Must run on the iteration's channel.
    pub fn iteration_next(&self, iteration_id: String) -> Operation<IterationBatch> {
        self.operation(
            Request::IterationNext { iteration_id },
            Flags::NONE,
            Response::into_iteration_batch,
        )
    }

    /// Releases an iteration. Must run on the iteration's channel.
    pub fn iteration_end(&self, iteration_id: String) -> Operation<bool> {
        self.operation(Request::IterationEnd { iteration_id }, Flags::NONE, |r| {
            r.into_status().map(is_success)
        })
    }

    /// Runs a server task.
    pub fn exec(&self, task_name: impl Into<String>, params: Vec<(String, Bytes)>, flags: Flags) -> Operation<Bytes> {
        self.operation(
            Request::Exec {
                task_name: task_name.into(),
                params,
            },
            flags,
            Response::into_exec,
        )
    }

    /// Runs an administrative task against the default cache.
    pub fn admin_task(&self, task_name: &str, params: Vec<(String, Bytes)>) -> Operation<Bytes> {
        let admin = CacheOperationsFactory::new(self.ctx.for_cache(Bytes::new()));
        admin.exec(format!("{ADMIN_TASK_PREFIX}{task_name}"), params, Flags::NONE)
    }

    /// Lists the SASL mechanisms a server offers.
    pub fn auth_mech_list(&self) -> Operation<Vec<String>> {
        self.operation(Request::AuthMechList, Flags::NONE, Response::into_mechanisms)
    }

    /// Runs one SASL round.
    pub fn auth(&self, mechanism: impl Into<String>, response: Bytes) -> Operation<(bool, Bytes)> {
        self.operation(
            Request::Auth {
                mechanism: mechanism.into(),
                response,
            },
            Flags::NONE,
            Response::into_auth,
        )
    }

    /// Registers a listener.
    pub async fn add_client_listener(
        &self,
        listener: Arc<dyn ClientListener>,
        options: ListenerOptions,
    ) -> Result<ListenerId> {
        listener::add_client_listener(&self.ctx, listener, options, self.data_format.clone()).await
    }

    /// Registers a near-cache invalidation listener backed by a bloom filter.
    pub async fn add_bloom_listener(&self, listener: Arc<dyn ClientListener>, bits: u32) -> Result<ListenerId> {
        listener::add_bloom_listener(&self.ctx, listener, bits).await
    }

    /// Removes a listener. Unknown listeners are ignored.
    pub async fn remove_client_listener(&self, listener_id: ListenerId) -> Result<()> {
        listener::remove_client_listener(&self.ctx, listener_id).await
    }

    /// Sends a new near-cache bloom filter for a bloom listener.
    pub async fn update_bloom_filter(&self, listener_id: ListenerId, bitmap: Bytes) -> Result<()> {
        listener::update_bloom_filter(&self.ctx, listener_id, bitmap).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::context::test_context;
    use hotrod_core::protocol::*;

    fn factory() -> CacheOperationsFactory {
        CacheOperationsFactory::new(test_context(vec!["127.0.0.1:11222".parse().unwrap()]))
    }

    #[test]
    fn test_operations_carry_their_opcode_and_flags() {
        let factory = factory();
        let put = factory.put(
            Bytes::from_static(b"k"),
            Bytes::from_static(b"v"),
            ExpirationParams::default(),
            Flags::FORCE_RETURN_VALUE,
        );
        assert_eq!(put.header().op_code, PUT_REQUEST);
        assert_eq!(put.header().op_resp_code, PUT_REQUEST + 1);
        assert!(put.header().flags.contains(Flags::FORCE_RETURN_VALUE));
        assert_eq!(put.header().cache_name.as_ref(), b"books");

        let get = factory.get(Bytes::from_static(b"k"), Flags::NONE);
        assert_eq!(get.header().op_code, GET_REQUEST);
        assert_eq!(get.header().flags, Flags::NONE);
        assert_ne!(get.header().message_id, put.header().message_id);
    }

    #[test]
    fn test_flags_do_not_leak_between_calls() {
        let factory = factory();
        let _ = factory.remove(Bytes::from_static(b"a"), Flags::FORCE_RETURN_VALUE);
        let next = factory.remove(Bytes::from_static(b"b"), Flags::NONE);
        assert_eq!(next.header().flags, Flags::NONE);
    }

    #[test]
    fn test_admin_task_targets_default_cache() {
        let factory = factory();
        let task = factory.admin_task("cache@create", vec![]);
        assert!(task.header().cache_name.is_empty());
        assert_eq!(
            task.request(),
            &Request::Exec {
                task_name: "@@cache@create".to_string(),
                params: vec![],
            }
        );
    }

    #[test]
    fn test_data_format_is_sent() {
        let format = DataFormat {
            key_type: Some(MediaType::octet_stream()),
            value_type: None,
        };
        let factory = factory().with_data_format(format.clone());
        let op = factory.get(Bytes::from_static(b"k"), Flags::NONE);
        assert_eq!(op.header().data_format, Some(format));
    }

    #[tokio::test]
    async fn test_get_all_without_keys_is_empty() {
        let entries = factory().get_all(Vec::new(), Flags::NONE).await.unwrap();
        assert!(entries.is_empty());
    }
}
