//! Request bodies of every call kind.

use bytes::{BufMut, Bytes, BytesMut};
use hotrod_core::protocol::buf::{array_size, vint_size, write_array, write_string, write_vint};
use hotrod_core::protocol::*;
use hotrod_core::Result;

use super::decode::*;
use crate::listener::ListenerId;

/// One logical call, with its already-marshalled arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Read a value.
    Get { key: Bytes },
    /// Read a value with its metadata.
    GetWithMetadata { key: Bytes },
    /// Check whether a key exists.
    ContainsKey { key: Bytes },
    /// Store a value.
    Put {
        key: Bytes,
        value: Bytes,
        expiration: ExpirationParams,
    },
    /// Store a value unless the key exists.
    PutIfAbsent {
        key: Bytes,
        value: Bytes,
        expiration: ExpirationParams,
    },
    /// Store a value only if the key exists.
    Replace {
        key: Bytes,
        value: Bytes,
        expiration: ExpirationParams,
    },
    /// Store a value only if the entry still has `version`.
    ReplaceIfUnmodified {
        key: Bytes,
        value: Bytes,
        version: i64,
        expiration: ExpirationParams,
    },
    /// Remove a key.
    Remove { key: Bytes },
    /// Remove a key only if the entry still has `version`.
    RemoveIfUnmodified { key: Bytes, version: i64 },
    /// Remove every entry.
    Clear,
    /// Count entries.
    Size,
    /// Read server statistics.
    Stats,
    /// Check liveness and learn the topology.
    Ping,
    /// Read several keys.
    GetAll { keys: Vec<Bytes> },
    /// Store several entries.
    PutAll {
        entries: Vec<(Bytes, Bytes)>,
        expiration: ExpirationParams,
    },
    /// Read every key. Scope 0 reads the whole cluster.
    BulkGetKeys { scope: u32 },
    /// Start a server-side iteration.
    IterationStart(IterationStartParams),
    /// Fetch the next batch of an iteration.
    IterationNext { iteration_id: String },
    /// Release an iteration.
    IterationEnd { iteration_id: String },
    /// Subscribe a listener.
    AddClientListener {
        listener_id: ListenerId,
        params: ClientListenerParams,
    },
    /// Subscribe a near-cache invalidation listener backed by a bloom filter.
    AddBloomListener { listener_id: ListenerId, bloom_bits: u32 },
    /// Unsubscribe a listener.
    RemoveClientListener { listener_id: ListenerId },
    /// Replace the server's copy of the near-cache bloom filter.
    UpdateBloomFilter { bitmap: Bytes },
    /// Run a server task.
    Exec {
        task_name: String,
        params: Vec<(String, Bytes)>,
    },
    /// List the SASL mechanisms of the server.
    AuthMechList,
    /// Run one SASL round.
    Auth { mechanism: String, response: Bytes },
}

impl Request {
    /// Request opcode.
    pub fn op_code(&self) -> u8 {
        match self {
            Self::Get { .. } => GET_REQUEST,
            Self::GetWithMetadata { .. } => GET_WITH_METADATA_REQUEST,
            Self::ContainsKey { .. } => CONTAINS_KEY_REQUEST,
            Self::Put { .. } => PUT_REQUEST,
            Self::PutIfAbsent { .. } => PUT_IF_ABSENT_REQUEST,
            Self::Replace { .. } => REPLACE_REQUEST,
            Self::ReplaceIfUnmodified { .. } => REPLACE_IF_UNMODIFIED_REQUEST,
            Self::Remove { .. } => REMOVE_REQUEST,
            Self::RemoveIfUnmodified { .. } => REMOVE_IF_UNMODIFIED_REQUEST,
            Self::Clear => CLEAR_REQUEST,
            Self::Size => SIZE_REQUEST,
            Self::Stats => STATS_REQUEST,
            Self::Ping => PING_REQUEST,
            Self::GetAll { .. } => GET_ALL_REQUEST,
            Self::PutAll { .. } => PUT_ALL_REQUEST,
            Self::BulkGetKeys { .. } => BULK_GET_KEYS_REQUEST,
            Self::IterationStart(_) => ITERATION_START_REQUEST,
            Self::IterationNext { .. } => ITERATION_NEXT_REQUEST,
            Self::IterationEnd { .. } => ITERATION_END_REQUEST,
            Self::AddClientListener { .. } => ADD_CLIENT_LISTENER_REQUEST,
            Self::AddBloomListener { .. } => ADD_BLOOM_FILTER_NEAR_CACHE_LISTENER_REQUEST,
            Self::RemoveClientListener { .. } => REMOVE_CLIENT_LISTENER_REQUEST,
            Self::UpdateBloomFilter { .. } => UPDATE_BLOOM_FILTER_REQUEST,
            Self::Exec { .. } => EXEC_REQUEST,
            Self::AuthMechList => AUTH_MECH_LIST_REQUEST,
            Self::Auth { .. } => AUTH_REQUEST,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::GetWithMetadata { .. } => "get_with_metadata",
            Self::ContainsKey { .. } => "contains_key",
            Self::Put { .. } => "put",
            Self::PutIfAbsent { .. } => "put_if_absent",
            Self::Replace { .. } => "replace",
            Self::ReplaceIfUnmodified { .. } => "replace_if_unmodified",
            Self::Remove { .. } => "remove",
            Self::RemoveIfUnmodified { .. } => "remove_if_unmodified",
            Self::Clear => "clear",
            Self::Size => "size",
            Self::Stats => "stats",
            Self::Ping => "ping",
            Self::GetAll { .. } => "get_all",
            Self::PutAll { .. } => "put_all",
            Self::BulkGetKeys { .. } => "bulk_get_keys",
            Self::IterationStart(_) => "iteration_start",
            Self::IterationNext { .. } => "iteration_next",
            Self::IterationEnd { .. } => "iteration_end",
            Self::AddClientListener { .. } => "add_client_listener",
            Self::AddBloomListener { .. } => "add_bloom_listener",
            Self::RemoveClientListener { .. } => "remove_client_listener",
            Self::UpdateBloomFilter { .. } => "update_bloom_filter",
            Self::Exec { .. } => "exec",
            Self::AuthMechList => "auth_mech_list",
            Self::Auth { .. } => "auth",
        }
    }

    /// Key the request is routed by, if it targets a single key.
    pub fn routing_key(&self) -> Option<&Bytes> {
        match self {
            Self::Get { key }
            | Self::GetWithMetadata { key }
            | Self::ContainsKey { key }
            | Self::Put { key, .. }
            | Self::PutIfAbsent { key, .. }
            | Self::Replace { key, .. }
            | Self::ReplaceIfUnmodified { key, .. }
            | Self::Remove { key }
            | Self::RemoveIfUnmodified { key, .. } => Some(key),
            Self::GetAll { keys } => keys.first(),
            Self::PutAll { entries, .. } => entries.first().map(|(k, _)| k),
            _ => None,
        }
    }

    /// Returns `false` for requests bound to server-side state on one channel.
    pub fn supports_retry(&self) -> bool {
        !matches!(self, Self::IterationNext { .. } | Self::IterationEnd { .. })
    }

    /// Upper bound of the body size.
    pub fn estimate_body_size(&self, codec: &dyn Codec) -> usize {
        match self {
            Self::Get { key }
            | Self::GetWithMetadata { key }
            | Self::ContainsKey { key }
            | Self::Remove { key } => array_size(key.len()),
            Self::Put {
                key,
                value,
                expiration,
            }
            | Self::PutIfAbsent {
                key,
                value,
                expiration,
            }
            | Self::Replace {
                key,
                value,
                expiration,
            } => {
                array_size(key.len()) + codec.estimate_expiration_size(*expiration) + array_size(value.len())
            }
            Self::ReplaceIfUnmodified {
                key,
                value,
                expiration,
                ..
            } => {
                array_size(key.len())
                    + codec.estimate_expiration_size(*expiration)
                    + 8
                    + array_size(value.len())
            }
            Self::RemoveIfUnmodified { key, .. } => array_size(key.len()) + 8,
            Self::Clear | Self::Size | Self::Stats | Self::Ping | Self::AuthMechList => 0,
            Self::GetAll { keys } => {
                vint_size(keys.len() as u32) + keys.iter().map(|k| array_size(k.len())).sum::<usize>()
            }
            Self::PutAll {
                entries,
                expiration,
            } => {
                codec.estimate_expiration_size(*expiration)
                    + vint_size(entries.len() as u32)
                    + entries
                        .iter()
                        .map(|(k, v)| array_size(k.len()) + array_size(v.len()))
                        .sum::<usize>()
            }
            Self::BulkGetKeys { scope } => vint_size(*scope),
            Self::IterationStart(params) => {
                let segments = params
                    .segments
                    .as_ref()
                    .map_or(1, |s| array_size(segments_to_bitset(s).len()));
                let filter = params.filter_converter.as_ref().map_or(1, |f| {
                    array_size(f.name.len()) + 1 + f.params.iter().map(|p| array_size(p.len())).sum::<usize>()
                });
                segments + filter + vint_size(params.batch_size) + 1
            }
            Self::IterationNext { iteration_id } | Self::IterationEnd { iteration_id } => {
                array_size(iteration_id.len())
            }
            Self::AddClientListener { params, .. } => {
                let factory_size = |f: &Option<NamedFactory>| {
                    f.as_ref().map_or(1, |f| {
                        array_size(f.name.len()) + 1 + f.params.iter().map(|p| array_size(p.len())).sum::<usize>()
                    })
                };
                array_size(ListenerId::WIRE_SIZE)
                    + 2
                    + factory_size(&params.filter_factory)
                    + factory_size(&params.converter_factory)
                    + 5
            }
            Self::AddBloomListener { bloom_bits, .. } => {
                array_size(ListenerId::WIRE_SIZE) + vint_size(*bloom_bits)
            }
            Self::RemoveClientListener { .. } => array_size(ListenerId::WIRE_SIZE),
            Self::UpdateBloomFilter { bitmap } => array_size(bitmap.len()),
            Self::Exec { task_name, params } => {
                array_size(task_name.len())
                    + vint_size(params.len() as u32)
                    + params
                        .iter()
                        .map(|(n, v)| array_size(n.len()) + array_size(v.len()))
                        .sum::<usize>()
            }
            Self::Auth {
                mechanism,
                response,
            } => array_size(mechanism.len()) + array_size(response.len()),
        }
    }

    /// Writes the body that follows the header.
    pub fn write_body(&self, codec: &dyn Codec, buf: &mut BytesMut) -> Result<()> {
        match self {
            Self::Get { key }
            | Self::GetWithMetadata { key }
            | Self::ContainsKey { key }
            | Self::Remove { key } => write_array(buf, key),
            Self::Put {
                key,
                value,
                expiration,
            }
            | Self::PutIfAbsent {
                key,
                value,
                expiration,
            }
            | Self::Replace {
                key,
                value,
                expiration,
            } => {
                write_array(buf, key);
                codec.write_expiration_params(buf, *expiration);
                write_array(buf, value);
            }
            Self::ReplaceIfUnmodified {
                key,
                value,
                version,
                expiration,
            } => {
                write_array(buf, key);
                codec.write_expiration_params(buf, *expiration);
                buf.put_i64(*version);
                write_array(buf, value);
            }
            Self::RemoveIfUnmodified { key, version } => {
                write_array(buf, key);
                buf.put_i64(*version);
            }
            Self::Clear | Self::Size | Self::Stats | Self::Ping | Self::AuthMechList => {}
            Self::GetAll { keys } => {
                write_vint(buf, keys.len() as u32);
                for key in keys {
                    write_array(buf, key);
                }
            }
            Self::PutAll {
                entries,
                expiration,
            } => {
                codec.write_expiration_params(buf, *expiration);
                write_vint(buf, entries.len() as u32);
                for (key, value) in entries {
                    write_array(buf, key);
                    write_array(buf, value);
                }
            }
            Self::BulkGetKeys { scope } => write_vint(buf, *scope),
            Self::IterationStart(params) => codec.write_iteration_start(buf, params),
            Self::IterationNext { iteration_id } | Self::IterationEnd { iteration_id } => {
                write_string(buf, iteration_id)
            }
            Self::AddClientListener {
                listener_id,
                params,
            } => {
                write_array(buf, &listener_id.to_bytes());
                codec.write_client_listener_params(buf, params);
                codec.write_client_listener_interests(buf, params.interests);
            }
            Self::AddBloomListener {
                listener_id,
                bloom_bits,
            } => {
                write_array(buf, &listener_id.to_bytes());
                codec.write_bloom_filter(buf, *bloom_bits)?;
            }
            Self::RemoveClientListener { listener_id } => {
                write_array(buf, &listener_id.to_bytes());
            }
            Self::UpdateBloomFilter { bitmap } => write_array(buf, bitmap),
            Self::Exec { task_name, params } => {
                write_string(buf, task_name);
                write_vint(buf, params.len() as u32);
                for (name, value) in params {
                    write_string(buf, name);
                    write_array(buf, value);
                }
            }
            Self::Auth {
                mechanism,
                response,
            } => {
                write_string(buf, mechanism);
                write_array(buf, response);
            }
        }
        Ok(())
    }

    /// Creates a fresh body decoder for one attempt.
    pub(crate) fn decoder(&self) -> Box<dyn BodyDecoder> {
        match self {
            Self::Get { .. } => Box::new(ValueDecoder),
            Self::GetWithMetadata { .. } => Box::new(MetadataDecoder),
            Self::Put { .. }
            | Self::PutIfAbsent { .. }
            | Self::Replace { .. }
            | Self::ReplaceIfUnmodified { .. }
            | Self::Remove { .. }
            | Self::RemoveIfUnmodified { .. } => Box::new(WriteDecoder),
            Self::ContainsKey { .. }
            | Self::Clear
            | Self::PutAll { .. }
            | Self::IterationEnd { .. }
            | Self::AddClientListener { .. }
            | Self::AddBloomListener { .. }
            | Self::RemoveClientListener { .. }
            | Self::UpdateBloomFilter { .. } => Box::new(StatusDecoder),
            Self::Size => Box::new(SizeDecoder),
            Self::Stats => Box::new(StatsDecoder::default()),
            Self::Ping => Box::new(PingDecoder),
            Self::GetAll { .. } => Box::new(GetAllDecoder::default()),
            Self::BulkGetKeys { .. } => Box::new(BulkKeysDecoder::default()),
            Self::IterationStart(_) => Box::new(IterationStartDecoder),
            Self::IterationNext { .. } => Box::new(IterationNextDecoder::new()),
            Self::Exec { .. } => Box::new(ExecDecoder),
            Self::AuthMechList => Box::new(AuthMechListDecoder::default()),
            Self::Auth { .. } => Box::new(AuthDecoder),
        }
    }
}
