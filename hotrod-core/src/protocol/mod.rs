//! Hot Rod binary protocol implementation.
//!
//! Requests and responses are not length-prefixed. A response body can only
//! be parsed by whoever knows which request it answers, so this module keeps
//! every read resumable and leaves body decoding to the operation layer.

pub mod buf;
mod codec;
pub mod constants;
mod expiration;
mod header;
mod response;

pub use codec::{
    bitset_to_segments, codec_for_version, segments_to_bitset, ClientListenerParams, Codec,
    Codec30, Codec31, IterationStartParams, NamedFactory,
};
pub use constants::*;
pub use expiration::{Expiration, ExpirationParams};
pub use header::{DataFormat, Flags, HeaderParams, MediaType, MediaTypeName, MessageIdGenerator};
pub use response::{
    read_cache_event, read_inbound_start, read_media_type, read_message_id,
    read_topology_update, CacheEvent, EventPayload, EventType, HashUpdate, InboundStart,
    ResponseHeader, TopologyUpdate,
};
