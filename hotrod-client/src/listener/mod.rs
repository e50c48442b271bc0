//! Server-pushed cache entry events.

mod client_listener;
mod notifier;

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use hotrod_core::protocol::{
    CacheEvent, ClientListenerParams, EventPayload, EventType, NamedFactory, INTEREST_ALL,
    INTEREST_CREATED, INTEREST_EXPIRED, INTEREST_MODIFIED, INTEREST_REMOVED,
};
use uuid::Uuid;

pub use client_listener::{ClientListener, FnClientListener, FnClientListenerBuilder};
pub use notifier::ClientListenerNotifier;
pub(crate) use notifier::FailoverHandler;

/// Identity of a listener subscription, stable across failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Length of the id on the wire.
    pub const WIRE_SIZE: usize = 16;

    /// Creates a new random listener id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a listener id from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// The id as sent in requests and received in events.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_bytes())
    }

    /// Parses an id received from the server.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// An entry event delivered to a [`ClientListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEvent {
    listener_id: ListenerId,
    event_type: EventType,
    retried: bool,
    payload: EventPayload,
}

impl ClientEvent {
    pub(crate) fn from_cache_event(listener_id: ListenerId, event: CacheEvent) -> Self {
        Self {
            listener_id,
            event_type: event.event_type,
            retried: event.retried,
            payload: event.payload,
        }
    }

    /// Listener the event was sent to.
    pub fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    /// Kind of change.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// `true` when the server may have sent this event before.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Marshalled key, absent for converted events.
    pub fn key(&self) -> Option<&Bytes> {
        match &self.payload {
            EventPayload::Versioned { key, .. } | EventPayload::Key(key) => Some(key),
            EventPayload::Custom { .. } => None,
        }
    }

    /// Entry version after a create or modify.
    pub fn version(&self) -> Option<i64> {
        match &self.payload {
            EventPayload::Versioned { version, .. } => Some(*version),
            _ => None,
        }
    }

    /// Converter output of a custom event.
    pub fn custom_data(&self) -> Option<&Bytes> {
        match &self.payload {
            EventPayload::Custom { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Subscription options of a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOptions {
    include_current_state: bool,
    filter_factory: Option<NamedFactory>,
    converter_factory: Option<NamedFactory>,
    use_raw_data: bool,
    interests: u8,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            include_current_state: false,
            filter_factory: None,
            converter_factory: None,
            use_raw_data: false,
            interests: INTEREST_ALL,
        }
    }
}

impl ListenerOptions {
    /// Options receiving every event type, without filter or converter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive a created event for every existing entry on registration.
    pub fn include_current_state(mut self, include: bool) -> Self {
        self.include_current_state = include;
        self
    }

    /// Filters events on the server.
    pub fn filter_factory(mut self, factory: NamedFactory) -> Self {
        self.filter_factory = Some(factory);
        self
    }

    /// Converts events on the server.
    pub fn converter_factory(mut self, factory: NamedFactory) -> Self {
        self.converter_factory = Some(factory);
        self
    }

    /// Deliver converted events as raw bytes.
    pub fn use_raw_data(mut self, raw: bool) -> Self {
        self.use_raw_data = raw;
        self
    }

    /// Restricts delivery to the given event types.
    pub fn event_types(mut self, types: &[EventType]) -> Self {
        self.interests = types.iter().fold(0, |mask, t| {
            mask | match t {
                EventType::Created => INTEREST_CREATED,
                EventType::Modified => INTEREST_MODIFIED,
                EventType::Removed => INTEREST_REMOVED,
                EventType::Expired => INTEREST_EXPIRED,
            }
        });
        self
    }

    /// Returns `true` when existing entries are replayed on registration.
    pub fn includes_current_state(&self) -> bool {
        self.include_current_state
    }

    pub(crate) fn to_params(&self) -> ClientListenerParams {
        ClientListenerParams {
            include_current_state: self.include_current_state,
            filter_factory: self.filter_factory.clone(),
            converter_factory: self.converter_factory.clone(),
            use_raw_data: self.use_raw_data,
            interests: self.interests,
        }
    }
}

/// Per-listener delivery counters.
#[derive(Debug, Default)]
pub struct ListenerStats {
    events_delivered: AtomicU64,
    failovers: AtomicU64,
}

impl ListenerStats {
    /// Creates new listener statistics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_event(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    /// Events handed to the listener.
    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    /// Times the subscription moved to another server.
    pub fn failovers(&self) -> u64 {
        self.failovers.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_id_uniqueness() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_listener_id_display() {
        let id = ListenerId::new();
        assert!(id.to_string().starts_with("listener-"));
    }

    #[test]
    fn test_listener_id_wire_form() {
        let id = ListenerId::new();
        let bytes = id.to_bytes();
        assert_eq!(bytes.len(), ListenerId::WIRE_SIZE);
        assert_eq!(ListenerId::from_bytes(&bytes), Some(id));
        assert_eq!(ListenerId::from_bytes(b"short"), None);
    }

    #[test]
    fn test_event_accessors() {
        let id = ListenerId::new();
        let event = ClientEvent::from_cache_event(
            id,
            CacheEvent {
                listener_id: id.to_bytes(),
                event_type: EventType::Modified,
                retried: true,
                payload: EventPayload::Versioned {
                    key: Bytes::from_static(b"k"),
                    version: 4,
                },
            },
        );
        assert_eq!(event.listener_id(), id);
        assert_eq!(event.event_type(), EventType::Modified);
        assert!(event.is_retried());
        assert_eq!(event.key().unwrap().as_ref(), b"k");
        assert_eq!(event.version(), Some(4));
        assert!(event.custom_data().is_none());
    }

    #[test]
    fn test_options_interests() {
        let params = ListenerOptions::new()
            .event_types(&[EventType::Created, EventType::Removed])
            .to_params();
        assert_eq!(params.interests, INTEREST_CREATED | INTEREST_REMOVED);
        assert_eq!(ListenerOptions::default().to_params().interests, INTEREST_ALL);
    }

    #[test]
    fn test_listener_stats() {
        let stats = ListenerStats::new();
        stats.record_event();
        stats.record_event();
        stats.record_failover();

        assert_eq!(stats.events_delivered(), 2);
        assert_eq!(stats.failovers(), 1);
    }

    #[test]
    fn test_listener_id_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ListenerId>();
    }
}
