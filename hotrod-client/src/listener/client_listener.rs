//! Callback trait for remote cache events.

use hotrod_core::protocol::EventType;

use crate::listener::ClientEvent;

/// Receives events for a registered cache listener.
///
/// Events of one listener are delivered sequentially, in the order the
/// server sent them. After the listener moves to another server,
/// [`ClientListener::on_failover`] is called before any event the new
/// server sends.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl ClientListener for Printer {
///     fn on_created(&self, event: ClientEvent) {
///         println!("created {:?}", event.key());
///     }
/// }
/// ```
pub trait ClientListener: Send + Sync {
    /// Called when an entry is created.
    fn on_created(&self, event: ClientEvent) {
        let _ = event;
    }

    /// Called when an entry is modified.
    fn on_modified(&self, event: ClientEvent) {
        let _ = event;
    }

    /// Called when an entry is removed.
    fn on_removed(&self, event: ClientEvent) {
        let _ = event;
    }

    /// Called when an entry expires.
    fn on_expired(&self, event: ClientEvent) {
        let _ = event;
    }

    /// Called when the subscription was lost and re-established elsewhere.
    /// Events may have been missed in between.
    fn on_failover(&self) {}
}

pub(crate) fn deliver(listener: &dyn ClientListener, event: ClientEvent) {
    match event.event_type() {
        EventType::Created => listener.on_created(event),
        EventType::Modified => listener.on_modified(event),
        EventType::Removed => listener.on_removed(event),
        EventType::Expired => listener.on_expired(event),
    }
}

type EventFn = Box<dyn Fn(ClientEvent) + Send + Sync>;

/// A client listener built from closures.
///
/// Use [`FnClientListener::builder`] to create a new instance.
pub struct FnClientListener {
    on_created: Option<EventFn>,
    on_modified: Option<EventFn>,
    on_removed: Option<EventFn>,
    on_expired: Option<EventFn>,
    on_failover: Option<Box<dyn Fn() + Send + Sync>>,
}

impl FnClientListener {
    /// Creates a new builder.
    pub fn builder() -> FnClientListenerBuilder {
        FnClientListenerBuilder::default()
    }
}

impl ClientListener for FnClientListener {
    fn on_created(&self, event: ClientEvent) {
        if let Some(ref f) = self.on_created {
            f(event);
        }
    }

    fn on_modified(&self, event: ClientEvent) {
        if let Some(ref f) = self.on_modified {
            f(event);
        }
    }

    fn on_removed(&self, event: ClientEvent) {
        if let Some(ref f) = self.on_removed {
            f(event);
        }
    }

    fn on_expired(&self, event: ClientEvent) {
        if let Some(ref f) = self.on_expired {
            f(event);
        }
    }

    fn on_failover(&self) {
        if let Some(ref f) = self.on_failover {
            f();
        }
    }
}

impl std::fmt::Debug for FnClientListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnClientListener")
            .field("on_created", &self.on_created.is_some())
            .field("on_modified", &self.on_modified.is_some())
            .field("on_removed", &self.on_removed.is_some())
            .field("on_expired", &self.on_expired.is_some())
            .field("on_failover", &self.on_failover.is_some())
            .finish()
    }
}

/// Builder for [`FnClientListener`].
#[derive(Default)]
pub struct FnClientListenerBuilder {
    on_created: Option<EventFn>,
    on_modified: Option<EventFn>,
    on_removed: Option<EventFn>,
    on_expired: Option<EventFn>,
    on_failover: Option<Box<dyn Fn() + Send + Sync>>,
}

impl FnClientListenerBuilder {
    /// Sets the handler for created events.
    pub fn on_created<F>(mut self, f: F) -> Self
    where
        F: Fn(ClientEvent) + Send + Sync + 'static,
    {
        self.on_created = Some(Box::new(f));
        self
    }

    /// Sets the handler for modified events.
    pub fn on_modified<F>(mut self, f: F) -> Self
    where
        F: Fn(ClientEvent) + Send + Sync + 'static,
    {
        self.on_modified = Some(Box::new(f));
        self
    }

    /// Sets the handler for removed events.
    pub fn on_removed<F>(mut self, f: F) -> Self
    where
        F: Fn(ClientEvent) + Send + Sync + 'static,
    {
        self.on_removed = Some(Box::new(f));
        self
    }

    /// Sets the handler for expired events.
    pub fn on_expired<F>(mut self, f: F) -> Self
    where
        F: Fn(ClientEvent) + Send + Sync + 'static,
    {
        self.on_expired = Some(Box::new(f));
        self
    }

    /// Sets the failover handler.
    pub fn on_failover<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_failover = Some(Box::new(f));
        self
    }

    /// Builds the [`FnClientListener`].
    pub fn build(self) -> FnClientListener {
        FnClientListener {
            on_created: self.on_created,
            on_modified: self.on_modified,
            on_removed: self.on_removed,
            on_expired: self.on_expired,
            on_failover: self.on_failover,
        }
    }
}

impl std::fmt::Debug for FnClientListenerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnClientListenerBuilder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerId;
    use bytes::Bytes;
    use hotrod_core::protocol::{CacheEvent, EventPayload};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn event(event_type: EventType) -> ClientEvent {
        let id = ListenerId::new();
        ClientEvent::from_cache_event(
            id,
            CacheEvent {
                listener_id: id.to_bytes(),
                event_type,
                retried: false,
                payload: EventPayload::Key(Bytes::from_static(b"k")),
            },
        )
    }

    #[test]
    fn test_fn_listener_routes_by_type() {
        let created = Arc::new(AtomicU32::new(0));
        let removed = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&created);
        let r = Arc::clone(&removed);

        let listener = FnClientListener::builder()
            .on_created(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_removed(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        deliver(&listener, event(EventType::Created));
        deliver(&listener, event(EventType::Created));
        deliver(&listener, event(EventType::Removed));
        deliver(&listener, event(EventType::Expired));

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fn_listener_failover() {
        let failovers = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&failovers);
        let listener = FnClientListener::builder()
            .on_failover(move || {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        listener.on_failover();
        assert_eq!(failovers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fn_listener_debug() {
        let listener = FnClientListener::builder().on_created(|_| {}).build();
        let debug = format!("{:?}", listener);
        assert!(debug.contains("on_created: true"));
        assert!(debug.contains("on_expired: false"));
    }
}
