//! Routes pushed events to registered listeners.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hotrod_core::protocol::CacheEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::client_listener::{deliver, ClientListener};
use super::{ClientEvent, ListenerId, ListenerStats};
use crate::diagnostics::ClientStatistics;

/// Re-registers a listener after the server hosting it went away.
#[async_trait]
pub(crate) trait FailoverHandler: Send + Sync {
    async fn failover(&self);
}

enum Delivery {
    Event(ClientEvent),
    Failover,
}

struct Dispatcher {
    cache_name: Bytes,
    listener: Arc<dyn ClientListener>,
    address: Option<SocketAddr>,
    queue: mpsc::UnboundedSender<Delivery>,
    pending: Option<mpsc::UnboundedReceiver<Delivery>>,
    task: Option<JoinHandle<()>>,
    failover: Arc<dyn FailoverHandler>,
    stats: Arc<ListenerStats>,
}

/// Keeps one dispatcher per listener id.
///
/// A dispatcher exists from just before registration until removal. Events
/// that arrive before [`ClientListenerNotifier::start_client_listener`] are
/// buffered, then handed to the listener one at a time by a dedicated task.
pub struct ClientListenerNotifier {
    dispatchers: Mutex<HashMap<ListenerId, Dispatcher>>,
    statistics: Arc<ClientStatistics>,
}

impl ClientListenerNotifier {
    /// Creates a notifier recording deliveries into `statistics`.
    pub fn new(statistics: Arc<ClientStatistics>) -> Self {
        Self {
            dispatchers: Mutex::new(HashMap::new()),
            statistics,
        }
    }

    pub(crate) fn add_dispatcher(
        &self,
        listener_id: ListenerId,
        cache_name: Bytes,
        listener: Arc<dyn ClientListener>,
        failover: Arc<dyn FailoverHandler>,
    ) -> Arc<ListenerStats> {
        let (queue, pending) = mpsc::unbounded_channel();
        let stats = Arc::new(ListenerStats::new());
        self.dispatchers.lock().insert(
            listener_id,
            Dispatcher {
                cache_name,
                listener,
                address: None,
                queue,
                pending: Some(pending),
                task: None,
                failover,
                stats: Arc::clone(&stats),
            },
        );
        stats
    }

    /// Marks a listener as served by `address` and starts delivering its events.
    pub(crate) fn start_client_listener(&self, listener_id: ListenerId, address: SocketAddr) {
        let mut dispatchers = self.dispatchers.lock();
        let Some(dispatcher) = dispatchers.get_mut(&listener_id) else {
            return;
        };
        dispatcher.address = Some(address);
        if let Some(mut pending) = dispatcher.pending.take() {
            let listener = Arc::clone(&dispatcher.listener);
            let stats = Arc::clone(&dispatcher.stats);
            let statistics = Arc::clone(&self.statistics);
            dispatcher.task = Some(tokio::spawn(async move {
                while let Some(delivery) = pending.recv().await {
                    match delivery {
                        Delivery::Event(event) => {
                            stats.record_event();
                            statistics.record_listener_event();
                            deliver(listener.as_ref(), event);
                        }
                        Delivery::Failover => {
                            stats.record_failover();
                            listener.on_failover();
                        }
                    }
                }
            }));
        }
        tracing::debug!(listener_id = %listener_id, address = %address, "listener started");
    }

    /// Drops the dispatcher of a listener. Queued events are still delivered.
    pub(crate) fn remove_client_listener(&self, listener_id: &ListenerId) -> bool {
        let removed = self.dispatchers.lock().remove(listener_id);
        if removed.is_some() {
            tracing::debug!(listener_id = %listener_id, "listener removed");
        }
        removed.is_some()
    }

    /// Server currently hosting a listener.
    pub fn find_address(&self, listener_id: &ListenerId) -> Option<SocketAddr> {
        self.dispatchers.lock().get(listener_id).and_then(|d| d.address)
    }

    /// Cache a listener is registered on.
    pub fn cache_name(&self, listener_id: &ListenerId) -> Option<Bytes> {
        self.dispatchers.lock().get(listener_id).map(|d| d.cache_name.clone())
    }

    /// Delivery counters of a listener.
    pub fn stats(&self, listener_id: &ListenerId) -> Option<Arc<ListenerStats>> {
        self.dispatchers.lock().get(listener_id).map(|d| Arc::clone(&d.stats))
    }

    /// Ids of every registered listener.
    pub fn listener_ids(&self) -> Vec<ListenerId> {
        self.dispatchers.lock().keys().copied().collect()
    }

    /// Queues an event pushed by the server at `address`.
    pub(crate) fn dispatch(&self, address: SocketAddr, event: CacheEvent) {
        let Some(listener_id) = ListenerId::from_bytes(&event.listener_id) else {
            tracing::warn!(address = %address, "event with malformed listener id");
            return;
        };
        let dispatchers = self.dispatchers.lock();
        match dispatchers.get(&listener_id) {
            Some(dispatcher) => {
                let _ = dispatcher
                    .queue
                    .send(Delivery::Event(ClientEvent::from_cache_event(listener_id, event)));
            }
            None => {
                tracing::trace!(listener_id = %listener_id, address = %address, "event for unknown listener");
            }
        }
    }

    /// Re-registers listeners whose channel closed.
    ///
    /// Each listener is told about the failover before any event of the new
    /// registration. Events sent while no server hosted it are lost.
    pub(crate) fn failover(&self, listener_ids: &[ListenerId]) {
        let handlers: Vec<(ListenerId, Arc<dyn FailoverHandler>)> = {
            let mut dispatchers = self.dispatchers.lock();
            listener_ids
                .iter()
                .filter_map(|id| {
                    let dispatcher = dispatchers.get_mut(id)?;
                    dispatcher.address = None;
                    let _ = dispatcher.queue.send(Delivery::Failover);
                    Some((*id, Arc::clone(&dispatcher.failover)))
                })
                .collect()
        };

        for (listener_id, handler) in handlers {
            tracing::warn!(listener_id = %listener_id, "listener lost its server, failing over");
            tokio::spawn(async move { handler.failover().await });
        }
    }

    /// Drops every dispatcher.
    pub(crate) fn shutdown(&self) {
        let dispatchers: Vec<Dispatcher> = self.dispatchers.lock().drain().map(|(_, d)| d).collect();
        for dispatcher in dispatchers {
            if let Some(task) = dispatcher.task {
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for ClientListenerNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientListenerNotifier")
            .field("listeners", &self.dispatchers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::FnClientListener;
    use hotrod_core::protocol::{EventPayload, EventType};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingFailover(AtomicU32);

    #[async_trait]
    impl FailoverHandler for CountingFailover {
        async fn failover(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn created(id: ListenerId, key: &'static [u8]) -> CacheEvent {
        CacheEvent {
            listener_id: id.to_bytes(),
            event_type: EventType::Created,
            retried: false,
            payload: EventPayload::Versioned {
                key: Bytes::from_static(key),
                version: 1,
            },
        }
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn recording_listener() -> (Arc<dyn ClientListener>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::clone(&log);
        let failovers = Arc::clone(&log);
        let listener = FnClientListener::builder()
            .on_created(move |e| {
                let key = String::from_utf8_lossy(e.key().unwrap()).into_owned();
                events.lock().push(key);
            })
            .on_failover(move || failovers.lock().push("failover".to_string()))
            .build();
        (Arc::new(listener), log)
    }

    #[tokio::test]
    async fn test_events_before_start_are_buffered_in_order() {
        let notifier = ClientListenerNotifier::new(Arc::new(ClientStatistics::new()));
        let id = ListenerId::new();
        let (listener, log) = recording_listener();
        notifier.add_dispatcher(id, Bytes::new(), listener, Arc::new(CountingFailover::default()));

        notifier.dispatch(addr(1), created(id, b"a"));
        notifier.dispatch(addr(1), created(id, b"b"));
        assert!(log.lock().is_empty());
        assert_eq!(notifier.find_address(&id), None);

        notifier.start_client_listener(id, addr(1));
        assert_eq!(notifier.find_address(&id), Some(addr(1)));
        eventually(|| log.lock().len() == 2).await;
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failover_notifies_before_new_events() {
        let statistics = Arc::new(ClientStatistics::new());
        let notifier = ClientListenerNotifier::new(Arc::clone(&statistics));
        let id = ListenerId::new();
        let (listener, log) = recording_listener();
        let handler = Arc::new(CountingFailover::default());
        let stats = notifier.add_dispatcher(id, Bytes::new(), listener, handler.clone());
        notifier.start_client_listener(id, addr(1));

        notifier.failover(&[id, ListenerId::new()]);
        assert_eq!(notifier.find_address(&id), None);
        eventually(|| handler.0.load(Ordering::SeqCst) == 1).await;

        notifier.start_client_listener(id, addr(2));
        notifier.dispatch(addr(2), created(id, b"c"));
        eventually(|| log.lock().len() == 2).await;

        assert_eq!(*log.lock(), vec!["failover", "c"]);
        assert_eq!(stats.failovers(), 1);
        assert_eq!(stats.events_delivered(), 1);
        assert_eq!(statistics.listener_events(), 1);
    }

    #[tokio::test]
    async fn test_removed_listener_gets_no_events() {
        let notifier = ClientListenerNotifier::new(Arc::new(ClientStatistics::new()));
        let id = ListenerId::new();
        let (listener, log) = recording_listener();
        notifier.add_dispatcher(id, Bytes::from_static(b"c"), listener, Arc::new(CountingFailover::default()));
        notifier.start_client_listener(id, addr(1));

        assert!(notifier.remove_client_listener(&id));
        assert!(!notifier.remove_client_listener(&id));
        notifier.dispatch(addr(1), created(id, b"late"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(log.lock().is_empty());
        assert!(notifier.listener_ids().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_listener_id_is_ignored() {
        let notifier = ClientListenerNotifier::new(Arc::new(ClientStatistics::new()));
        let mut event = created(ListenerId::new(), b"k");
        event.listener_id = Bytes::from_static(b"bad");
        notifier.dispatch(addr(1), event);
    }
}
