//! # Message Bus
//!
//! The bus contract consumed by the bridge, and an in-memory implementation.

use crate::events::{
    BusError, BusEvent, BusResult, EventFilter, EventHandler, ListenerId, RequestHandler,
    RequestMetadata, Scope,
};
use crate::subscriber::Subscription;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Publish/request fabric with per-event listeners.
///
/// Listener removal is keyed by event name plus the [`ListenerId`] returned
/// on installation. Removing an unknown listener is a no-op.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Emit an event to every listener of `event`.
    ///
    /// Returns the number of listeners invoked.
    async fn publish(&self, event: &str, params: Vec<Value>) -> BusResult<usize>;

    /// Issue a request and wait for whichever listener serves it.
    async fn request(&self, event: &str, params: Vec<Value>) -> BusResult<Value>;

    /// Install an event listener.
    fn add_event_listener(&self, event: &str, scope: Scope, handler: EventHandler) -> ListenerId;

    /// Remove an event listener. Returns true if it was installed.
    fn remove_event_listener(&self, event: &str, id: ListenerId) -> bool;

    /// Install a request listener.
    fn add_request_listener(
        &self,
        event: &str,
        scope: Scope,
        handler: RequestHandler,
    ) -> ListenerId;

    /// Remove a request listener. Returns true if it was installed.
    fn remove_request_listener(&self, event: &str, id: ListenerId) -> bool;
}

struct Registered<H> {
    id: ListenerId,
    scope: Scope,
    handler: H,
}

/// In-memory implementation of the message bus.
///
/// Handlers are always invoked after the listener table lock is released,
/// so a handler may add or remove listeners (including itself) while it runs.
/// When several request listeners serve the same event, the oldest one wins.
pub struct InMemoryMessageBus {
    /// Broadcast sender feeding bus taps.
    sender: broadcast::Sender<BusEvent>,

    event_listeners: RwLock<HashMap<String, Vec<Registered<EventHandler>>>>,

    request_listeners: RwLock<HashMap<String, Vec<Registered<RequestHandler>>>>,

    next_listener_id: AtomicU64,

    /// Total events published.
    events_published: AtomicU64,

    /// Total requests issued.
    requests_issued: AtomicU64,

    /// Tap channel capacity.
    capacity: usize,
}

impl InMemoryMessageBus {
    /// Create a new in-memory bus with default tap capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new in-memory bus with specified tap capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            event_listeners: RwLock::new(HashMap::new()),
            request_listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            events_published: AtomicU64::new(0),
            requests_issued: AtomicU64::new(0),
            capacity,
        }
    }

    /// Observe published events matching a filter.
    ///
    /// Only events published after this call are seen.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        debug!(events = ?filter.events, "New bus tap created");
        Subscription::new(self.sender.subscribe(), filter)
    }

    /// Number of event listeners installed for `event`.
    #[must_use]
    pub fn event_listener_count(&self, event: &str) -> usize {
        self.event_listeners.read().get(event).map_or(0, Vec::len)
    }

    /// Number of request listeners installed for `event`.
    #[must_use]
    pub fn request_listener_count(&self, event: &str) -> usize {
        self.request_listeners.read().get(event).map_or(0, Vec::len)
    }

    /// Scopes of the event listeners installed for `event`, oldest first.
    #[must_use]
    pub fn event_listener_scopes(&self, event: &str) -> Vec<Scope> {
        self.event_listeners
            .read()
            .get(event)
            .map(|ls| ls.iter().map(|l| l.scope.clone()).collect())
            .unwrap_or_default()
    }

    /// Scopes of the request listeners installed for `event`, oldest first.
    #[must_use]
    pub fn request_listener_scopes(&self, event: &str) -> Vec<Scope> {
        self.request_listeners
            .read()
            .get(event)
            .map(|ls| ls.iter().map(|l| l.scope.clone()).collect())
            .unwrap_or_default()
    }

    /// Get the total number of events published.
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    /// Get the total number of requests issued.
    pub fn requests_issued(&self) -> u64 {
        self.requests_issued.load(Ordering::Relaxed)
    }

    /// Get the tap channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_listener<H>(
    table: &RwLock<HashMap<String, Vec<Registered<H>>>>,
    event: &str,
    id: ListenerId,
) -> bool {
    let mut table = table.write();
    let Some(listeners) = table.get_mut(event) else {
        return false;
    };
    let before = listeners.len();
    listeners.retain(|l| l.id != id);
    let removed = listeners.len() != before;
    if listeners.is_empty() {
        table.remove(event);
    }
    removed
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, event: &str, params: Vec<Value>) -> BusResult<usize> {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        let handlers: Vec<EventHandler> = self
            .event_listeners
            .read()
            .get(event)
            .map(|ls| ls.iter().map(|l| l.handler.clone()).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(params.clone());
        }

        // A tap with no receivers is not an error.
        let _ = self.sender.send(BusEvent::new(event, params));

        debug!(event = event, listeners = handlers.len(), "Event published");
        Ok(handlers.len())
    }

    async fn request(&self, event: &str, params: Vec<Value>) -> BusResult<Value> {
        self.requests_issued.fetch_add(1, Ordering::Relaxed);

        let handler = self
            .request_listeners
            .read()
            .get(event)
            .and_then(|ls| ls.first())
            .map(|l| l.handler.clone());

        let Some(handler) = handler else {
            debug!(event = event, "Request dropped (no request listener)");
            return Err(BusError::NoHandler(event.to_string()));
        };

        let metadata = RequestMetadata {
            request_id: Uuid::new_v4().to_string(),
        };
        debug!(event = event, request_id = %metadata.request_id, "Request dispatched");
        handler(metadata, params).await
    }

    fn add_event_listener(&self, event: &str, scope: Scope, handler: EventHandler) -> ListenerId {
        let id = self.next_id();
        self.event_listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Registered { id, scope, handler });
        debug!(event = event, listener = %id, "Event listener added");
        id
    }

    fn remove_event_listener(&self, event: &str, id: ListenerId) -> bool {
        let removed = remove_listener(&self.event_listeners, event, id);
        if removed {
            debug!(event = event, listener = %id, "Event listener removed");
        }
        removed
    }

    fn add_request_listener(
        &self,
        event: &str,
        scope: Scope,
        handler: RequestHandler,
    ) -> ListenerId {
        let id = self.next_id();
        self.request_listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Registered { id, scope, handler });
        debug!(event = event, listener = %id, "Request listener added");
        id
    }

    fn remove_request_listener(&self, event: &str, id: ListenerId) -> bool {
        let removed = remove_listener(&self.request_listeners, event, id);
        if removed {
            debug!(event = event, listener = %id, "Request listener removed");
        }
        removed
    }
}
