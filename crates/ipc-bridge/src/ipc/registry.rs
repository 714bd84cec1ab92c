//! Listener registry - bus listeners installed on behalf of clients.
//!
//! At most one forwarding listener exists per `(event, connection, kind)`.
//! An entry goes away on explicit removal, when its connection closes, or
//! lazily the next time the bus triggers it and finds the connection dead.

use crate::domain::correlation::ConnectionId;
use crate::domain::message::{RequestId, WireMessage};
use crate::domain::pending::PendingRequestStore;
use crate::ipc::connection::{ConnectionHandle, PushError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use shared_bus::{
    event_handler, request_handler, BusError, BusResult, ListenerId, MessageBus, RequestMetadata,
    Scope,
};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Direction of a forwarding listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    /// Bus events pushed to the client
    Event,
    /// Bus requests served by the client
    Request,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Event => f.write_str("event"),
            ListenerKind::Request => f.write_str("request"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    pub event: String,
    pub connection_id: ConnectionId,
    pub kind: ListenerKind,
}

impl ListenerKey {
    pub fn new(event: impl Into<String>, connection_id: ConnectionId, kind: ListenerKind) -> Self {
        Self {
            event: event.into(),
            connection_id,
            kind,
        }
    }
}

/// A bus listener owned by a client connection
#[derive(Debug, Clone)]
pub struct ForwardingListener {
    /// Id handed out by the bus
    pub listener_id: ListenerId,
    /// Scope it was installed with
    pub scope: Scope,
    /// When it was installed
    pub installed_at: Instant,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} listener for '{event}' already installed on this connection")]
    AlreadyInstalled { event: String, kind: ListenerKind },
}

pub struct ListenerRegistry {
    bus: Arc<dyn MessageBus>,
    pending: Arc<PendingRequestStore>,
    /// All forwarding listeners by key
    listeners: DashMap<ListenerKey, ForwardingListener>,
    /// Keys by connection ID
    by_connection: DashMap<ConnectionId, Vec<ListenerKey>>,
}

impl ListenerRegistry {
    pub fn new(bus: Arc<dyn MessageBus>, pending: Arc<PendingRequestStore>) -> Self {
        Self {
            bus,
            pending,
            listeners: DashMap::new(),
            by_connection: DashMap::new(),
        }
    }

    /// Forward every emission of `event` to `connection`.
    pub fn add_event_listener(
        self: &Arc<Self>,
        connection: &ConnectionHandle,
        event: &str,
        scope: Scope,
    ) -> Result<ListenerId, RegistryError> {
        let key = ListenerKey::new(event, connection.id(), ListenerKind::Event);

        let registry = Arc::downgrade(self);
        let conn = connection.clone();
        let handler_key = key.clone();
        let handler = event_handler(move |params| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            registry.forward_event(&handler_key, &conn, params);
        });

        self.install(key, scope, |bus, scope| {
            bus.add_event_listener(event, scope, handler)
        })
    }

    /// Let `connection` serve bus requests on `event`.
    pub fn add_request_listener(
        self: &Arc<Self>,
        connection: &ConnectionHandle,
        event: &str,
        scope: Scope,
    ) -> Result<ListenerId, RegistryError> {
        let key = ListenerKey::new(event, connection.id(), ListenerKind::Request);

        let registry = Arc::downgrade(self);
        let conn = connection.clone();
        let handler_key = key.clone();
        let handler = request_handler(move |metadata, params| {
            forward_request(
                registry.clone(),
                handler_key.clone(),
                conn.clone(),
                metadata,
                params,
            )
        });

        self.install(key, scope, |bus, scope| {
            bus.add_request_listener(event, scope, handler)
        })
    }

    /// Remove one listener. Returns false if it was not installed.
    pub fn remove(&self, event: &str, connection_id: ConnectionId, kind: ListenerKind) -> bool {
        self.retire(&ListenerKey::new(event, connection_id, kind))
    }

    /// Remove every listener owned by a connection.
    ///
    /// Returns the number of listeners removed.
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> usize {
        let Some((_, keys)) = self.by_connection.remove(connection_id) else {
            return 0;
        };

        let mut removed = 0;
        for key in &keys {
            if let Some((key, listener)) = self.listeners.remove(key) {
                self.uninstall(&key, &listener);
                removed += 1;
            }
        }

        debug!(
            connection_id = %connection_id,
            removed = removed,
            "Removed all listeners for connection"
        );
        removed
    }

    pub fn contains(&self, event: &str, connection_id: ConnectionId, kind: ListenerKind) -> bool {
        self.listeners
            .contains_key(&ListenerKey::new(event, connection_id, kind))
    }

    /// Number of installed listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Number of connections owning at least one listener
    pub fn connection_count(&self) -> usize {
        self.by_connection.iter().filter(|e| !e.value().is_empty()).count()
    }

    /// Install on the bus and record the entry while holding the vacant slot,
    /// so two adds for the same key cannot both reach the bus.
    fn install(
        &self,
        key: ListenerKey,
        scope: Scope,
        add_to_bus: impl FnOnce(&dyn MessageBus, Scope) -> ListenerId,
    ) -> Result<ListenerId, RegistryError> {
        let slot = match self.listeners.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(RegistryError::AlreadyInstalled {
                    event: key.event,
                    kind: key.kind,
                })
            }
            Entry::Vacant(slot) => slot,
        };

        let listener_id = add_to_bus(self.bus.as_ref(), scope.clone());
        self.by_connection
            .entry(key.connection_id)
            .or_default()
            .push(key.clone());
        slot.insert(ForwardingListener {
            listener_id,
            scope,
            installed_at: Instant::now(),
        });

        debug!(
            event = %key.event,
            connection_id = %key.connection_id,
            kind = %key.kind,
            listener_id = %listener_id,
            "Installed forwarding listener"
        );
        Ok(listener_id)
    }

    /// Remove a single entry from both maps and from the bus.
    fn retire(&self, key: &ListenerKey) -> bool {
        let Some((key, listener)) = self.listeners.remove(key) else {
            return false;
        };
        if let Some(mut keys) = self.by_connection.get_mut(&key.connection_id) {
            keys.retain(|k| k != &key);
        }
        self.by_connection
            .remove_if(&key.connection_id, |_, keys| keys.is_empty());
        self.uninstall(&key, &listener);
        true
    }

    fn uninstall(&self, key: &ListenerKey, listener: &ForwardingListener) {
        let removed = match key.kind {
            ListenerKind::Event => self
                .bus
                .remove_event_listener(&key.event, listener.listener_id),
            ListenerKind::Request => self
                .bus
                .remove_request_listener(&key.event, listener.listener_id),
        };
        debug!(
            event = %key.event,
            connection_id = %key.connection_id,
            kind = %key.kind,
            scope = %listener.scope.as_value(),
            lived_ms = listener.installed_at.elapsed().as_millis() as u64,
            removed_from_bus = removed,
            "Removed forwarding listener"
        );
    }

    fn forward_event(&self, key: &ListenerKey, conn: &ConnectionHandle, params: Vec<Value>) {
        if !conn.is_alive() {
            debug!(event = %key.event, connection_id = %key.connection_id, "Connection gone, dropping event listener");
            self.retire(key);
            return;
        }

        let message = WireMessage::Event {
            event: key.event.clone(),
            params,
        };
        match conn.push(message) {
            Ok(()) => {}
            Err(PushError::Closed) => {
                self.retire(key);
            }
            Err(e) => {
                warn!(event = %key.event, connection_id = %key.connection_id, error = %e, "Failed to forward event");
            }
        }
    }
}

async fn forward_request(
    registry: Weak<ListenerRegistry>,
    key: ListenerKey,
    conn: ConnectionHandle,
    metadata: RequestMetadata,
    params: Vec<Value>,
) -> BusResult<Value> {
    let Some(registry) = registry.upgrade() else {
        return Ok(Value::Null);
    };

    if !conn.is_alive() {
        debug!(event = %key.event, connection_id = %key.connection_id, "Connection gone, dropping request listener");
        registry.retire(&key);
        return Ok(Value::Null);
    }

    let (request_id, waiter) = registry.pending.register(
        &key.event,
        Some(RequestId::Text(metadata.request_id)),
        key.connection_id,
        None,
    );

    let message = WireMessage::Request {
        event: key.event.clone(),
        request_id: request_id.clone(),
        params,
    };
    if let Err(e) = conn.push(message) {
        warn!(
            event = %key.event,
            request_id = %request_id,
            connection_id = %key.connection_id,
            error = %e,
            "Failed to forward request"
        );
        drop(waiter);
        if e == PushError::Closed {
            registry.retire(&key);
        }
        return Err(BusError::ConnectionClosed);
    }

    // Only the waiter is needed while the client answers.
    drop(registry);
    waiter.wait().await
}
