//! Bridge router - dispatches inbound wire messages.
//!
//! The router owns neither the bus nor the sockets. It holds the bus handle,
//! the [`ListenerRegistry`] and the [`PendingRequestStore`], and is handed a
//! [`ConnectionHandle`] with every message. No inbound message can make it
//! fail; bad input is logged and dropped.

use crate::domain::correlation::ConnectionId;
use crate::domain::message::{
    ListenerSpec, MessageError, RequestId, ResponseMessage, WireMessage,
};
use crate::domain::pending::PendingRequestStore;
use crate::ipc::connection::ConnectionHandle;
use crate::ipc::registry::{ListenerKind, ListenerRegistry};
use serde_json::Value;
use shared_bus::MessageBus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct BridgeRouter {
    bus: Arc<dyn MessageBus>,
    registry: Arc<ListenerRegistry>,
    pending: Arc<PendingRequestStore>,
}

impl BridgeRouter {
    /// Create a router whose forwarded requests expire after `request_timeout`.
    pub fn new(bus: Arc<dyn MessageBus>, request_timeout: Option<Duration>) -> Self {
        let pending = Arc::new(PendingRequestStore::new(request_timeout));
        let registry = Arc::new(ListenerRegistry::new(
            Arc::clone(&bus),
            Arc::clone(&pending),
        ));
        Self {
            bus,
            registry,
            pending,
        }
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn pending(&self) -> &Arc<PendingRequestStore> {
        &self.pending
    }

    /// Classify a decoded JSON value and dispatch it.
    pub async fn handle_raw(&self, raw: Value, connection: &ConnectionHandle) {
        match WireMessage::parse(raw) {
            Ok(message) => self.handle(message, connection).await,
            Err(MessageError::UnknownType(kind)) => {
                warn!(
                    connection_id = %connection.id(),
                    message_type = %kind,
                    "Ignoring invalid message"
                );
            }
            Err(MessageError::Malformed(reason)) => {
                warn!(
                    connection_id = %connection.id(),
                    reason = %reason,
                    "Ignoring invalid message"
                );
            }
        }
    }

    /// Dispatch one message from `connection`.
    pub async fn handle(&self, message: WireMessage, connection: &ConnectionHandle) {
        debug!(
            connection_id = %connection.id(),
            message_type = %message.message_type(),
            event = %message.event(),
            "Handling IPC message"
        );

        match message {
            WireMessage::Event { event, params } => self.publish(event, params).await,
            WireMessage::Request {
                event,
                request_id,
                params,
            } => self.request(event, request_id, params, connection),
            WireMessage::Response(response) => self.respond(response),
            WireMessage::AddEventListener(spec) => {
                self.add_listener(spec, ListenerKind::Event, connection)
            }
            WireMessage::AddRequestListener(spec) => {
                self.add_listener(spec, ListenerKind::Request, connection)
            }
            WireMessage::RemoveEventListener(spec) => {
                self.remove_listener(spec, ListenerKind::Event, connection)
            }
            WireMessage::RemoveRequestListener(spec) => {
                self.remove_listener(spec, ListenerKind::Request, connection)
            }
            unsupported @ (WireMessage::AddResponseListener(_)
            | WireMessage::RemoveResponseListener(_)
            | WireMessage::AddEventSubscriberListener(_)
            | WireMessage::RemoveEventSubscriberListener(_)) => {
                info!(
                    connection_id = %connection.id(),
                    message_type = %unsupported.message_type(),
                    event = %unsupported.event(),
                    "Unsupported listener type, ignoring"
                );
            }
        }
    }

    /// Tear down everything a closed connection owned.
    pub fn connection_closed(&self, connection_id: ConnectionId) {
        let listeners = self.registry.remove_connection(&connection_id);
        let requests = self.pending.remove_connection(&connection_id);
        info!(
            connection_id = %connection_id,
            listeners_removed = listeners,
            requests_rejected = requests,
            "IPC connection closed"
        );
    }

    async fn publish(&self, event: String, params: Vec<Value>) {
        if let Err(e) = self.bus.publish(&event, params).await {
            warn!(event = %event, error = %e, "Failed to publish client event");
        }
    }

    fn request(
        &self,
        event: String,
        request_id: RequestId,
        params: Vec<Value>,
        connection: &ConnectionHandle,
    ) {
        let bus = Arc::clone(&self.bus);
        let connection = connection.clone();
        tokio::spawn(async move {
            match bus.request(&event, params).await {
                Ok(result) => {
                    let response =
                        WireMessage::Response(ResponseMessage::success(&event, request_id, result));
                    if let Err(e) = connection.push(response) {
                        warn!(
                            connection_id = %connection.id(),
                            event = %event,
                            error = %e,
                            "Failed to send response"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        connection_id = %connection.id(),
                        event = %event,
                        request_id = %request_id,
                        error = %e,
                        "Client request failed"
                    );
                }
            }
        });
    }

    fn respond(&self, response: ResponseMessage) {
        let event = response.event.clone();
        let response_id = response.response_id.clone();
        if !self
            .pending
            .complete(&event, &response_id, response.into_outcome())
        {
            debug!(event = %event, response_id = %response_id, "Response matched no pending request");
        }
    }

    fn add_listener(&self, spec: ListenerSpec, kind: ListenerKind, connection: &ConnectionHandle) {
        let scope = spec.scope();
        let added = match kind {
            ListenerKind::Event => {
                self.registry
                    .add_event_listener(connection, &spec.event, scope)
            }
            ListenerKind::Request => {
                self.registry
                    .add_request_listener(connection, &spec.event, scope)
            }
        };
        if let Err(e) = added {
            info!(connection_id = %connection.id(), error = %e, "Listener not added");
        }
    }

    fn remove_listener(
        &self,
        spec: ListenerSpec,
        kind: ListenerKind,
        connection: &ConnectionHandle,
    ) {
        if !self.registry.remove(&spec.event, connection.id(), kind) {
            debug!(
                connection_id = %connection.id(),
                event = %spec.event,
                kind = %kind,
                "No listener to remove"
            );
        }
    }
}
