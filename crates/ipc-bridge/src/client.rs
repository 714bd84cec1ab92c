//! Client side of the IPC socket.
//!
//! [`IpcClient`] lets an out-of-process program publish events, issue
//! requests, receive events and serve requests through a running bridge.
//! Like the bridge, it prepends the scope to the params of every event and
//! request it sends.
//!
//! ```ignore
//! let client = IpcClient::connect("/tmp/bits.abc123").await?;
//! client.send_event("bits-ipc#Client connected", json!({"scopes": null}), vec![]).await?;
//! let id = client.send_request("base#System bitsId", json!({"scopes": null}), vec![]).await?;
//! ```

use crate::domain::correlation::{ConnectionId, CorrelationId};
use crate::domain::error::ClientError;
use crate::domain::message::{ListenerSpec, RequestId, ResponseMessage, WireMessage};
use crate::domain::pending::PendingRequestStore;
use crate::transport::codec::{encode_frame, FrameCodec};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::StreamExt;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

/// Default time `send_request` waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of queues between the client and its socket tasks.
const QUEUE_DEPTH: usize = 256;

/// Largest frame the client accepts.
const MAX_FRAME: usize = 8 * 1024 * 1024;

/// Serves a request forwarded by the bridge. `Err` is sent back as `err`.
pub type ClientRequestHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, Value>> + Send + Sync>;

/// Wrap an async closure as a [`ClientRequestHandler`].
pub fn client_request_handler<F, Fut>(f: F) -> ClientRequestHandler
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Value>> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

struct ClientState {
    id: ConnectionId,
    outbound: mpsc::Sender<WireMessage>,
    pending: Arc<PendingRequestStore>,
    event_listeners: DashMap<String, mpsc::Sender<Vec<Value>>>,
    request_listeners: DashMap<String, ClientRequestHandler>,
}

pub struct IpcClient {
    state: Arc<ClientState>,
    request_timeout: Duration,
    close_tx: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
}

impl IpcClient {
    /// Connect to a bridge socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path.as_ref())
            .await
            .map_err(ClientError::Connect)?;
        let (read_half, write_half) = stream.into_split();

        let (outbound, outbound_rx) = mpsc::channel(QUEUE_DEPTH);
        let state = Arc::new(ClientState {
            id: CorrelationId::new(),
            outbound,
            pending: Arc::new(PendingRequestStore::new(None)),
            event_listeners: DashMap::new(),
            request_listeners: DashMap::new(),
        });

        let (close_tx, close_rx) = oneshot::channel();
        let writer = tokio::spawn(write_loop(write_half, outbound_rx, close_rx));
        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&state)));

        debug!(connection_id = %state.id, path = %path.as_ref().display(), "Connected to IPC bridge");
        Ok(Self {
            state,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            close_tx: Some(close_tx),
            writer: Some(writer),
            reader,
        })
    }

    /// Change how long `send_request` waits.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Publish an event on the host bus.
    pub async fn send_event(
        &self,
        event: &str,
        scope: Value,
        args: Vec<Value>,
    ) -> Result<(), ClientError> {
        self.send(WireMessage::Event {
            event: event.to_string(),
            params: with_scope(scope, args),
        })
        .await
    }

    /// Issue a request on the host bus and wait for its result.
    pub async fn send_request(
        &self,
        event: &str,
        scope: Value,
        args: Vec<Value>,
    ) -> Result<Value, ClientError> {
        let (request_id, waiter) = self.state.pending.register(
            event,
            None,
            self.state.id,
            Some(self.request_timeout),
        );
        self.send(WireMessage::Request {
            event: event.to_string(),
            request_id,
            params: with_scope(scope, args),
        })
        .await?;
        Ok(waiter.wait().await?)
    }

    /// Receive every emission of `event`.
    pub async fn add_event_listener(
        &self,
        event: &str,
        scope: Value,
    ) -> Result<mpsc::Receiver<Vec<Value>>, ClientError> {
        if self.state.event_listeners.contains_key(event) {
            return Err(ClientError::AlreadyListening(event.to_string()));
        }
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        self.state.event_listeners.insert(event.to_string(), tx);
        self.send(WireMessage::AddEventListener(ListenerSpec::new(event, scope)))
            .await?;
        Ok(rx)
    }

    pub async fn remove_event_listener(&self, event: &str, scope: Value) -> Result<(), ClientError> {
        self.state.event_listeners.remove(event);
        self.send(WireMessage::RemoveEventListener(ListenerSpec::new(event, scope)))
            .await
    }

    /// Serve bus requests on `event` with `handler`.
    pub async fn add_request_listener(
        &self,
        event: &str,
        scope: Value,
        handler: ClientRequestHandler,
    ) -> Result<(), ClientError> {
        if self.state.request_listeners.contains_key(event) {
            return Err(ClientError::AlreadyListening(event.to_string()));
        }
        self.state
            .request_listeners
            .insert(event.to_string(), handler);
        self.send(WireMessage::AddRequestListener(ListenerSpec::new(event, scope)))
            .await
    }

    pub async fn remove_request_listener(
        &self,
        event: &str,
        scope: Value,
    ) -> Result<(), ClientError> {
        self.state.request_listeners.remove(event);
        self.send(WireMessage::RemoveRequestListener(ListenerSpec::new(event, scope)))
            .await
    }

    /// Flush queued messages and close the connection.
    pub async fn close(mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        self.reader.abort();
        self.state.pending.remove_connection(&self.state.id);
    }

    async fn send(&self, message: WireMessage) -> Result<(), ClientError> {
        self.state
            .outbound
            .send(message)
            .await
            .map_err(|_| ClientError::Closed)
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

fn with_scope(scope: Value, args: Vec<Value>) -> Vec<Value> {
    std::iter::once(scope).chain(args).collect()
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<WireMessage>,
    mut close: oneshot::Receiver<()>,
) {
    loop {
        let message = tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = &mut close => {
                // Drain what was queued before close.
                while let Ok(message) = outbound.try_recv() {
                    if write_message(&mut writer, &message).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };
        if write_message(&mut writer, &message).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_message(writer: &mut OwnedWriteHalf, message: &WireMessage) -> Result<(), ClientError> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await.map_err(|e| {
        debug!(error = %e, "IPC write failed");
        ClientError::Closed
    })
}

async fn read_loop(reader: OwnedReadHalf, state: Arc<ClientState>) {
    let mut frames = FramedRead::new(reader, FrameCodec::new(MAX_FRAME));
    while let Some(frame) = frames.next().await {
        let message = match frame {
            Ok(Ok(data)) => WireMessage::parse(data),
            Ok(Err(e)) => {
                warn!(error = %e, "Ignoring invalid frame");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "IPC read failed");
                break;
            }
        };
        match message {
            Ok(message) => dispatch(&state, message),
            Err(e) => warn!(error = %e, "Ignoring invalid message"),
        }
    }

    debug!(connection_id = %state.id, "IPC bridge connection closed");
    state.pending.remove_connection(&state.id);
}

fn dispatch(state: &Arc<ClientState>, message: WireMessage) {
    match message {
        WireMessage::Event { event, params } => {
            let Some(listener) = state.event_listeners.get(&event).map(|l| l.clone()) else {
                return;
            };
            if listener.try_send(params).is_err() {
                warn!(event = %event, "Event listener not keeping up, dropping event");
            }
        }
        WireMessage::Request {
            event,
            request_id,
            params,
        } => {
            let Some(handler) = state.request_listeners.get(&event).map(|h| h.clone()) else {
                debug!(event = %event, "No handler for forwarded request");
                return;
            };
            let outbound = state.outbound.clone();
            tokio::spawn(async move {
                let response = respond(event, request_id, handler(params).await);
                if outbound.send(response).await.is_err() {
                    debug!("Connection closed before response was sent");
                }
            });
        }
        WireMessage::Response(response) => {
            let event = response.event.clone();
            let response_id = response.response_id.clone();
            state
                .pending
                .complete(&event, &response_id, response.into_outcome());
        }
        other => {
            debug!(message_type = %other.message_type(), "Ignoring message");
        }
    }
}

/// Build the reply to a forwarded request: the value goes in `params[0]`.
fn respond(event: String, request_id: RequestId, outcome: Result<Value, Value>) -> WireMessage {
    let (err, params) = match outcome {
        Ok(value) => (None, vec![value]),
        Err(err) => (Some(err), Vec::new()),
    };
    WireMessage::Response(ResponseMessage {
        event,
        response_id: request_id,
        err,
        result: None,
        params: Some(params),
    })
}
