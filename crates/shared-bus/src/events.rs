//! # Bus Events
//!
//! Value types that flow across the message bus: published events, request
//! metadata, scopes and the handler signatures listeners are registered with.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Opaque authorization/visibility tag attached to a listener.
///
/// The bus stores it alongside the listener; nothing in this crate interprets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(pub Value);

impl Scope {
    /// The "no scope" tag (`null`).
    #[must_use]
    pub fn none() -> Self {
        Self(Value::Null)
    }

    /// Borrow the raw tag.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for Scope {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Identifier returned when a listener is installed on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Metadata handed to a request listener alongside the request params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    /// Unique id of this request for the lifetime of the bus.
    pub request_id: String,
}

/// A single publish, as observed by bus taps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Event name, e.g. `bits-ipc#heartbeat`.
    pub event: String,
    /// Positional arguments.
    pub params: Vec<Value>,
}

impl BusEvent {
    pub fn new(event: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            params,
        }
    }
}

/// Errors surfaced by bus operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    /// No request listener is installed for the event.
    #[error("no request handler for '{0}'")]
    NoHandler(String),

    /// The party serving the request answered with an error value.
    #[error("remote error: {0}")]
    Remote(Value),

    /// The party serving the request went away before answering.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// The request was not answered in time.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The request was abandoned without an answer.
    #[error("request cancelled")]
    Cancelled,

    /// The bus is shutting down.
    #[error("bus closed")]
    Closed,
}

/// Result type for bus requests.
pub type BusResult<T> = Result<T, BusError>;

/// Callback invoked once per emission of an event.
pub type EventHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Callback invoked once per request; the returned future settles the request.
pub type RequestHandler =
    Arc<dyn Fn(RequestMetadata, Vec<Value>) -> BoxFuture<'static, BusResult<Value>> + Send + Sync>;

/// Wrap a closure as an [`EventHandler`].
pub fn event_handler<F>(f: F) -> EventHandler
where
    F: Fn(Vec<Value>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap an async closure as a [`RequestHandler`].
pub fn request_handler<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(RequestMetadata, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BusResult<Value>> + Send + 'static,
{
    Arc::new(move |metadata, params| Box::pin(f(metadata, params)))
}

/// Filter for bus taps.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Event names to include. Empty means all events.
    pub events: Vec<String>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific event names.
    #[must_use]
    pub fn events<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            events: events.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &BusEvent) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == &event.event)
    }
}
