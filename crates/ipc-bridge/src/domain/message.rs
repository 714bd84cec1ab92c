//! Wire messages exchanged with IPC clients.
//!
//! Every message carries a `type` discriminator drawn from a fixed set.
//! Inbound JSON is classified in two steps so that an unknown `type` can be
//! told apart from a known `type` with a broken body:
//!
//! ```text
//! raw JSON ──► type known? ──no──► UnknownType (dropped)
//!                  │
//!                 yes
//!                  ▼
//!           fields valid? ──no──► Malformed (dropped)
//!                  │
//!                 yes
//!                  ▼
//!             WireMessage
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_bus::{BusError, BusResult, Scope};
use std::fmt;
use thiserror::Error;

use crate::domain::correlation::CorrelationId;

/// Every `type` a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Event,
    Request,
    Response,
    AddEventListener,
    RemoveEventListener,
    AddRequestListener,
    RemoveRequestListener,
    AddResponseListener,
    RemoveResponseListener,
    AddEventSubscriberListener,
    RemoveEventSubscriberListener,
}

impl MessageType {
    pub const ALL: [MessageType; 11] = [
        MessageType::Event,
        MessageType::Request,
        MessageType::Response,
        MessageType::AddEventListener,
        MessageType::RemoveEventListener,
        MessageType::AddRequestListener,
        MessageType::RemoveRequestListener,
        MessageType::AddResponseListener,
        MessageType::RemoveResponseListener,
        MessageType::AddEventSubscriberListener,
        MessageType::RemoveEventSubscriberListener,
    ];

    /// Wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Event => "event",
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::AddEventListener => "addEventListener",
            MessageType::RemoveEventListener => "removeEventListener",
            MessageType::AddRequestListener => "addRequestListener",
            MessageType::RemoveRequestListener => "removeRequestListener",
            MessageType::AddResponseListener => "addResponseListener",
            MessageType::RemoveResponseListener => "removeResponseListener",
            MessageType::AddEventSubscriberListener => "addEventSubscriberListener",
            MessageType::RemoveEventSubscriberListener => "removeEventSubscriberListener",
        }
    }

    /// Look up a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request correlation id as it appears on the wire.
///
/// Clients use either strings or unsigned counters; the representation is
/// echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    Text(String),
}

impl RequestId {
    /// A new time-ordered id that has never been handed out before.
    pub fn fresh() -> Self {
        RequestId::Text(CorrelationId::new().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::Text(s) => f.write_str(s),
        }
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId::Text(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::Text(value.to_string())
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        RequestId::Number(value)
    }
}

/// Body shared by all listener management messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerSpec {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
}

impl ListenerSpec {
    pub fn new(event: impl Into<String>, scope: Value) -> Self {
        Self {
            event: event.into(),
            scope: None,
            params: vec![scope],
        }
    }

    /// The scope to install with: the explicit `scope` field, else `params[0]`.
    pub fn scope(&self) -> Scope {
        self.scope
            .clone()
            .or_else(|| self.params.first().cloned())
            .map(Scope::from)
            .unwrap_or_default()
    }
}

/// Answer to a `request`, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub event: String,
    #[serde(rename = "responseId")]
    pub response_id: RequestId,
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,
}

impl ResponseMessage {
    /// A successful response carrying `result`.
    pub fn success(event: impl Into<String>, response_id: RequestId, result: Value) -> Self {
        Self {
            event: event.into(),
            response_id,
            err: None,
            result: Some(result),
            params: None,
        }
    }

    /// The answered value: `result` when present, otherwise `params`.
    pub fn payload(&self) -> Value {
        match (&self.result, &self.params) {
            (Some(result), _) => result.clone(),
            (None, Some(params)) => Value::Array(params.clone()),
            (None, None) => Value::Null,
        }
    }

    /// Settle a bus call from this response. A truthy `err` rejects it.
    pub fn into_outcome(self) -> BusResult<Value> {
        match self.err {
            Some(err) if is_truthy(&err) => Err(BusError::Remote(err)),
            _ => Ok(self.payload()),
        }
    }
}

/// A message on the IPC socket, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "event")]
    Event {
        event: String,
        #[serde(default)]
        params: Vec<Value>,
    },
    #[serde(rename = "request")]
    Request {
        event: String,
        #[serde(rename = "requestId")]
        request_id: RequestId,
        #[serde(default)]
        params: Vec<Value>,
    },
    #[serde(rename = "response")]
    Response(ResponseMessage),
    #[serde(rename = "addEventListener")]
    AddEventListener(ListenerSpec),
    #[serde(rename = "removeEventListener")]
    RemoveEventListener(ListenerSpec),
    #[serde(rename = "addRequestListener")]
    AddRequestListener(ListenerSpec),
    #[serde(rename = "removeRequestListener")]
    RemoveRequestListener(ListenerSpec),
    #[serde(rename = "addResponseListener")]
    AddResponseListener(ListenerSpec),
    #[serde(rename = "removeResponseListener")]
    RemoveResponseListener(ListenerSpec),
    #[serde(rename = "addEventSubscriberListener")]
    AddEventSubscriberListener(ListenerSpec),
    #[serde(rename = "removeEventSubscriberListener")]
    RemoveEventSubscriberListener(ListenerSpec),
}

/// Why an inbound value could not be turned into a [`WireMessage`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl WireMessage {
    /// Classify a decoded JSON value.
    pub fn parse(raw: Value) -> Result<Self, MessageError> {
        let kind = raw
            .as_object()
            .ok_or_else(|| MessageError::Malformed("not a JSON object".into()))?
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::Malformed("missing 'type'".into()))?;

        if MessageType::parse(kind).is_none() {
            return Err(MessageError::UnknownType(kind.to_string()));
        }

        serde_json::from_value(raw).map_err(|e| MessageError::Malformed(e.to_string()))
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            WireMessage::Event { .. } => MessageType::Event,
            WireMessage::Request { .. } => MessageType::Request,
            WireMessage::Response(_) => MessageType::Response,
            WireMessage::AddEventListener(_) => MessageType::AddEventListener,
            WireMessage::RemoveEventListener(_) => MessageType::RemoveEventListener,
            WireMessage::AddRequestListener(_) => MessageType::AddRequestListener,
            WireMessage::RemoveRequestListener(_) => MessageType::RemoveRequestListener,
            WireMessage::AddResponseListener(_) => MessageType::AddResponseListener,
            WireMessage::RemoveResponseListener(_) => MessageType::RemoveResponseListener,
            WireMessage::AddEventSubscriberListener(_) => MessageType::AddEventSubscriberListener,
            WireMessage::RemoveEventSubscriberListener(_) => {
                MessageType::RemoveEventSubscriberListener
            }
        }
    }

    /// Event name the message refers to.
    pub fn event(&self) -> &str {
        match self {
            WireMessage::Event { event, .. } | WireMessage::Request { event, .. } => event,
            WireMessage::Response(response) => &response.event,
            WireMessage::AddEventListener(spec)
            | WireMessage::RemoveEventListener(spec)
            | WireMessage::AddRequestListener(spec)
            | WireMessage::RemoveRequestListener(spec)
            | WireMessage::AddResponseListener(spec)
            | WireMessage::RemoveResponseListener(spec)
            | WireMessage::AddEventSubscriberListener(spec)
            | WireMessage::RemoveEventSubscriberListener(spec) => &spec.event,
        }
    }
}

/// Truthiness of a JSON value as the host runtime judges an `err` field.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
