//! Non-owning handle to a client connection.
//!
//! The transport owns the socket; everything else holds a [`ConnectionHandle`]
//! to check liveness and queue outbound messages without blocking.

use crate::domain::correlation::{ConnectionId, CorrelationId};
use crate::domain::message::WireMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a push was not queued.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    #[error("connection closed")]
    Closed,
    #[error("outbound queue full")]
    Full,
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<WireMessage>,
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<WireMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = Self {
            id: CorrelationId::new(),
            outbound: tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// True until the transport marks the connection closed or drops its queue.
    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Queue a message without waiting.
    pub fn push(&self, message: WireMessage) -> Result<(), PushError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PushError::Closed);
        }
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }
}
