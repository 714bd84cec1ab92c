//! Bridge and client error types.

use crate::domain::config::ConfigError;
use crate::transport::codec::FrameError;
use serde_json::Value;
use shared_bus::BusError;

/// Errors raised while running the bridge service
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Socket bind error
    #[error("socket bind error: {0}")]
    Bind(String),

    /// The host id request failed
    #[error("bootstrap request failed: {0}")]
    Bootstrap(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `start` called on a running service
    #[error("bridge already running")]
    AlreadyRunning,
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced by [`IpcClient`](crate::client::IpcClient)
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not reach the bridge socket
    #[error("failed to connect: {0}")]
    Connect(std::io::Error),

    /// Frame could not be encoded
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The connection is gone
    #[error("connection closed")]
    Closed,

    /// No response arrived in time
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The responder answered with an error value
    #[error("remote error: {0}")]
    Remote(Value),

    /// A listener for this event is already installed
    #[error("already listening on '{0}'")]
    AlreadyListening(String),
}

impl From<BusError> for ClientError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Remote(value) => ClientError::Remote(value),
            BusError::Timeout(ms) => ClientError::Timeout(ms),
            _ => ClientError::Closed,
        }
    }
}
