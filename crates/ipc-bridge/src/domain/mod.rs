//! Domain types for the IPC bridge.
//!
//! Wire messages, correlation state, configuration and error handling.

pub mod config;
pub mod correlation;
pub mod error;
pub mod message;
pub mod pending;

// Re-exports for convenience
pub use config::{BridgeConfig, ConfigError, CorrelatorConfig, EndpointConfig, HeartbeatConfig};
pub use correlation::{ConnectionId, CorrelationId};
pub use error::{BridgeError, BridgeResult, ClientError};
pub use message::{
    is_truthy, ListenerSpec, MessageError, MessageType, RequestId, ResponseMessage, WireMessage,
};
pub use pending::{PendingKey, PendingRequestStore, PendingStats, PendingWaiter};
