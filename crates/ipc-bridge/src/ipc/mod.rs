//! Message routing between client connections and the host bus.
//!
//! - `connection` - non-owning connection handle with a bounded outbound queue
//! - `registry` - bus listeners installed on behalf of connections
//! - `router` - classification and dispatch of inbound wire messages

pub mod connection;
pub mod registry;
pub mod router;

pub use connection::{ConnectionHandle, PushError};
pub use registry::{ForwardingListener, ListenerKey, ListenerKind, ListenerRegistry, RegistryError};
pub use router::BridgeRouter;
