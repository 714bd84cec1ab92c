// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! IPC Bridge - connects out-of-process clients to the host message bus.
//!
//! Clients attach to a local Unix socket and exchange form-feed delimited
//! JSON frames. The bridge turns those frames into bus publishes and
//! requests, and installs bus listeners on the clients' behalf so that bus
//! events and requests can reach them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           IPC BRIDGE                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────┐   ┌──────────────────────────────┐ │
//! │  │  Unix Socket Listener       │   │  Heartbeat                   │ │
//! │  │  /tmp/bits.<systemId>       │   │  bits-ipc#heartbeat / #ping  │ │
//! │  └──────────────┬──────────────┘   └──────────────┬───────────────┘ │
//! │                 │ frames                          │                 │
//! │  ┌──────────────┴──────────────┐                  │                 │
//! │  │       Bridge Router         │                  │                 │
//! │  │  classify → dispatch        │                  │                 │
//! │  └──────┬───────────────┬──────┘                  │                 │
//! │         │               │                         │                 │
//! │  ┌──────┴──────┐ ┌──────┴──────────┐              │                 │
//! │  │  Listener   │ │ Pending Request │              │                 │
//! │  │  Registry   │ │ Store (oneshot) │              │                 │
//! │  └──────┬──────┘ └─────────────────┘              │                 │
//! └─────────┼─────────────────────────────────────────┼─────────────────┘
//!           │                                         │
//!           └──────────────── Message Bus ────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ipc_bridge::{BridgeConfig, BridgeModule, BridgeService};
//!
//! let mut service = BridgeService::new(BridgeConfig::default())?;
//! service.start(bus).await?;
//! // ...
//! service.stop().await;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod domain;
pub mod heartbeat;
pub mod ipc;
pub mod ports;
pub mod service;
pub mod transport;

// Re-exports for public API
pub use client::{client_request_handler, ClientRequestHandler, IpcClient};
pub use domain::config::BridgeConfig;
pub use domain::error::{BridgeError, BridgeResult, ClientError};
pub use domain::message::{MessageType, RequestId, WireMessage};
pub use heartbeat::Heartbeat;
pub use ipc::{BridgeRouter, ConnectionHandle, ListenerKind, ListenerRegistry};
pub use service::{BridgeModule, BridgeService};
pub use transport::IpcServer;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
