//! # Shared Bus - Host Message Fabric
//!
//! The publish/request contract the IPC bridge consumes, plus an in-memory
//! implementation used by the runtime binary and by tests.
//!
//! ## Contract
//!
//! - `publish(event, params)`: fire an event at every listener of that name
//! - `request(event, params)`: ask the serving listener and await its result
//! - `add_*_listener(event, scope, handler)` / `remove_*_listener(event, id)`
//!
//! ```text
//! ┌──────────────┐   publish()/request()   ┌──────────────┐
//! │   Producer   │ ──────────┐             │   Listener   │
//! └──────────────┘           │             └──────────────┘
//!                            ▼                     ↑
//!                     ┌──────────────┐             │
//!                     │ Message Bus  │ ────────────┘
//!                     └──────────────┘  handler(params)
//! ```
//!
//! Scopes are opaque tags stored with each listener. This crate never
//! evaluates them.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{
    event_handler, request_handler, BusError, BusEvent, BusResult, EventFilter, EventHandler,
    ListenerId, RequestHandler, RequestMetadata, Scope,
};
pub use publisher::{InMemoryMessageBus, MessageBus};
pub use subscriber::Subscription;

/// Maximum events to buffer per tap before it lags.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
