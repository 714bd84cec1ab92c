//! Ports (hexagonal architecture) for the IPC bridge.

pub mod outbound;

pub use outbound::{SystemTimeSource, TimeSource};
