//! # Bus Taps
//!
//! Read-only observation of everything published on an [`InMemoryMessageBus`].
//! Tests use a tap to assert what reached the bus without installing a
//! listener of their own.
//!
//! [`InMemoryMessageBus`]: crate::InMemoryMessageBus

use crate::events::{BusEvent, EventFilter};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

/// Published events passing a filter.
pub struct Subscription {
    receiver: broadcast::Receiver<BusEvent>,
    filter: EventFilter,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<BusEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Next published event passing the filter, or `None` once the bus is gone.
    ///
    /// A tap that falls more than the bus capacity behind skips the oldest
    /// events and resumes with the earliest one still buffered.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Bus tap fell behind"),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
