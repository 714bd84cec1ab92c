//! Pending Request Store - correlates forwarded requests with client responses.
//!
//! Each entry is keyed by `(event, requestId)` and settled exactly once, by
//! whichever terminal condition fires first:
//!
//! - a matching `response` ([`PendingRequestStore::complete`])
//! - the owning connection closing ([`PendingRequestStore::remove_connection`])
//! - the waiter's timeout elapsing ([`PendingWaiter::wait`])
//! - the waiter being dropped, e.g. the bus-side future was abandoned

use crate::domain::correlation::ConnectionId;
use crate::domain::message::RequestId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use shared_bus::{BusError, BusResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Lookup key for a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub event: String,
    pub request_id: RequestId,
}

impl PendingKey {
    pub fn new(event: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            event: event.into(),
            request_id,
        }
    }
}

/// A request waiting for its response
struct PendingRequest {
    /// Channel to send the outcome
    sender: oneshot::Sender<BusResult<Value>>,
    /// When request was created
    created_at: Instant,
    /// Connection expected to answer
    connection_id: ConnectionId,
}

/// Statistics for pending request store
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests completed with a value
    pub total_completed: AtomicU64,
    /// Total requests rejected (error response or connection closed)
    pub total_failed: AtomicU64,
    /// Total requests timed out
    pub total_timeouts: AtomicU64,
    /// Total requests cancelled (waiter dropped)
    pub total_cancelled: AtomicU64,
}

/// Concurrent store of requests forwarded to clients.
///
/// Flow:
/// 1. A forwarding listener calls `register()` and gets an id and a waiter
/// 2. The listener pushes a `request` carrying that id to the client
/// 3. The router receives the client's `response` and calls `complete()`
/// 4. The listener awaits the waiter and settles the bus call
pub struct PendingRequestStore {
    /// Map of (event, requestId) to pending request
    pending: DashMap<PendingKey, PendingRequest>,
    /// Timeout applied when a registration does not name one
    default_timeout: Option<Duration>,
    /// Statistics
    stats: PendingStats,
}

impl PendingRequestStore {
    /// Create a new pending request store
    pub fn new(default_timeout: Option<Duration>) -> Self {
        Self {
            pending: DashMap::new(),
            default_timeout,
            stats: PendingStats::default(),
        }
    }

    /// Register a pending request.
    ///
    /// `preferred` is used as the request id unless that key is already
    /// pending, in which case a fresh id is allocated.
    pub fn register(
        self: &Arc<Self>,
        event: &str,
        preferred: Option<RequestId>,
        connection_id: ConnectionId,
        timeout: Option<Duration>,
    ) -> (RequestId, PendingWaiter) {
        let (tx, rx) = oneshot::channel();
        let mut request_id = preferred.unwrap_or_else(RequestId::fresh);

        let key = loop {
            match self.pending.entry(PendingKey::new(event, request_id.clone())) {
                Entry::Occupied(_) => {
                    debug!(event = event, request_id = %request_id, "Request id in use, allocating a fresh one");
                    request_id = RequestId::fresh();
                }
                Entry::Vacant(slot) => {
                    let key = slot.key().clone();
                    slot.insert(PendingRequest {
                        sender: tx,
                        created_at: Instant::now(),
                        connection_id,
                    });
                    break key;
                }
            }
        };

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(
            event = event,
            request_id = %request_id,
            connection_id = %connection_id,
            "Registered pending request"
        );

        let waiter = PendingWaiter {
            key,
            receiver: rx,
            store: Arc::clone(self),
            timeout: timeout.or(self.default_timeout),
            settled: false,
        };
        (request_id, waiter)
    }

    /// Settle a pending request with an outcome.
    ///
    /// Returns true if the request was found and its waiter received the outcome.
    pub fn complete(&self, event: &str, request_id: &RequestId, outcome: BusResult<Value>) -> bool {
        let key = PendingKey::new(event, request_id.clone());
        let Some((_, pending)) = self.pending.remove(&key) else {
            warn!(
                event = event,
                request_id = %request_id,
                "Response for unknown or expired request"
            );
            return false;
        };

        let response_time = pending.created_at.elapsed();
        let failed = outcome.is_err();
        match pending.sender.send(outcome) {
            Ok(()) => {
                let counter = if failed {
                    &self.stats.total_failed
                } else {
                    &self.stats.total_completed
                };
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(
                    event = event,
                    request_id = %request_id,
                    response_time_ms = response_time.as_millis() as u64,
                    failed = failed,
                    "Completed pending request"
                );
                true
            }
            Err(_) => {
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(event = event, request_id = %request_id, "Pending request waiter dropped");
                false
            }
        }
    }

    /// Drop a pending request without answering it.
    pub fn cancel(&self, event: &str, request_id: &RequestId) -> bool {
        self.cancel_key(&PendingKey::new(event, request_id.clone()))
    }

    fn cancel_key(&self, key: &PendingKey) -> bool {
        if self.pending.remove(key).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn expire(&self, key: &PendingKey) -> bool {
        if let Some((_, pending)) = self.pending.remove(key) {
            warn!(
                event = %key.event,
                request_id = %key.request_id,
                elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                "Pending request timed out"
            );
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Reject every request owned by a connection.
    ///
    /// Returns the number of requests rejected.
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> usize {
        let keys: Vec<PendingKey> = self
            .pending
            .iter()
            .filter(|entry| entry.value().connection_id == *connection_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in keys {
            if let Some((_, pending)) = self.pending.remove(&key) {
                // A waiter that is already gone has nothing left to reject.
                let _ = pending.sender.send(Err(BusError::ConnectionClosed));
                self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(
                connection_id = %connection_id,
                removed = removed,
                "Rejected pending requests for closed connection"
            );
        }
        removed
    }

    /// Get number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a request is pending
    pub fn is_pending(&self, event: &str, request_id: &RequestId) -> bool {
        self.pending
            .contains_key(&PendingKey::new(event, request_id.clone()))
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

/// Receiving side of a registered request.
///
/// Dropping it before it settles cancels the registration.
pub struct PendingWaiter {
    key: PendingKey,
    receiver: oneshot::Receiver<BusResult<Value>>,
    store: Arc<PendingRequestStore>,
    timeout: Option<Duration>,
    settled: bool,
}

impl PendingWaiter {
    pub fn request_id(&self) -> &RequestId {
        &self.key.request_id
    }

    /// Wait for the outcome.
    pub async fn wait(mut self) -> BusResult<Value> {
        let outcome = match self.timeout {
            None => (&mut self.receiver).await.unwrap_or(Err(BusError::Cancelled)),
            Some(limit) => match tokio::time::timeout(limit, &mut self.receiver).await {
                Ok(received) => received.unwrap_or(Err(BusError::Cancelled)),
                Err(_) => {
                    let timed_out = Err(BusError::Timeout(limit.as_millis() as u64));
                    if self.store.expire(&self.key) {
                        timed_out
                    } else {
                        // Settled concurrently with the deadline.
                        self.receiver.try_recv().unwrap_or(timed_out)
                    }
                }
            },
        };
        self.settled = true;
        outcome
    }
}

impl Drop for PendingWaiter {
    fn drop(&mut self) {
        if !self.settled && self.store.cancel_key(&self.key) {
            debug!(
                event = %self.key.event,
                request_id = %self.key.request_id,
                "Pending request abandoned"
            );
        }
    }
}
