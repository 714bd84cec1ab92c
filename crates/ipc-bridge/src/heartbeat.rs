//! Periodic liveness heartbeat.
//!
//! Every tick publishes the heartbeat event and issues the ping request, both
//! with `[{"scopes": null}, now_ms]`. Failures are logged and the next tick
//! proceeds as normal.

use crate::domain::config::HeartbeatConfig;
use crate::ports::outbound::TimeSource;
use serde_json::{json, Value};
use shared_bus::{BusError, MessageBus};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct Heartbeat {
    bus: Arc<dyn MessageBus>,
    config: HeartbeatConfig,
    clock: Arc<dyn TimeSource>,
}

impl Heartbeat {
    pub fn new(bus: Arc<dyn MessageBus>, config: HeartbeatConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self { bus, config, clock }
    }

    /// Beat until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.config.interval.as_millis() as u64, "Heartbeat started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.beat().await,
                _ = shutdown.changed() => break,
            }
        }

        info!("Heartbeat stopped");
    }

    async fn beat(&self) {
        let params = self.params();

        if let Err(e) = self.bus.publish(&self.config.event, params.clone()).await {
            warn!(event = %self.config.event, error = %e, "Heartbeat publish failed");
        }

        // The ping must not hold up the next tick.
        let bus = Arc::clone(&self.bus);
        let ping = self.config.ping_request.clone();
        tokio::spawn(async move {
            match bus.request(&ping, params).await {
                Ok(_) => {}
                Err(BusError::NoHandler(_)) => debug!(request = %ping, "Nobody answered ping"),
                Err(e) => warn!(request = %ping, error = %e, "Ping failed"),
            }
        });
    }

    fn params(&self) -> Vec<Value> {
        vec![json!({ "scopes": null }), json!(self.clock.now_ms())]
    }
}
