//! # IPC Bridge Runtime
//!
//! Runs the IPC bridge inside a minimal host: an in-memory message bus that
//! answers the host id request.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`RUST_LOG`, default `info`)
//! 2. Load configuration (file, then environment)
//! 3. Create the bus and register the host id handler
//! 4. Start the bridge service
//! 5. Wait for Ctrl+C, then stop the service

use std::sync::Arc;

use anyhow::{Context, Result};
use bridge_runtime::{load_config, register_system_id};
use ipc_bridge::{BridgeModule, BridgeService};
use shared_bus::{InMemoryMessageBus, MessageBus};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("===========================================");
    info!("  IPC Bridge Runtime v{}", ipc_bridge::VERSION);
    info!("===========================================");

    let config = load_config()?;
    info!(system_id = %config.system_id, "Host id");

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryMessageBus::new());
    let bootstrap_event = config.bridge.endpoint.bootstrap_event.clone();
    let id_listener = register_system_id(&bus, &bootstrap_event, &config.system_id);

    let mut service = BridgeService::new(config.bridge).context("Failed to create bridge")?;
    service
        .start(Arc::clone(&bus))
        .await
        .context("Failed to start bridge")?;

    if let Some(path) = service.socket_path() {
        info!("Socket: {}", path.display());
    }
    info!("Bridge is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    service.stop().await;
    bus.remove_request_listener(&bootstrap_event, id_listener);
    info!("Shutdown complete");

    Ok(())
}
