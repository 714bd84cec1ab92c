//! IPC bridge service - lifecycle entry point.
//!
//! `start` performs, in order:
//! 1. Install the "client connected" log listener
//! 2. Ask the bus for the host system id (bootstrap request)
//! 3. Bind the socket endpoint derived from that id and start accepting
//! 4. Start the heartbeat
//!
//! A failed bootstrap request leaves the service running without an endpoint.

use crate::domain::config::BridgeConfig;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::heartbeat::Heartbeat;
use crate::ipc::router::BridgeRouter;
use crate::ports::outbound::SystemTimeSource;
use crate::transport::server::IpcServer;
use async_trait::async_trait;
use serde_json::Value;
use shared_bus::{event_handler, ListenerId, MessageBus, Scope};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A component the host starts with its bus and stops on shutdown.
#[async_trait]
pub trait BridgeModule: Send {
    async fn start(&mut self, bus: Arc<dyn MessageBus>) -> BridgeResult<()>;

    async fn stop(&mut self);
}

/// IPC bridge service state
pub struct BridgeService {
    config: BridgeConfig,
    running: Option<RunningBridge>,
}

struct RunningBridge {
    bus: Arc<dyn MessageBus>,
    router: Arc<BridgeRouter>,
    connected_listener: ListenerId,
    socket_path: Option<PathBuf>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeService {
    /// Create a new bridge service
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            running: None,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Socket path, once the endpoint is open.
    pub fn socket_path(&self) -> Option<&Path> {
        self.running
            .as_ref()
            .and_then(|r| r.socket_path.as_deref())
    }

    /// Router of the running service
    pub fn router(&self) -> Option<Arc<BridgeRouter>> {
        self.running.as_ref().map(|r| Arc::clone(&r.router))
    }

    async fn bootstrap(&self, bus: &Arc<dyn MessageBus>) -> BridgeResult<String> {
        let event = &self.config.endpoint.bootstrap_event;
        match bus.request(event, Vec::new()).await {
            Ok(Value::String(id)) if !id.is_empty() => Ok(id),
            Ok(Value::Null) => Err(BridgeError::Bootstrap(format!("'{}' returned null", event))),
            Ok(Value::String(_)) => Err(BridgeError::Bootstrap(format!(
                "'{}' returned an empty id",
                event
            ))),
            Ok(other) => Ok(other.to_string()),
            Err(e) => Err(BridgeError::Bootstrap(e.to_string())),
        }
    }
}

#[async_trait]
impl BridgeModule for BridgeService {
    async fn start(&mut self, bus: Arc<dyn MessageBus>) -> BridgeResult<()> {
        if self.running.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }
        info!("Starting IPC bridge...");

        let connected_listener = bus.add_event_listener(
            &self.config.endpoint.client_connected_event,
            Scope::none(),
            event_handler(|_params| info!("IPC client connected")),
        );

        let router = Arc::new(BridgeRouter::new(
            Arc::clone(&bus),
            self.config.correlator.request_timeout,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let endpoint = self
            .bootstrap(&bus)
            .await
            .and_then(|system_id| self.config.socket_path(&system_id).map_err(BridgeError::from));
        let socket_path = match endpoint {
            Ok(path) => {
                let server = match IpcServer::bind(&path, &self.config.endpoint) {
                    Ok(server) => server,
                    Err(e) => {
                        bus.remove_event_listener(
                            &self.config.endpoint.client_connected_event,
                            connected_listener,
                        );
                        return Err(e);
                    }
                };
                tasks.push(tokio::spawn(
                    server.run(Arc::clone(&router), shutdown_rx.clone()),
                ));
                Some(path)
            }
            Err(e) => {
                error!(error = %e, "No usable host id, IPC endpoint not started");
                None
            }
        };

        if self.config.heartbeat.enabled {
            let heartbeat = Heartbeat::new(
                Arc::clone(&bus),
                self.config.heartbeat.clone(),
                Arc::new(SystemTimeSource),
            );
            tasks.push(tokio::spawn(heartbeat.run(shutdown_rx)));
        }

        self.running = Some(RunningBridge {
            bus,
            router,
            connected_listener,
            socket_path,
            shutdown_tx,
            tasks,
        });

        info!("IPC bridge started");
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!("Stopping IPC bridge...");

        // Every task holds a receiver, so a send failure means they already exited.
        let _ = running.shutdown_tx.send(true);
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Bridge task ended abnormally");
            }
        }

        running.bus.remove_event_listener(
            &self.config.endpoint.client_connected_event,
            running.connected_listener,
        );
        info!("IPC bridge stopped");
    }
}
