//! # Bridge Runtime Library
//!
//! Configuration loading and host-side bus wiring for the `bridge-runtime`
//! binary, exposed here so they can be tested.
//!
//! ## Configuration Sources
//!
//! Later sources win:
//!
//! 1. Built-in defaults
//! 2. JSON file named by `IPC_BRIDGE_CONFIG`
//! 3. `IPC_BRIDGE_SOCKET_ROOT`, `IPC_BRIDGE_SYSTEM_ID`,
//!    `IPC_BRIDGE_HEARTBEAT_MS`, `IPC_BRIDGE_REQUEST_TIMEOUT_MS`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ipc_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_bus::{request_handler, ListenerId, MessageBus, Scope};
use tracing::{info, warn};

/// Environment variable naming the JSON config file.
pub const CONFIG_FILE_ENV: &str = "IPC_BRIDGE_CONFIG";

/// Runtime configuration: the bridge itself plus what the host provides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Id the host reports for itself. Names the socket.
    pub system_id: String,
    pub bridge: BridgeConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            system_id: uuid::Uuid::new_v4().simple().to_string(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Read a JSON config file. Missing sections keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("IPC_BRIDGE_SOCKET_ROOT") {
            self.bridge.endpoint.socket_root = PathBuf::from(root);
        }
        if let Some(id) = lookup("IPC_BRIDGE_SYSTEM_ID") {
            self.system_id = id;
        }
        if let Some(ms) = parse_millis(&lookup, "IPC_BRIDGE_HEARTBEAT_MS") {
            // Zero turns the heartbeat off.
            self.bridge.heartbeat.enabled = !ms.is_zero();
            if !ms.is_zero() {
                self.bridge.heartbeat.interval = ms;
            }
        }
        if let Some(ms) = parse_millis(&lookup, "IPC_BRIDGE_REQUEST_TIMEOUT_MS") {
            self.bridge.correlator.request_timeout = (!ms.is_zero()).then_some(ms);
        }
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<Duration> {
    let raw = lookup(name)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring non-numeric override");
            None
        }
    }
}

/// Load configuration from the optional file and the process environment.
pub fn load_config() -> Result<RuntimeConfig> {
    let mut config = match std::env::var(CONFIG_FILE_ENV) {
        Ok(path) => {
            info!(path = %path, "Loading config file");
            RuntimeConfig::from_file(Path::new(&path))?
        }
        Err(_) => RuntimeConfig::default(),
    };
    config.apply_overrides(|name| std::env::var(name).ok());
    config
        .bridge
        .validate()
        .context("Invalid bridge configuration")?;
    config
        .bridge
        .socket_path(&config.system_id)
        .context("Invalid system id")?;
    Ok(config)
}

/// Answer the bridge's host id request with `system_id`.
pub fn register_system_id(bus: &Arc<dyn MessageBus>, event: &str, system_id: &str) -> ListenerId {
    let id = json!(system_id);
    bus.add_request_listener(
        event,
        Scope::none(),
        request_handler(move |_meta, _params| {
            let id = id.clone();
            async move { Ok(id) }
        }),
    )
}
