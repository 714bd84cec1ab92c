//! Bridge configuration with validation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Socket endpoint configuration
    pub endpoint: EndpointConfig,
    /// Liveness heartbeat configuration
    pub heartbeat: HeartbeatConfig,
    /// Forwarded request correlation
    pub correlator: CorrelatorConfig,
}

impl BridgeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_plain_file_name(&self.endpoint.socket_prefix) {
            return Err(ConfigError::Invalid(
                "socket_prefix must be a plain file name".into(),
            ));
        }

        if self.endpoint.bootstrap_event.is_empty() {
            return Err(ConfigError::MissingEvent("bootstrap_event"));
        }

        if self.endpoint.max_message_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_message_size cannot be 0".into(),
            ));
        }

        if self.endpoint.outbound_buffer == 0 {
            return Err(ConfigError::InvalidLimit(
                "outbound_buffer cannot be 0".into(),
            ));
        }

        if self.heartbeat.enabled {
            if self.heartbeat.interval.is_zero() {
                return Err(ConfigError::InvalidTimeout(
                    "heartbeat interval cannot be 0".into(),
                ));
            }
            if self.heartbeat.event.is_empty() {
                return Err(ConfigError::MissingEvent("heartbeat.event"));
            }
        }

        if matches!(self.correlator.request_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::InvalidTimeout(
                "request_timeout cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Socket path for a host identified by `system_id`.
    ///
    /// The id must name a file directly inside `socket_root`.
    pub fn socket_path(&self, system_id: &str) -> Result<PathBuf, ConfigError> {
        if !is_plain_file_name(system_id) {
            return Err(ConfigError::InvalidSystemId(system_id.to_string()));
        }
        Ok(self
            .endpoint
            .socket_root
            .join(format!("{}{}", self.endpoint.socket_prefix, system_id)))
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

/// Socket endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Directory the socket is created in
    pub socket_root: PathBuf,
    /// File name prefix, followed by the host system id
    pub socket_prefix: String,
    /// Bus request answering with the host system id
    pub bootstrap_event: String,
    /// Event announcing that a client attached
    pub client_connected_event: String,
    /// Max frame size in bytes
    pub max_message_size: usize,
    /// Per-connection outbound queue depth
    pub outbound_buffer: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            socket_root: PathBuf::from("/tmp/"),
            socket_prefix: "bits.".to_string(),
            bootstrap_event: "base#System bitsId".to_string(),
            client_connected_event: "bits-ipc#Client connected".to_string(),
            max_message_size: 8 * 1024 * 1024, // 8MB
            outbound_buffer: 1024,
        }
    }
}

/// Heartbeat configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Enable the heartbeat
    pub enabled: bool,
    /// Time between beats
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Event published on every beat
    pub event: String,
    /// Request issued on every beat
    pub ping_request: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(1),
            event: "bits-ipc#heartbeat".to_string(),
            ping_request: "bits-ipc#ping".to_string(),
        }
    }
}

/// Correlator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// How long a forwarded request may stay unanswered (None = forever)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required event name is empty
    #[error("event name '{0}' cannot be empty")]
    MissingEvent(&'static str),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Host id that cannot name a socket file
    #[error("system id {0:?} cannot be used as a socket name")]
    InvalidSystemId(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
