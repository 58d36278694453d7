//! Configuration types for the relay daemon and channel adapters.
//!
//! Every struct uses `#[serde(default)]` so a partial TOML file fills the
//! rest from defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transport size ceiling, in characters.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 40_000;

/// Root configuration (`~/.agentrelay/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentRelayConfig {
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Relay hub endpoint settings.
    pub relay: RelayConfig,
    /// Channel adapters this process drives.
    pub adapters: Vec<AdapterConfig>,
}

impl Default for AgentRelayConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            relay: RelayConfig::default(),
            adapters: Vec::new(),
        }
    }
}

/// Relay hub endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the hub listens on.
    pub listen_addr: String,
    /// SHA-256 hex digest of the access token clients must present.
    /// `None` leaves the endpoint open.
    pub access_token_hash: Option<String>,
    /// Per-connection outbound queue depth. Events for a connection whose
    /// queue is full are dropped.
    pub outbound_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4850".to_string(),
            access_token_hash: None,
            outbound_buffer: 256,
        }
    }
}

/// Which transport an adapter drives. Selected by the `kind` tag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// In-process loopback.
    #[default]
    Memory,
    /// Raw text frames over a WebSocket.
    #[serde(rename = "websocket")]
    WebSocket { url: String },
    /// A relay hub reached over WebSocket.
    Relay {
        url: String,
        agent_id: String,
        #[serde(default = "default_role")]
        role: String,
    },
}

fn default_role() -> String {
    "agent".to_string()
}

impl TransportConfig {
    /// Config tag of this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Memory => "memory",
            TransportConfig::WebSocket { .. } => "websocket",
            TransportConfig::Relay { .. } => "relay",
        }
    }
}

/// Settings for one channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Human-readable adapter name, used in logs.
    pub name: String,
    /// Bearer token presented to the transport.
    pub token: String,
    /// Prefix the token must carry, if any.
    pub token_prefix: Option<String>,
    /// Transport variant.
    pub transport: TransportConfig,
    /// Move to `Reconnecting` (instead of `Disconnected`) when a live
    /// transport drops.
    pub auto_reconnect: bool,
    /// Reconnect attempts before giving up with `Failed`.
    pub max_reconnect_attempts: u32,
    /// Extra attempts `connect()` makes after a failed first try.
    pub connect_retries: u32,
    /// First backoff delay, doubled after each failure.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
    /// Bound on connect and ping.
    pub connect_timeout_secs: u64,
    /// Bound on a single send.
    pub send_timeout_secs: u64,
    /// Largest payload `send()` accepts, in characters.
    pub max_message_chars: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            token: String::new(),
            token_prefix: None,
            transport: TransportConfig::default(),
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            connect_retries: 2,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            connect_timeout_secs: 10,
            send_timeout_secs: 10,
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
        }
    }
}

impl AdapterConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}
