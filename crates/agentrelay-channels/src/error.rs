//! Channel adapter and transport error types.

use crate::types::ChannelConnectionState;
use agentrelay_types::error::AgentRelayError;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a concrete transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),
    #[error("Transport closed")]
    Closed,
    /// A live connection dropped.
    #[error("Connection lost: {0}")]
    Lost(String),
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors surfaced by a [`ChannelAdapter`](crate::adapter::ChannelAdapter).
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Bad adapter configuration (e.g. a malformed token). Raised before any
    /// network activity.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Not connected (state: {state})")]
    NotConnected { state: ChannelConnectionState },

    #[error("Adapter is {state}, cannot {operation}")]
    InvalidState {
        state: ChannelConnectionState,
        operation: &'static str,
    },

    /// Payload exceeds the transport ceiling. Never truncated.
    #[error("Message too large: {len} chars (max {max})")]
    MessageTooLarge { len: usize, max: usize },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ChannelError> for AgentRelayError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Configuration(msg) => AgentRelayError::Configuration(msg),
            ChannelError::Serialization(e) => AgentRelayError::Serialization(e),
            other => AgentRelayError::Transport(other.to_string()),
        }
    }
}
