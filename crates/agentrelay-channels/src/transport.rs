//! The transport capability set and the config-driven factory.
//!
//! A transport only knows how to connect, disconnect, push one opaque string
//! and probe liveness. Everything else (state, validation, dispatch) lives in
//! the [`ChannelAdapter`](crate::adapter::ChannelAdapter).

use crate::error::{ChannelError, TransportError};
use crate::memory::MemoryTransport;
use crate::websocket::{Framing, WebSocketTransport};
use agentrelay_types::config::TransportConfig;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Something the transport observed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound payload.
    Message {
        text: String,
        user_id: Option<String>,
    },
    /// The remote side closed the connection.
    Closed { reason: String },
    /// The connection broke.
    Error(String),
}

/// Inbound event stream returned by [`Transport::connect`].
pub type TransportStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// A concrete communication medium.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable name (for logging).
    fn name(&self) -> &str;

    /// Config tag of this transport variant.
    fn kind(&self) -> &'static str;

    /// Establish the connection and authenticate with `token`.
    ///
    /// The returned stream yields inbound payloads until the connection ends.
    async fn connect(&self, token: &str) -> Result<TransportStream, TransportError>;

    /// Tear the connection down.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Deliver one opaque string.
    async fn send(&self, raw: &str) -> Result<(), TransportError>;

    /// Transport-native liveness probe.
    async fn ping(&self) -> Result<(), TransportError>;
}

/// Build the transport variant selected by `config`.
pub fn build_transport(
    name: &str,
    config: &TransportConfig,
) -> Result<Arc<dyn Transport>, ChannelError> {
    match config {
        TransportConfig::Memory => Ok(Arc::new(MemoryTransport::new(name))),
        TransportConfig::WebSocket { url } => Ok(Arc::new(WebSocketTransport::new(
            name,
            url,
            Framing::Raw,
        )?)),
        TransportConfig::Relay {
            url,
            agent_id,
            role,
        } => Ok(Arc::new(WebSocketTransport::new(
            name,
            url,
            Framing::Relay {
                agent_id: agent_id.clone(),
                role: role.clone(),
            },
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_each_variant() {
        let memory = build_transport("m", &TransportConfig::Memory).unwrap();
        assert_eq!(memory.kind(), "memory");
        assert_eq!(memory.name(), "m");

        let ws = build_transport(
            "w",
            &TransportConfig::WebSocket {
                url: "ws://127.0.0.1:9/socket".to_string(),
            },
        )
        .unwrap();
        assert_eq!(ws.kind(), "websocket");

        let relay = build_transport(
            "r",
            &TransportConfig::Relay {
                url: "wss://relay.example.com/relay".to_string(),
                agent_id: "agent-1".to_string(),
                role: "developer".to_string(),
            },
        )
        .unwrap();
        assert_eq!(relay.kind(), "relay");
    }

    #[test]
    fn test_bad_url_is_configuration_error() {
        let err = build_transport(
            "w",
            &TransportConfig::WebSocket {
                url: "http://not-a-socket".to_string(),
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, ChannelError::Configuration(_)));

        let err = build_transport(
            "w",
            &TransportConfig::WebSocket {
                url: "::garbage::".to_string(),
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, ChannelError::Configuration(_)));
    }
}
