//! Shared channel types: connection state and inbound text messages.

use serde_json::Value;
use std::fmt;

/// Lifecycle state of a channel adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ChannelConnectionState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ChannelConnectionState) -> bool {
        use ChannelConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connecting, Disconnected)
                | (Failed, Connecting)
                | (Failed, Disconnected)
                | (Connected, Reconnecting)
                | (Connected, Disconnected)
                | (Reconnecting, Connected)
                | (Reconnecting, Failed)
                | (Reconnecting, Disconnected)
        )
    }
}

impl fmt::Display for ChannelConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelConnectionState::Disconnected => "disconnected",
            ChannelConnectionState::Connecting => "connecting",
            ChannelConnectionState::Connected => "connected",
            ChannelConnectionState::Reconnecting => "reconnecting",
            ChannelConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// An inbound payload that is not a valid envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    /// Raw text as received.
    pub text: String,
    /// Platform user that sent it, when the transport knows.
    pub user_id: Option<String>,
}

/// Best-effort JSON peek used by transports that want to log frame types.
pub(crate) fn frame_kind(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    value
        .get("messageType")
        .or_else(|| value.get("event"))
        .or_else(|| value.get("method"))
        .and_then(Value::as_str)
        .map(String::from)
}
