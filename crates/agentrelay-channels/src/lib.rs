//! Channel adapter layer for agentrelay.
//!
//! A [`ChannelAdapter`] drives one [`Transport`] through the connection
//! lifecycle and turns raw inbound payloads into validated
//! [`MessageEnvelope`](agentrelay_types::MessageEnvelope)s or plain
//! [`TextMessage`]s for subscribers.

pub mod adapter;
pub mod error;
pub mod memory;
pub mod subscriptions;
pub mod transport;
pub mod types;
pub mod websocket;

pub use adapter::ChannelAdapter;
pub use error::{ChannelError, TransportError};
pub use memory::MemoryTransport;
pub use subscriptions::Subscription;
pub use transport::{build_transport, Transport, TransportEvent, TransportStream};
pub use types::{ChannelConnectionState, TextMessage};
pub use websocket::{Framing, WebSocketTransport};
