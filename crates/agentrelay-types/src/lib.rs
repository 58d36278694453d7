//! Core types for the agentrelay messaging core.
//!
//! This crate defines the data structures shared by the channel adapters and
//! the relay: the versioned message envelope and its validator, the relay hub
//! wire frames, bearer-token helpers, and configuration. It contains no
//! networking.

pub mod auth;
pub mod config;
pub mod envelope;
pub mod error;
pub mod relay;
pub mod serde_compat;
pub mod validation;

pub use envelope::{MessageEnvelope, MessageType, Priority, PROTOCOL_VERSION};
pub use error::{AgentRelayError, AgentRelayResult};
pub use relay::{AgentConnection, ConnectionInfo, RawEnvelope, RelayEvent, RelayRequest};
pub use validation::{validate, validate_full, validate_structure, validate_value, ValidationResult};
