//! Shared error types for agentrelay.

use thiserror::Error;

/// Top-level error categories shared across the agentrelay crates.
#[derive(Error, Debug)]
pub enum AgentRelayError {
    /// Malformed or missing configuration (e.g. a bad token). Fatal, raised
    /// before any I/O happens.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Handshake or network failure on a transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An inbound envelope failed schema validation.
    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A unicast target had no live connection.
    #[error("Routing error: {0}")]
    Routing(String),

    /// A subscriber callback failed.
    #[error("Handler error: {0}")]
    Handler(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias for Result with AgentRelayError.
pub type AgentRelayResult<T> = Result<T, AgentRelayError>;
