//! Relay hub for agentrelay.
//!
//! Tracks which agents are connected (multi-device), announces presence, and
//! routes envelopes between them by broadcast or by agent id. Exposed over a
//! WebSocket endpoint by [`server::RelayServer`].

pub mod config;
pub mod logging;
pub mod registry;
pub mod router;
pub mod server;

pub use registry::ConnectionRegistry;
pub use router::RelayRouter;
pub use server::RelayServer;
