//! Relay router — presence, broadcast and unicast between attached clients.
//!
//! Every operation runs on behalf of a caller connection. Delivery to each
//! recipient goes through its own bounded queue with `try_send`, so a slow or
//! dead client never blocks the caller or anyone else.

use crate::registry::ConnectionRegistry;
use agentrelay_types::{AgentConnection, AgentRelayError, RawEnvelope, RelayEvent, RelayRequest};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Routes relay requests between attached client sessions.
pub struct RelayRouter {
    registry: ConnectionRegistry,
    clients: DashMap<String, mpsc::Sender<RelayEvent>>,
    outbound_buffer: usize,
}

impl RelayRouter {
    /// Create a router whose per-client queues hold `outbound_buffer` events.
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            clients: DashMap::new(),
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Number of attached sessions, registered or not.
    pub fn attached_count(&self) -> usize {
        self.clients.len()
    }

    /// Attach a client session. Events for it arrive on the returned receiver.
    pub fn attach(&self, connection_id: &str) -> mpsc::Receiver<RelayEvent> {
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        self.clients.insert(connection_id.to_string(), tx);
        debug!(connection_id, "Client attached");
        rx
    }

    /// Queue one event for one client. Full or closed queues drop the event.
    fn deliver(&self, connection_id: &str, event: RelayEvent) -> bool {
        let Some(tx) = self.clients.get(connection_id).map(|e| e.value().clone()) else {
            debug!(connection_id, "Delivery skipped: client not attached");
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id, "Outbound queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(connection_id, "Outbound queue closed, dropping event");
                false
            }
        }
    }

    /// Queue `event` for every attached client except `caller`.
    fn broadcast_except(&self, caller: &str, event: &RelayEvent) -> usize {
        let targets: Vec<String> = self
            .clients
            .iter()
            .filter(|e| e.key() != caller)
            .map(|e| e.key().clone())
            .collect();
        targets
            .iter()
            .filter(|id| self.deliver(id, event.clone()))
            .count()
    }

    /// Bind `caller` to an agent identity and announce it to everyone else.
    ///
    /// Re-registering under a different agent id announces the previous
    /// identity as disconnected first, as [`RelayRouter::disconnect`] would.
    pub fn register_agent(
        &self,
        caller: &str,
        agent_id: &str,
        role: &str,
        metadata: HashMap<String, Value>,
    ) -> AgentConnection {
        let previous = self
            .registry
            .get_connection(caller)
            .filter(|prev| prev.agent_id != agent_id);
        let connection = self
            .registry
            .add_connection(caller, agent_id, role, metadata.clone());
        if let Some(prev) = previous {
            info!(
                connection_id = caller,
                from = %prev.agent_id,
                to = agent_id,
                "Connection changed agent identity"
            );
            self.broadcast_except(
                caller,
                &RelayEvent::AgentDisconnected {
                    agent_id: prev.agent_id,
                },
            );
        }
        info!(connection_id = caller, agent_id, role, "Agent registered");
        self.broadcast_except(
            caller,
            &RelayEvent::AgentConnected {
                agent_id: agent_id.to_string(),
                role: role.to_string(),
                metadata,
            },
        );
        connection
    }

    /// Reply with a `message_error` unless `envelope` has the envelope shape.
    fn accept_envelope(&self, caller: &str, envelope: &RawEnvelope) -> bool {
        if envelope.is_envelope() {
            return true;
        }
        debug!(connection_id = caller, "Rejected payload without envelope shape");
        self.reject_frame(
            caller,
            "envelope needs protocolVersion, messageType and senderId",
        );
        false
    }

    /// Broadcast `envelope` unchanged to every client except the caller.
    /// Returns the number of deliveries queued.
    pub fn send_message(&self, caller: &str, envelope: RawEnvelope) -> usize {
        if !self.accept_envelope(caller, &envelope) {
            return 0;
        }
        self.registry.update_activity(caller);
        debug!(
            connection_id = caller,
            message_type = envelope.message_type().unwrap_or_default(),
            "Broadcasting envelope"
        );
        self.broadcast_except(caller, &RelayEvent::ReceiveMessage { envelope })
    }

    /// Deliver `envelope` to every connection of `recipient_agent_id`.
    ///
    /// An absent recipient yields one `message_error` back to the caller.
    pub fn send_message_to_agent(
        &self,
        caller: &str,
        recipient_agent_id: &str,
        envelope: RawEnvelope,
    ) -> usize {
        if !self.accept_envelope(caller, &envelope) {
            return 0;
        }
        self.registry.update_activity(caller);
        let recipients = self.registry.get_agent_connections(recipient_agent_id);

        if recipients.is_empty() {
            let error = AgentRelayError::Routing(format!(
                "Agent '{recipient_agent_id}' is not connected"
            ));
            debug!(connection_id = caller, recipient = recipient_agent_id, "Unicast target absent");
            self.deliver(
                caller,
                RelayEvent::MessageError {
                    error: error.to_string(),
                    recipient_id: Some(recipient_agent_id.to_string()),
                },
            );
            return 0;
        }

        debug!(
            connection_id = caller,
            recipient = recipient_agent_id,
            connections = recipients.len(),
            "Unicasting envelope"
        );
        recipients
            .iter()
            .filter(|c| {
                self.deliver(
                    &c.connection_id,
                    RelayEvent::ReceiveMessage {
                        envelope: envelope.clone(),
                    },
                )
            })
            .count()
    }

    /// Ack a heartbeat. Unregistered callers get no reply.
    pub fn heartbeat(&self, caller: &str) -> bool {
        if self.registry.get_connection(caller).is_none() {
            debug!(connection_id = caller, "Heartbeat from unregistered connection ignored");
            return false;
        }
        self.registry.update_activity(caller);
        self.deliver(
            caller,
            RelayEvent::HeartbeatAck {
                timestamp: Utc::now(),
            },
        )
    }

    /// Reply to the caller with every registered connection.
    pub fn get_connected_agents(&self, caller: &str) {
        let connections = self.registry.get_all_connections();
        self.deliver(caller, RelayEvent::ConnectedAgents { connections });
    }

    /// Reply to the caller with the status of `agent_id`.
    pub fn query_status(&self, caller: &str, agent_id: &str) {
        let connections = self.registry.get_agent_connections(agent_id);
        self.deliver(
            caller,
            RelayEvent::AgentStatus {
                agent_id: agent_id.to_string(),
                is_connected: !connections.is_empty(),
                connections,
            },
        );
    }

    /// Forget `caller`. Registered connections are announced as gone to
    /// everyone remaining.
    pub fn disconnect(&self, caller: &str, error: Option<&str>) -> Option<AgentConnection> {
        let removed = self.registry.remove_connection(caller);
        self.clients.remove(caller);

        match (&removed, error) {
            (Some(conn), Some(err)) => {
                warn!(connection_id = caller, agent_id = %conn.agent_id, error = err, "Agent disconnected with error")
            }
            (Some(conn), None) => {
                info!(connection_id = caller, agent_id = %conn.agent_id, "Agent disconnected")
            }
            (None, Some(err)) => debug!(connection_id = caller, error = err, "Client detached with error"),
            (None, None) => debug!(connection_id = caller, "Client detached"),
        }

        if let Some(conn) = &removed {
            self.broadcast_except(
                caller,
                &RelayEvent::AgentDisconnected {
                    agent_id: conn.agent_id.clone(),
                },
            );
        }
        removed
    }

    /// Dispatch one decoded request frame.
    pub fn handle_request(&self, caller: &str, request: RelayRequest) {
        match request {
            RelayRequest::RegisterAgent {
                agent_id,
                role,
                metadata,
            } => {
                self.register_agent(caller, &agent_id, &role, metadata);
            }
            RelayRequest::SendMessage { envelope } => {
                self.send_message(caller, envelope);
            }
            RelayRequest::SendMessageToAgent {
                recipient_agent_id,
                envelope,
            } => {
                self.send_message_to_agent(caller, &recipient_agent_id, envelope);
            }
            RelayRequest::Heartbeat => {
                self.heartbeat(caller);
            }
            RelayRequest::GetConnectedAgents => self.get_connected_agents(caller),
            RelayRequest::QueryStatus { agent_id } => self.query_status(caller, &agent_id),
        }
    }

    /// Reply to a frame that could not be decoded.
    pub fn reject_frame(&self, caller: &str, reason: &str) {
        self.deliver(
            caller,
            RelayEvent::MessageError {
                error: format!("Invalid request: {reason}"),
                recipient_id: None,
            },
        );
    }
}
