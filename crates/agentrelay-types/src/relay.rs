//! Relay hub wire frames.
//!
//! Clients talk to the relay with JSON text frames over a WebSocket.
//! Requests are tagged by `method`, events by `event`.

use crate::envelope::MessageEnvelope;
use crate::validation::validate_structure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One live agent connection as tracked by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConnection {
    /// Unique id of the transport session.
    pub connection_id: String,
    /// Agent that owns the session.
    pub agent_id: String,
    /// Role the agent announced (e.g. `"developer"`).
    pub role: String,
    /// Opaque metadata supplied at registration.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the connection registered.
    pub connected_at: DateTime<Utc>,
    /// Last time the connection did something.
    pub last_activity: DateTime<Utc>,
}

/// Serialized snapshot of a connection, as carried in relay events.
pub type ConnectionInfo = AgentConnection;

/// An envelope as it travels through the relay.
///
/// Holds the sender's JSON as received. Fields keep their order and
/// representation, and fields outside the envelope schema are kept, so
/// recipients see exactly what the sender wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEnvelope(Value);

impl RawEnvelope {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Encode a typed envelope.
    pub fn from_envelope(envelope: &MessageEnvelope) -> Result<Self, serde_json::Error> {
        serde_json::to_value(envelope).map(Self)
    }

    /// Parse a raw JSON payload without checking its shape.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw).map(Self)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Whether this looks like an envelope (see [`validate_structure`]).
    pub fn is_envelope(&self) -> bool {
        validate_structure(&self.0)
    }

    pub fn message_type(&self) -> Option<&str> {
        self.0.get("messageType").and_then(Value::as_str)
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.0.get("senderId").and_then(Value::as_str)
    }

    pub fn recipient_id(&self) -> Option<&str> {
        self.0.get("recipientId").and_then(Value::as_str)
    }

    /// Decode into a typed envelope.
    pub fn decode(&self) -> Result<MessageEnvelope, serde_json::Error> {
        MessageEnvelope::deserialize(&self.0)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

/// Client → relay request frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RelayRequest {
    /// Bind this connection to an agent identity.
    #[serde(rename_all = "camelCase")]
    RegisterAgent {
        agent_id: String,
        role: String,
        #[serde(default)]
        metadata: HashMap<String, serde_json::Value>,
    },
    /// Broadcast to every other connection.
    SendMessage { envelope: RawEnvelope },
    /// Deliver to every connection of one agent.
    #[serde(rename_all = "camelCase")]
    SendMessageToAgent {
        recipient_agent_id: String,
        envelope: RawEnvelope,
    },
    /// Application-level liveness ping.
    Heartbeat,
    /// Snapshot of all registered connections.
    GetConnectedAgents,
    /// Connection status of one agent.
    #[serde(rename_all = "camelCase")]
    QueryStatus { agent_id: String },
}

/// Relay → client event frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    /// Another connection registered an agent.
    #[serde(rename_all = "camelCase")]
    AgentConnected {
        agent_id: String,
        role: String,
        #[serde(default)]
        metadata: HashMap<String, serde_json::Value>,
    },
    /// A registered connection went away.
    #[serde(rename_all = "camelCase")]
    AgentDisconnected { agent_id: String },
    /// An envelope routed to this connection.
    ReceiveMessage { envelope: RawEnvelope },
    /// A request from this connection could not be served.
    #[serde(rename_all = "camelCase")]
    MessageError {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient_id: Option<String>,
    },
    /// Reply to a heartbeat from a registered connection.
    HeartbeatAck { timestamp: DateTime<Utc> },
    /// Reply to `get_connected_agents`.
    ConnectedAgents { connections: Vec<ConnectionInfo> },
    /// Reply to `query_status`.
    #[serde(rename_all = "camelCase")]
    AgentStatus {
        agent_id: String,
        is_connected: bool,
        connections: Vec<ConnectionInfo>,
    },
}

impl RelayEvent {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl RelayRequest {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a JSON text frame.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_names() {
        let req = RelayRequest::SendMessageToAgent {
            recipient_agent_id: "agent-2".to_string(),
            envelope: RawEnvelope::from_envelope(&MessageEnvelope::status_query(
                "agent-1", "agent-2",
            ))
            .unwrap(),
        };
        let json: serde_json::Value = serde_json::from_str(&req.to_json().unwrap()).unwrap();
        assert_eq!(json["method"], "send_message_to_agent");
        assert_eq!(json["recipientAgentId"], "agent-2");
        assert_eq!(json["envelope"]["messageType"], "status-query");
    }

    #[test]
    fn test_register_without_metadata() {
        let raw = r#"{"method":"register_agent","agentId":"agent-1","role":"developer"}"#;
        match RelayRequest::from_json(raw).unwrap() {
            RelayRequest::RegisterAgent {
                agent_id,
                role,
                metadata,
            } => {
                assert_eq!(agent_id, "agent-1");
                assert_eq!(role, "developer");
                assert!(metadata.is_empty());
            }
            other => panic!("Expected RegisterAgent, got {other:?}"),
        }
    }

    #[test]
    fn test_unit_requests() {
        assert!(matches!(
            RelayRequest::from_json(r#"{"method":"heartbeat"}"#).unwrap(),
            RelayRequest::Heartbeat
        ));
        assert!(matches!(
            RelayRequest::from_json(r#"{"method":"get_connected_agents"}"#).unwrap(),
            RelayRequest::GetConnectedAgents
        ));
        assert!(RelayRequest::from_json(r#"{"method":"explode"}"#).is_err());
    }

    #[test]
    fn test_event_wire_names() {
        let ev = RelayEvent::AgentStatus {
            agent_id: "a".to_string(),
            is_connected: false,
            connections: vec![],
        };
        let json: serde_json::Value = serde_json::from_str(&ev.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "agent_status");
        assert_eq!(json["isConnected"], false);

        let err = RelayEvent::MessageError {
            error: "Agent 'x' is not connected".to_string(),
            recipient_id: None,
        };
        let json = err.to_json().unwrap();
        assert!(json.contains("message_error"));
        assert!(!json.contains("recipientId"));
    }

    #[test]
    fn test_envelope_passes_through_verbatim() {
        let envelope = r#"{"protocolVersion":"1.0","messageType":"notification","senderId":"a","timestamp":1714564800000,"payload":{"text":"hi"},"traceId":"t-1"}"#;
        let raw = format!(r#"{{"method":"send_message","envelope":{envelope}}}"#);
        let RelayRequest::SendMessage { envelope: carried } = RelayRequest::from_json(&raw).unwrap()
        else {
            panic!("Expected SendMessage");
        };
        assert!(carried.is_envelope());
        assert_eq!(carried.message_type(), Some("notification"));

        let event = RelayEvent::ReceiveMessage { envelope: carried }.to_json().unwrap();
        assert_eq!(
            event,
            format!(r#"{{"event":"receive_message","envelope":{envelope}}}"#)
        );
    }

    #[test]
    fn test_raw_envelope_shape_check_and_decode() {
        assert!(!RawEnvelope::new(serde_json::json!(5)).is_envelope());
        assert!(!RawEnvelope::new(serde_json::json!({"senderId": "a"})).is_envelope());

        let typed = MessageEnvelope::task_assigned("lead", "dev", "T-1", "ship it");
        let raw = RawEnvelope::from_envelope(&typed).unwrap();
        assert!(raw.is_envelope());
        assert_eq!(raw.sender_id(), Some("lead"));
        assert_eq!(raw.recipient_id(), Some("dev"));
        assert_eq!(raw.decode().unwrap(), typed);
    }
}
