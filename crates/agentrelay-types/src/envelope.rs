//! The versioned message envelope exchanged between agents.
//!
//! Envelopes are plain values. Nothing mutates one in place: the `with_*`
//! helpers consume an envelope and hand back a new one.

use crate::serde_compat::timestamp_lenient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current envelope protocol version.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Opaque key/value metadata attached to an envelope.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// The closed set of envelope message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// Work handed to an agent.
    TaskAssigned,
    /// The assignee accepted a task.
    TaskAccepted,
    /// Intermediate progress on a task.
    TaskProgress,
    /// A task finished successfully.
    TaskCompleted,
    /// A task failed.
    TaskFailed,
    /// Ask an agent for its status.
    StatusQuery,
    /// Answer to a status query.
    StatusResponse,
    /// Application-level liveness signal.
    Heartbeat,
    /// Free-form informational message.
    Notification,
    /// An error report.
    Error,
}

impl MessageType {
    /// Every supported message type.
    pub const ALL: [MessageType; 10] = [
        MessageType::TaskAssigned,
        MessageType::TaskAccepted,
        MessageType::TaskProgress,
        MessageType::TaskCompleted,
        MessageType::TaskFailed,
        MessageType::StatusQuery,
        MessageType::StatusResponse,
        MessageType::Heartbeat,
        MessageType::Notification,
        MessageType::Error,
    ];

    /// Wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::TaskAssigned => "task-assigned",
            MessageType::TaskAccepted => "task-accepted",
            MessageType::TaskProgress => "task-progress",
            MessageType::TaskCompleted => "task-completed",
            MessageType::TaskFailed => "task-failed",
            MessageType::StatusQuery => "status-query",
            MessageType::StatusResponse => "status-response",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Notification => "notification",
            MessageType::Error => "error",
        }
    }

    /// Whether envelopes of this type must carry an object payload.
    pub fn requires_payload(&self) -> bool {
        matches!(
            self,
            MessageType::TaskAssigned
                | MessageType::TaskProgress
                | MessageType::TaskCompleted
                | MessageType::TaskFailed
                | MessageType::StatusResponse
                | MessageType::Error
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unsupported message type '{s}'"))
    }
}

/// Delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Wire name of this priority.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unsupported priority '{other}'")),
        }
    }
}

/// A versioned agent message.
///
/// A present `recipient_id` makes the envelope unicast; an absent one makes
/// it a broadcast. `payload` and `metadata` are opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Envelope protocol version (e.g. `"1.0"`).
    pub protocol_version: String,
    /// Message type.
    pub message_type: MessageType,
    /// Agent that produced the envelope.
    pub sender_id: String,
    /// Target agent, or `None` for broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    /// Creation time.
    #[serde(deserialize_with = "timestamp_lenient")]
    pub timestamp: DateTime<Utc>,
    /// Ties responses to their request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Delivery priority.
    #[serde(default)]
    pub priority: Priority,
    /// Opaque message body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Opaque key/value metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl MessageEnvelope {
    /// Base constructor; stamps the protocol version and the current time.
    pub fn new(message_type: MessageType, sender_id: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            message_type,
            sender_id: sender_id.into(),
            recipient_id: None,
            timestamp: Utc::now(),
            correlation_id: None,
            priority: Priority::Normal,
            payload: None,
            metadata: None,
        }
    }

    /// Broadcast liveness signal.
    pub fn heartbeat(sender_id: impl Into<String>) -> Self {
        Self::new(MessageType::Heartbeat, sender_id).with_priority(Priority::Low)
    }

    /// Assign a task to an agent.
    pub fn task_assigned(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        task_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::TaskAssigned, sender_id)
            .with_recipient(recipient_id)
            .with_correlation_id(crate::auth::generate_nonce())
            .with_payload(serde_json::json!({
                "taskId": task_id.into(),
                "description": description.into(),
            }))
    }

    /// Accept a task previously assigned by `recipient_id`.
    pub fn task_accepted(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::TaskAccepted, sender_id)
            .with_recipient(recipient_id)
            .with_payload(serde_json::json!({ "taskId": task_id.into() }))
    }

    /// Report progress on a task, `percent` clamped to 0..=100.
    pub fn task_progress(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        task_id: impl Into<String>,
        percent: u8,
        note: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::TaskProgress, sender_id)
            .with_recipient(recipient_id)
            .with_payload(serde_json::json!({
                "taskId": task_id.into(),
                "percent": percent.min(100),
                "note": note.into(),
            }))
    }

    /// Report a finished task together with its result.
    pub fn task_completed(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        task_id: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self::new(MessageType::TaskCompleted, sender_id)
            .with_recipient(recipient_id)
            .with_payload(serde_json::json!({
                "taskId": task_id.into(),
                "result": result,
            }))
    }

    /// Report a failed task.
    pub fn task_failed(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        task_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::TaskFailed, sender_id)
            .with_recipient(recipient_id)
            .with_priority(Priority::High)
            .with_payload(serde_json::json!({
                "taskId": task_id.into(),
                "reason": reason.into(),
            }))
    }

    /// Ask an agent for its status. Carries a fresh correlation id.
    pub fn status_query(sender_id: impl Into<String>, recipient_id: impl Into<String>) -> Self {
        Self::new(MessageType::StatusQuery, sender_id)
            .with_recipient(recipient_id)
            .with_correlation_id(crate::auth::generate_nonce())
    }

    /// Answer a status query.
    pub fn status_response(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        status: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::new(MessageType::StatusResponse, sender_id)
            .with_recipient(recipient_id)
            .with_payload(serde_json::json!({
                "status": status.into(),
                "details": details,
            }))
    }

    /// Broadcast a free-form notification.
    pub fn notification(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageType::Notification, sender_id)
            .with_payload(serde_json::json!({ "text": text.into() }))
    }

    /// Report an error, optionally to a specific agent.
    pub fn error(
        sender_id: impl Into<String>,
        recipient_id: Option<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let env = Self::new(MessageType::Error, sender_id)
            .with_priority(Priority::High)
            .with_payload(serde_json::json!({
                "code": code.into(),
                "message": message.into(),
            }));
        match recipient_id {
            Some(r) => env.with_recipient(r),
            None => env,
        }
    }

    /// Build a response addressed to this envelope's sender, carrying its
    /// correlation id.
    pub fn reply(
        &self,
        sender_id: impl Into<String>,
        message_type: MessageType,
        payload: Option<serde_json::Value>,
    ) -> Self {
        let mut env = Self::new(message_type, sender_id).with_recipient(self.sender_id.clone());
        env.correlation_id = self.correlation_id.clone();
        env.payload = payload;
        env
    }

    /// Same envelope with a different priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Same envelope addressed to one agent.
    pub fn with_recipient(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    /// Same envelope with a correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Same envelope with a payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Same envelope with one more metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value);
        self
    }

    /// `true` when no recipient is set.
    pub fn is_broadcast(&self) -> bool {
        self.recipient_id.is_none()
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape_is_camel_case() {
        let env = MessageEnvelope::status_query("lead", "worker-1");
        let json: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(json["protocolVersion"], "1.0");
        assert_eq!(json["messageType"], "status-query");
        assert_eq!(json["senderId"], "lead");
        assert_eq!(json["recipientId"], "worker-1");
        assert_eq!(json["priority"], "normal");
        assert!(json["correlationId"].is_string());
        assert!(json.get("payload").is_none());
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_heartbeat_is_broadcast() {
        let env = MessageEnvelope::heartbeat("agent-1");
        assert!(env.is_broadcast());
        assert_eq!(env.message_type, MessageType::Heartbeat);
        assert_eq!(env.priority, Priority::Low);
        assert_eq!(env.protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_builders_stamp_payload_types() {
        for env in [
            MessageEnvelope::task_assigned("a", "b", "t-1", "do it"),
            MessageEnvelope::task_progress("a", "b", "t-1", 250, "nearly"),
            MessageEnvelope::task_completed("a", "b", "t-1", serde_json::json!(42)),
            MessageEnvelope::task_failed("a", "b", "t-1", "boom"),
            MessageEnvelope::status_response("a", "b", "idle", serde_json::json!({})),
            MessageEnvelope::error("a", None, "E1", "bad"),
        ] {
            assert!(env.message_type.requires_payload());
            assert!(env.payload.as_ref().is_some_and(|p| p.is_object()));
        }
        let progress = MessageEnvelope::task_progress("a", "b", "t-1", 250, "nearly");
        assert_eq!(progress.payload.unwrap()["percent"], 100);
    }

    #[test]
    fn test_with_helpers_return_new_values() {
        let original = MessageEnvelope::notification("a", "hello");
        let changed = original
            .clone()
            .with_priority(Priority::Critical)
            .with_metadata("trace", serde_json::json!("x-1"));
        assert_eq!(original.priority, Priority::Normal);
        assert!(original.metadata.is_none());
        assert_eq!(changed.priority, Priority::Critical);
        assert_eq!(changed.metadata.unwrap()["trace"], "x-1");
    }

    #[test]
    fn test_reply_carries_correlation() {
        let query = MessageEnvelope::status_query("lead", "worker");
        let reply = query.reply(
            "worker",
            MessageType::StatusResponse,
            Some(serde_json::json!({"status": "idle"})),
        );
        assert_eq!(reply.recipient_id.as_deref(), Some("lead"));
        assert_eq!(reply.correlation_id, query.correlation_id);
        assert_eq!(reply.sender_id, "worker");
    }

    #[test]
    fn test_message_type_names_roundtrip() {
        for t in MessageType::ALL {
            assert_eq!(t.as_str().parse::<MessageType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert!("task_assigned".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Low < Priority::Normal);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
