//! Envelope validation.
//!
//! [`validate_full`] checks every field of a raw payload and collects all
//! problems; [`validate`] is a cheap structural check for bulk scans. Neither
//! ever fails on malformed input: a payload that is not JSON, or not an
//! envelope, simply comes back invalid so the caller can treat it as text.

use crate::envelope::{MessageEnvelope, MessageType, Priority};
use crate::error::{AgentRelayError, AgentRelayResult};
use crate::serde_compat::parse_timestamp;
use serde_json::Value;

/// Outcome of [`validate_full`].
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Whether the payload is a well-formed envelope.
    pub valid: bool,
    /// Every problem found, in field order.
    pub errors: Vec<String>,
    /// The decoded envelope when `valid` is true.
    pub envelope: Option<MessageEnvelope>,
}

impl ValidationResult {
    fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
            envelope: None,
        }
    }

    /// Convert into a `Result`, mapping failures to
    /// [`AgentRelayError::Validation`].
    pub fn into_result(self) -> AgentRelayResult<MessageEnvelope> {
        match self.envelope {
            Some(env) if self.valid => Ok(env),
            _ => Err(AgentRelayError::Validation(self.errors)),
        }
    }
}

/// Fully validate a raw payload.
pub fn validate_full(raw: &str) -> ValidationResult {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => validate_value(&value),
        Err(e) => ValidationResult::invalid(vec![format!("payload is not valid JSON: {e}")]),
    }
}

/// Fully validate an already-parsed JSON value.
pub fn validate_value(value: &Value) -> ValidationResult {
    let Some(obj) = value.as_object() else {
        return ValidationResult::invalid(vec!["envelope must be a JSON object".to_string()]);
    };

    let mut errors = Vec::new();

    match obj.get("protocolVersion") {
        Some(Value::String(v)) if is_version(v) => {}
        Some(Value::String(v)) => errors.push(format!("protocolVersion '{v}' is not a version")),
        Some(_) => errors.push("protocolVersion must be a string".to_string()),
        None => errors.push("protocolVersion is required".to_string()),
    }

    let message_type = match obj.get("messageType") {
        Some(Value::String(t)) => match t.parse::<MessageType>() {
            Ok(mt) => Some(mt),
            Err(e) => {
                errors.push(e);
                None
            }
        },
        Some(_) => {
            errors.push("messageType must be a string".to_string());
            None
        }
        None => {
            errors.push("messageType is required".to_string());
            None
        }
    };

    match obj.get("senderId") {
        Some(Value::String(s)) if !s.trim().is_empty() => {}
        Some(Value::String(_)) => errors.push("senderId must not be empty".to_string()),
        Some(_) => errors.push("senderId must be a string".to_string()),
        None => errors.push("senderId is required".to_string()),
    }

    match obj.get("timestamp") {
        Some(ts) if parse_timestamp(ts).is_some() => {}
        Some(_) => errors.push("timestamp is not a parseable point in time".to_string()),
        None => errors.push("timestamp is required".to_string()),
    }

    match obj.get("priority") {
        None => {}
        Some(Value::String(p)) => {
            if let Err(e) = p.parse::<Priority>() {
                errors.push(e);
            }
        }
        Some(_) => errors.push("priority must be a string".to_string()),
    }

    for field in ["recipientId", "correlationId"] {
        match obj.get(field) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => errors.push(format!("{field} must be a string")),
        }
    }

    match obj.get("metadata") {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(_) => errors.push("metadata must be an object".to_string()),
    }

    if let Some(mt) = message_type {
        let payload = obj.get("payload").filter(|p| !p.is_null());
        if mt.requires_payload() && !payload.is_some_and(Value::is_object) {
            errors.push(format!("{mt} requires an object payload"));
        }
    }

    if !errors.is_empty() {
        return ValidationResult::invalid(errors);
    }

    match serde_json::from_value::<MessageEnvelope>(value.clone()) {
        Ok(envelope) => ValidationResult {
            valid: true,
            errors: Vec::new(),
            envelope: Some(envelope),
        },
        Err(e) => ValidationResult::invalid(vec![format!("envelope decode failed: {e}")]),
    }
}

/// Cheap structural check: a JSON object with non-empty string
/// `protocolVersion`, `messageType` and `senderId`.
pub fn validate(raw: &str) -> bool {
    serde_json::from_str::<Value>(raw).is_ok_and(|value| validate_structure(&value))
}

/// [`validate`] on an already-parsed JSON value.
pub fn validate_structure(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    ["protocolVersion", "messageType", "senderId"]
        .iter()
        .all(|k| obj.get(*k).and_then(Value::as_str).is_some_and(|s| !s.is_empty()))
}

/// `<major>.<minor>` (optionally `.<patch>`), digits only.
fn is_version(v: &str) -> bool {
    let parts: Vec<&str> = v.split('.').collect();
    (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "protocolVersion": "1.0",
            "messageType": "heartbeat",
            "senderId": "agent-1",
            "timestamp": "2024-05-01T12:00:00Z",
            "priority": "normal"
        })
    }

    #[test]
    fn test_valid_minimal_envelope() {
        let result = validate_full(&base().to_string());
        assert!(result.valid, "{:?}", result.errors);
        let env = result.envelope.unwrap();
        assert_eq!(env.sender_id, "agent-1");
        assert_eq!(env.message_type, MessageType::Heartbeat);
    }

    #[test]
    fn test_builder_output_validates() {
        for env in [
            MessageEnvelope::heartbeat("a"),
            MessageEnvelope::task_assigned("a", "b", "t", "d"),
            MessageEnvelope::status_query("a", "b"),
            MessageEnvelope::error("a", Some("b".into()), "E", "m"),
        ] {
            let raw = env.to_json().unwrap();
            let result = validate_full(&raw);
            assert!(result.valid, "{:?}", result.errors);
            assert_eq!(result.envelope.unwrap(), env);
            assert!(validate(&raw));
        }
    }

    #[test]
    fn test_priority_defaults_when_absent() {
        let mut v = base();
        v.as_object_mut().unwrap().remove("priority");
        let env = validate_value(&v).into_result().unwrap();
        assert_eq!(env.priority, Priority::Normal);
    }

    #[test]
    fn test_epoch_millis_timestamp_accepted() {
        let mut v = base();
        v["timestamp"] = json!(1714564800000i64);
        assert!(validate_value(&v).valid);
    }

    #[test]
    fn test_collects_every_error() {
        let v = json!({
            "protocolVersion": "",
            "messageType": "dance",
            "senderId": "",
            "timestamp": "not a time",
            "priority": "urgent",
            "metadata": [1, 2]
        });
        let result = validate_value(&v);
        assert!(!result.valid);
        assert!(result.envelope.is_none());
        assert_eq!(result.errors.len(), 6, "{:?}", result.errors);
    }

    #[test]
    fn test_missing_required_fields() {
        let result = validate_full("{}");
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("protocolVersion")));
        assert!(result.errors.iter().any(|e| e.contains("messageType")));
        assert!(result.errors.iter().any(|e| e.contains("senderId")));
        assert!(result.errors.iter().any(|e| e.contains("timestamp")));
    }

    #[test]
    fn test_payload_shape_enforced() {
        let mut v = base();
        v["messageType"] = json!("task-assigned");
        assert!(!validate_value(&v).valid);
        v["payload"] = json!("just a string");
        assert!(!validate_value(&v).valid);
        v["payload"] = json!({"taskId": "t-1"});
        assert!(validate_value(&v).valid);
    }

    #[test]
    fn test_payload_contents_not_interpreted() {
        let mut v = base();
        v["payload"] = json!({"anything": [1, {"nested": null}], "goes": true});
        v["metadata"] = json!({"k": {"deep": 1}});
        assert!(validate_value(&v).valid);
    }

    #[test]
    fn test_garbage_never_panics() {
        for raw in [
            "",
            "hello there",
            "null",
            "[]",
            "42",
            "\"string\"",
            "{\"protocolVersion\":",
            "\u{0}\u{1}\u{2}",
            "{\"protocolVersion\":1,\"messageType\":[],\"senderId\":{}}",
        ] {
            let result = validate_full(raw);
            assert!(!result.valid);
            assert!(!result.errors.is_empty());
            assert!(!validate(raw));
        }
    }

    #[test]
    fn test_structural_check_is_shallow() {
        // Structural check passes even though the timestamp is missing.
        let raw = r#"{"protocolVersion":"1.0","messageType":"heartbeat","senderId":"a"}"#;
        assert!(validate(raw));
        assert!(!validate_full(raw).valid);
    }

    #[test]
    fn test_into_result_error() {
        let err = validate_full("nope").into_result().unwrap_err();
        assert!(matches!(err, AgentRelayError::Validation(ref e) if !e.is_empty()));
    }

    #[test]
    fn test_version_format() {
        assert!(is_version("1.0"));
        assert!(is_version("2.10.3"));
        assert!(!is_version("1"));
        assert!(!is_version("v1.0"));
        assert!(!is_version("1..0"));
    }
}
