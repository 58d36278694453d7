//! Lenient timestamp handling for envelopes produced by other runtimes.
//!
//! Peers emit timestamps either as RFC 3339 strings or as integer epoch
//! milliseconds. Both are accepted on input; output is always RFC 3339.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Deserializer, Visitor};
use std::fmt;

/// Interpret a JSON value as a point in time.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n.as_i64().and_then(from_epoch_millis),
        _ => None,
    }
}

fn from_epoch_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Deserialize a `DateTime<Utc>` from an RFC 3339 string or epoch millis.
pub fn timestamp_lenient<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an RFC 3339 timestamp or epoch milliseconds")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            DateTime::parse_from_rfc3339(v)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| E::custom(format!("invalid timestamp '{v}': {e}")))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            from_epoch_millis(v).ok_or_else(|| E::custom(format!("timestamp out of range: {v}")))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            let ms = i64::try_from(v)
                .map_err(|_| E::custom(format!("timestamp out of range: {v}")))?;
            self.visit_i64(ms)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Stamped {
        #[serde(deserialize_with = "timestamp_lenient")]
        at: DateTime<Utc>,
    }

    #[test]
    fn test_rfc3339_and_millis_agree() {
        let a: Stamped = serde_json::from_str(r#"{"at":"2024-01-02T03:04:05Z"}"#).unwrap();
        let b: Stamped = serde_json::from_str(r#"{"at":1704164645000}"#).unwrap();
        assert_eq!(a.at, b.at);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(serde_json::from_str::<Stamped>(r#"{"at":"yesterday"}"#).is_err());
        assert!(serde_json::from_str::<Stamped>(r#"{"at":true}"#).is_err());
        assert!(parse_timestamp(&serde_json::json!(null)).is_none());
        assert!(parse_timestamp(&serde_json::json!("2024-13-45")).is_none());
    }
}
