//! The JSON envelope shared by every frame in both directions.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::MessageType;

/// Why an inbound frame was rejected before dispatch.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum EnvelopeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no 'type'")]
    MissingType,

    #[error("frame has no 'timestamp'")]
    MissingTimestamp,
}

/// A single frame on the wire.
///
/// `type` and `timestamp` are mandatory. Top-level fields other than the four
/// known ones (the backend puts `room_id`, `project_id` and heartbeat
/// `message` there) are kept in `extra` so they survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Frame type
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Send time, as the producer wrote it
    pub timestamp: String,

    /// Payload object
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,

    /// Room the frame was fanned out to
    #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,

    /// Any other top-level field
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope stamped with the current time.
    pub fn new(message_type: MessageType, data: Value) -> Self {
        Self {
            message_type,
            timestamp: now_timestamp(),
            data,
            room_id: None,
            extra: Map::new(),
        }
    }

    /// Attach a top-level field next to `type`/`timestamp`.
    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Parse and validate a raw text frame.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(raw)?;
        let Some(object) = value.as_object() else {
            return Err(EnvelopeError::NotAnObject);
        };
        if !is_present_string(object.get("type")) {
            return Err(EnvelopeError::MissingType);
        }
        if !is_present(object.get("timestamp")) {
            return Err(EnvelopeError::MissingTimestamp);
        }

        let mut object = object.clone();
        // Some producers send numeric epoch timestamps
        if let Some(ts) = object.get("timestamp")
            && !ts.is_string()
        {
            let ts = ts.to_string();
            object.insert("timestamp".to_string(), Value::String(ts));
        }

        Ok(serde_json::from_value(Value::Object(object))?)
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Field lookup in `data`.
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Field lookup in `data` rendered as a string id (numbers are stringified).
    pub fn data_id(&self, key: &str) -> Option<String> {
        self.data_field(key).and_then(value_as_id)
    }

    /// Heartbeat payload (`ping` / `pong`), read from the top level or from `data`.
    pub fn heartbeat_message(&self) -> Option<&str> {
        self.extra
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| self.data_field("message").and_then(Value::as_str))
    }

    /// Parsed envelope timestamp.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&Value::String(self.timestamp.clone()))
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn is_present_string(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::String(s)) if !s.is_empty())
}

/// Current time in the ISO-8601 form the server emits.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render a JSON id (string or number) as a string.
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a version/timestamp marker.
///
/// Accepts RFC 3339 strings, naive ISO-8601 strings (treated as UTC, which is
/// what Python's `isoformat()` produces), and epoch milliseconds as a number
/// or numeric string.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }
            s.parse::<i64>().ok().and_then(from_epoch_millis)
        }
        Value::Number(n) => n.as_i64().and_then(from_epoch_millis),
        _ => None,
    }
}

fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_frame() {
        let env = Envelope::parse(
            r#"{"type":"task_created","timestamp":"2024-05-01T10:00:00Z","data":{"task_id":1},"roomId":"project:42"}"#,
        )
        .unwrap();
        assert_eq!(env.message_type, MessageType::TaskCreated);
        assert_eq!(env.room_id.as_deref(), Some("project:42"));
        assert_eq!(env.data_id("task_id").as_deref(), Some("1"));
        assert!(env.extra.is_empty());
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        assert!(matches!(
            Envelope::parse(r#"{"timestamp":"2024-05-01T10:00:00Z"}"#),
            Err(EnvelopeError::MissingType)
        ));
        assert!(matches!(
            Envelope::parse(r#"{"type":"task_created"}"#),
            Err(EnvelopeError::MissingTimestamp)
        ));
        assert!(matches!(
            Envelope::parse(r#"{"type":"","timestamp":"x"}"#),
            Err(EnvelopeError::MissingType)
        ));
        assert!(matches!(
            Envelope::parse("[1,2]"),
            Err(EnvelopeError::NotAnObject)
        ));
        assert!(matches!(
            Envelope::parse("not json"),
            Err(EnvelopeError::Json(_))
        ));
    }

    #[test]
    fn test_parse_keeps_top_level_extras() {
        let env =
            Envelope::parse(r#"{"type":"heartbeat","timestamp":"2024-05-01T10:00:00Z","message":"ping"}"#)
                .unwrap();
        assert_eq!(env.heartbeat_message(), Some("ping"));
        assert_eq!(env.data, Value::Null);
    }

    #[test]
    fn test_heartbeat_message_from_data() {
        let env = Envelope::new(MessageType::Heartbeat, json!({"message": "pong"}));
        assert_eq!(env.heartbeat_message(), Some("pong"));
    }

    #[test]
    fn test_numeric_timestamp_is_accepted() {
        let env = Envelope::parse(r#"{"type":"user_online","timestamp":1714557600000}"#).unwrap();
        assert_eq!(env.timestamp, "1714557600000");
        assert_eq!(
            env.timestamp_utc(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_serialize_outbound_shape() {
        let env = Envelope::new(MessageType::Other("join_room".into()), Value::Null)
            .with_extra("room_id", "project:42");
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "join_room");
        assert_eq!(value["room_id"], "project:42");
        assert!(value.get("data").is_none());
        assert!(value.get("roomId").is_none());
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2024-05-01T10:00:00Z")), Some(expected));
        assert_eq!(
            parse_timestamp(&json!("2024-05-01T12:00:00+02:00")),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!("2024-05-01T10:00:00")), Some(expected));
        assert_eq!(
            parse_timestamp(&json!("2024-05-01T10:00:00.250")),
            Some(expected + chrono::Duration::milliseconds(250))
        );
        assert_eq!(parse_timestamp(&json!(1714557600000i64)), Some(expected));
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(null)), None);
    }
}
