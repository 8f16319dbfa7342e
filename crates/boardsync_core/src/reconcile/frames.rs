//! Mapping from inbound domain frames to authoritative updates.

use serde_json::{Map, Value};

use super::{AuthoritativeUpdate, EntityKind, UpdateType};
use crate::protocol::{Envelope, MessageType, parse_timestamp};

/// Which entity and change a message type carries, if any.
pub fn classify(message_type: &MessageType) -> Option<(EntityKind, UpdateType)> {
    let mapped = match message_type {
        MessageType::TaskCreated => (EntityKind::Task, UpdateType::Created),
        MessageType::TaskUpdated => (EntityKind::Task, UpdateType::Updated),
        MessageType::TaskStatusChanged => (EntityKind::Task, UpdateType::StatusChanged),
        MessageType::TaskDeleted => (EntityKind::Task, UpdateType::Deleted),
        MessageType::CommentCreated => (EntityKind::Comment, UpdateType::Created),
        MessageType::CommentUpdated => (EntityKind::Comment, UpdateType::Updated),
        MessageType::CommentDeleted => (EntityKind::Comment, UpdateType::Deleted),
        MessageType::NotificationNew => (EntityKind::Notification, UpdateType::Created),
        MessageType::NotificationRead => (EntityKind::Notification, UpdateType::Read),
        MessageType::NotificationDeleted => (EntityKind::Notification, UpdateType::Deleted),
        _ => return None,
    };
    Some(mapped)
}

/// Build the authoritative update a domain frame carries.
///
/// Returns `None` for frames that do not touch an entity store, and logs
/// frames that should but have no usable id.
pub fn update_from_envelope(envelope: &Envelope) -> Option<AuthoritativeUpdate> {
    let (kind, update_type) = classify(&envelope.message_type)?;

    let Some(entity_id) = envelope
        .data_id(kind.id_field())
        .or_else(|| envelope.data_id("id"))
    else {
        log::warn!(
            "[Reconcile] '{}' frame without '{}', ignoring",
            envelope.message_type,
            kind.id_field()
        );
        return None;
    };

    let mut fields = match &envelope.data {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if update_type == UpdateType::Read {
        fields.insert("is_read".to_string(), Value::Bool(true));
    }

    let version = version_of(&fields).or_else(|| envelope.timestamp_utc());

    Some(AuthoritativeUpdate {
        kind,
        entity_id,
        update_type,
        version,
        fields,
    })
}

/// The version marker carried by an entity snapshot.
pub fn version_of(fields: &Map<String, Value>) -> Option<chrono::DateTime<chrono::Utc>> {
    fields
        .get("updated_at")
        .or_else(|| fields.get("updatedAt"))
        .and_then(parse_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn envelope(raw: &str) -> Envelope {
        Envelope::parse(raw).unwrap()
    }

    #[test]
    fn test_task_update_uses_updated_at() {
        let env = envelope(
            r#"{"type":"task_updated","timestamp":"2024-05-01T10:00:05Z",
                "data":{"task_id":12,"project_id":3,"title":"x","updated_at":"2024-05-01T10:00:00"}}"#,
        );
        let update = update_from_envelope(&env).unwrap();
        assert_eq!(update.kind, EntityKind::Task);
        assert_eq!(update.entity_id, "12");
        assert_eq!(update.update_type, UpdateType::Updated);
        assert_eq!(
            update.version,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(update.fields["title"], "x");
    }

    #[test]
    fn test_missing_version_falls_back_to_envelope_timestamp() {
        let env = envelope(
            r#"{"type":"task_status_changed","timestamp":"2024-05-01T10:00:05Z","data":{"task_id":12,"status":"done"}}"#,
        );
        let update = update_from_envelope(&env).unwrap();
        assert_eq!(update.update_type, UpdateType::StatusChanged);
        assert_eq!(
            update.version,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 5).unwrap())
        );
    }

    #[test]
    fn test_comment_id_wins_over_task_id() {
        let env = envelope(
            r#"{"type":"comment_created","timestamp":"t","data":{"comment_id":5,"task_id":12,"content":"hi","updatedAt":1714557600000}}"#,
        );
        let update = update_from_envelope(&env).unwrap();
        assert_eq!(update.kind, EntityKind::Comment);
        assert_eq!(update.entity_id, "5");
        assert!(update.version.is_some());
    }

    #[test]
    fn test_notification_read_marks_read() {
        let env = envelope(r#"{"type":"notification_read","timestamp":"t","data":{"id":"n-1"}}"#);
        let update = update_from_envelope(&env).unwrap();
        assert_eq!(update.kind, EntityKind::Notification);
        assert_eq!(update.entity_id, "n-1");
        assert_eq!(update.fields["is_read"], true);
    }

    #[test]
    fn test_non_entity_frames_are_ignored() {
        let env = envelope(r#"{"type":"user_online","timestamp":"t","data":{"user_id":1}}"#);
        assert!(update_from_envelope(&env).is_none());

        let env = envelope(r#"{"type":"task_updated","timestamp":"t","data":{"title":"no id"}}"#);
        assert!(update_from_envelope(&env).is_none());
    }
}
