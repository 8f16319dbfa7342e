//! Outbound control frames.
//!
//! Control frames carry their arguments at the top level of the envelope
//! (`{"type":"join_room","room_id":"project:42","timestamp":...}`), which is
//! the shape the backend expects.

use serde_json::Value;

use super::{Envelope, MessageType};

/// Payload of a heartbeat frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatKind {
    /// Liveness probe
    Ping,
    /// Answer to a probe
    Pong,
}

impl HeartbeatKind {
    /// Wire value of the `message` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatKind::Ping => "ping",
            HeartbeatKind::Pong => "pong",
        }
    }
}

/// A frame the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ControlFrame {
    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    Typing { project_id: String },
    StopTyping { project_id: String },
    Heartbeat(HeartbeatKind),
    GetRoomMembers { room_id: String },
    GetConnectionStats,
}

impl ControlFrame {
    /// Wire name of the frame.
    pub fn type_name(&self) -> &'static str {
        match self {
            ControlFrame::JoinRoom { .. } => "join_room",
            ControlFrame::LeaveRoom { .. } => "leave_room",
            ControlFrame::Typing { .. } => "typing",
            ControlFrame::StopTyping { .. } => "stop_typing",
            ControlFrame::Heartbeat(_) => "heartbeat",
            ControlFrame::GetRoomMembers { .. } => "get_room_members",
            ControlFrame::GetConnectionStats => "get_connection_stats",
        }
    }

    /// Build the envelope for this frame, stamped with the current time.
    pub fn to_envelope(&self) -> Envelope {
        let env = Envelope::new(MessageType::from(self.type_name()), Value::Null);
        match self {
            ControlFrame::JoinRoom { room_id }
            | ControlFrame::LeaveRoom { room_id }
            | ControlFrame::GetRoomMembers { room_id } => env.with_extra("room_id", room_id.as_str()),
            ControlFrame::Typing { project_id } | ControlFrame::StopTyping { project_id } => {
                env.with_extra("project_id", id_value(project_id))
            }
            ControlFrame::Heartbeat(kind) => env.with_extra("message", kind.as_str()),
            ControlFrame::GetConnectionStats => env,
        }
    }
}

/// Numeric ids go back out as JSON numbers, anything else as a string.
fn id_value(id: &str) -> Value {
    match id.parse::<i64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_value(frame: ControlFrame) -> Value {
        serde_json::from_str(&frame.to_envelope().to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_join_and_leave_frames() {
        let join = to_value(ControlFrame::JoinRoom {
            room_id: "project:42".into(),
        });
        assert_eq!(join["type"], "join_room");
        assert_eq!(join["room_id"], "project:42");

        let leave = to_value(ControlFrame::LeaveRoom {
            room_id: "user:7".into(),
        });
        assert_eq!(leave["type"], "leave_room");
        assert_eq!(leave["room_id"], "user:7");
    }

    #[test]
    fn test_typing_frame_keeps_numeric_ids() {
        let typing = to_value(ControlFrame::Typing {
            project_id: "42".into(),
        });
        assert_eq!(typing["type"], "typing");
        assert_eq!(typing["project_id"], 42);

        let stop = to_value(ControlFrame::StopTyping {
            project_id: "alpha".into(),
        });
        assert_eq!(stop["type"], "stop_typing");
        assert_eq!(stop["project_id"], "alpha");
    }

    #[test]
    fn test_heartbeat_frames() {
        let ping = to_value(ControlFrame::Heartbeat(HeartbeatKind::Ping));
        assert_eq!(ping["type"], "heartbeat");
        assert_eq!(ping["message"], "ping");

        let pong = ControlFrame::Heartbeat(HeartbeatKind::Pong).to_envelope();
        assert_eq!(pong.message_type, MessageType::Heartbeat);
        assert_eq!(pong.heartbeat_message(), Some("pong"));
    }

    #[test]
    fn test_stats_frame_has_no_arguments() {
        let stats = to_value(ControlFrame::GetConnectionStats);
        assert_eq!(stats["type"], "get_connection_stats");
        assert_eq!(stats.as_object().unwrap().len(), 2);
    }
}
