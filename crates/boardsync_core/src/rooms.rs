//! Room identifiers and the subscription tracker.
//!
//! A room is a logical topic multiplexed over the single socket, named
//! `kind:id` (`project:42`, `user:7`). The [`RoomTracker`] remembers which
//! rooms the caller asked for so that every (re)connect can replay them.
//!
//! Membership is not reference counted: if two views join `project:42` and
//! one of them leaves, the room is left for both.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::SyncError;

/// Kind prefix of a room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKind {
    /// Personal room for a user (`user:<id>`)
    User,
    /// All members of a project (`project:<id>`)
    Project,
    /// All members of a workspace (`workspace:<id>`)
    Workspace,
    /// Watchers of a single task (`task:<id>`)
    Task,
    /// A kind this client does not know about, kept verbatim
    Other(String),
}

impl RoomKind {
    /// Prefix used on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            RoomKind::User => "user",
            RoomKind::Project => "project",
            RoomKind::Workspace => "workspace",
            RoomKind::Task => "task",
            RoomKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for RoomKind {
    fn from(kind: &str) -> Self {
        match kind {
            "user" => RoomKind::User,
            "project" => RoomKind::Project,
            "workspace" => RoomKind::Workspace,
            "task" => RoomKind::Task,
            other => RoomKind::Other(other.to_string()),
        }
    }
}

/// A validated room identifier of the form `kind:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(try_from = "String", into = "String")]
#[ts(export, export_to = "bindings/")]
pub struct RoomId(String);

impl RoomId {
    /// Build a room id from a kind and an entity id.
    pub fn new(kind: RoomKind, id: impl fmt::Display) -> Self {
        RoomId(format!("{}:{}", kind.as_str(), id))
    }

    /// `user:<id>`
    pub fn user(id: impl fmt::Display) -> Self {
        Self::new(RoomKind::User, id)
    }

    /// `project:<id>`
    pub fn project(id: impl fmt::Display) -> Self {
        Self::new(RoomKind::Project, id)
    }

    /// `workspace:<id>`
    pub fn workspace(id: impl fmt::Display) -> Self {
        Self::new(RoomKind::Workspace, id)
    }

    /// `task:<id>`
    pub fn task(id: impl fmt::Display) -> Self {
        Self::new(RoomKind::Task, id)
    }

    /// Parse `kind:id`. Both halves must be non-empty.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        match raw.split_once(':') {
            Some((kind, id)) if !kind.trim().is_empty() && !id.trim().is_empty() => {
                Ok(RoomId(raw.to_string()))
            }
            _ => Err(SyncError::InvalidRoomId(raw.to_string())),
        }
    }

    /// The kind prefix.
    pub fn kind(&self) -> RoomKind {
        RoomKind::from(self.split().0)
    }

    /// The part after the first colon.
    pub fn entity_id(&self) -> &str {
        self.split().1
    }

    /// The full `kind:id` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(&self) -> (&str, &str) {
        self.0.split_once(':').unwrap_or((self.0.as_str(), ""))
    }
}

impl FromStr for RoomId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomId::parse(s)
    }
}

impl TryFrom<String> for RoomId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RoomId::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, idempotent set of joined rooms.
#[derive(Debug, Clone, Default)]
pub struct RoomTracker {
    rooms: IndexSet<RoomId>,
}

impl RoomTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a room. Returns `false` if it was already tracked.
    pub fn join(&mut self, room: RoomId) -> bool {
        let added = self.rooms.insert(room);
        if !added {
            log::trace!("[Rooms] Already tracking room");
        }
        added
    }

    /// Forget a room. Returns `false` if it was not tracked.
    pub fn leave(&mut self, room: &RoomId) -> bool {
        self.rooms.shift_remove(room)
    }

    /// Whether a room is tracked.
    pub fn contains(&self, room: &RoomId) -> bool {
        self.rooms.contains(room)
    }

    /// Rooms to re-join after a (re)connect, in join order.
    pub fn replay(&self) -> Vec<RoomId> {
        self.rooms.iter().cloned().collect()
    }

    /// Number of tracked rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room is tracked.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Forget every room.
    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_room_id() {
        let room = RoomId::parse("project:42").unwrap();
        assert_eq!(room.kind(), RoomKind::Project);
        assert_eq!(room.entity_id(), "42");
        assert_eq!(room, RoomId::project(42));

        let custom: RoomId = "board:a:b".parse().unwrap();
        assert_eq!(custom.kind(), RoomKind::Other("board".to_string()));
        assert_eq!(custom.entity_id(), "a:b");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in ["project", ":42", "project:", "", " : "] {
            assert!(
                matches!(RoomId::parse(raw), Err(SyncError::InvalidRoomId(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_room_id_serde_is_plain_string() {
        let room = RoomId::user(7);
        assert_eq!(serde_json::to_string(&room).unwrap(), r#""user:7""#);
        let back: RoomId = serde_json::from_str(r#""task:9""#).unwrap();
        assert_eq!(back, RoomId::task(9));
        assert!(serde_json::from_str::<RoomId>(r#""nocolon""#).is_err());
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut tracker = RoomTracker::new();
        assert!(tracker.join(RoomId::project(1)));
        assert!(!tracker.join(RoomId::project(1)));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_leave_is_last_wins() {
        let mut tracker = RoomTracker::new();
        tracker.join(RoomId::project(1));
        tracker.join(RoomId::project(1));
        assert!(tracker.leave(&RoomId::project(1)));
        assert!(!tracker.contains(&RoomId::project(1)));
        assert!(!tracker.leave(&RoomId::project(1)));
    }

    #[test]
    fn test_replay_keeps_join_order() {
        let mut tracker = RoomTracker::new();
        tracker.join(RoomId::user(7));
        tracker.join(RoomId::project(42));
        tracker.join(RoomId::workspace(3));
        tracker.leave(&RoomId::project(42));
        tracker.join(RoomId::task(5));

        assert_eq!(
            tracker.replay(),
            vec![RoomId::user(7), RoomId::workspace(3), RoomId::task(5)]
        );
    }
}
