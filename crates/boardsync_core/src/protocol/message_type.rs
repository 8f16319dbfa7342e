//! Catalogue of message types exchanged with the realtime server.
//!
//! The server identifies every frame by a snake_case `type` string. Known
//! types map onto [`MessageType`] variants; anything else is preserved as
//! [`MessageType::Other`] so new server events still reach domain handlers.

use serde::{Deserialize, Serialize};

/// A message type carried in the envelope `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
#[allow(missing_docs)]
pub enum MessageType {
    // System
    ConnectionEstablished,
    RoomJoined,
    RoomLeft,
    Error,
    Heartbeat,

    // Notifications
    NotificationNew,
    NotificationRead,
    NotificationDeleted,

    // Tasks
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskStatusChanged,
    TaskAssigned,
    TaskUnassigned,
    TaskCommentAdded,

    // Comments
    CommentCreated,
    CommentUpdated,
    CommentDeleted,
    CommentMention,

    // Projects
    ProjectCreated,
    ProjectUpdated,
    ProjectDeleted,
    ProjectMemberAdded,
    ProjectMemberRemoved,
    ProjectMemberRoleChanged,
    ProjectInvitationSent,

    // Workspaces
    WorkspaceCreated,
    WorkspaceUpdated,
    WorkspaceDeleted,
    WorkspaceOrderChanged,

    // Presence
    UserOnline,
    UserOffline,
    UserTyping,
    UserStopTyping,

    /// A type this client does not know about.
    Other(String),
}

const KNOWN: &[(&str, MessageType)] = &[
    ("connection_established", MessageType::ConnectionEstablished),
    ("room_joined", MessageType::RoomJoined),
    ("room_left", MessageType::RoomLeft),
    ("error", MessageType::Error),
    ("heartbeat", MessageType::Heartbeat),
    ("notification_new", MessageType::NotificationNew),
    ("notification_read", MessageType::NotificationRead),
    ("notification_deleted", MessageType::NotificationDeleted),
    ("task_created", MessageType::TaskCreated),
    ("task_updated", MessageType::TaskUpdated),
    ("task_deleted", MessageType::TaskDeleted),
    ("task_status_changed", MessageType::TaskStatusChanged),
    ("task_assigned", MessageType::TaskAssigned),
    ("task_unassigned", MessageType::TaskUnassigned),
    ("task_comment_added", MessageType::TaskCommentAdded),
    ("comment_created", MessageType::CommentCreated),
    ("comment_updated", MessageType::CommentUpdated),
    ("comment_deleted", MessageType::CommentDeleted),
    ("comment_mention", MessageType::CommentMention),
    ("project_created", MessageType::ProjectCreated),
    ("project_updated", MessageType::ProjectUpdated),
    ("project_deleted", MessageType::ProjectDeleted),
    ("project_member_added", MessageType::ProjectMemberAdded),
    ("project_member_removed", MessageType::ProjectMemberRemoved),
    (
        "project_member_role_changed",
        MessageType::ProjectMemberRoleChanged,
    ),
    ("project_invitation_sent", MessageType::ProjectInvitationSent),
    ("workspace_created", MessageType::WorkspaceCreated),
    ("workspace_updated", MessageType::WorkspaceUpdated),
    ("workspace_deleted", MessageType::WorkspaceDeleted),
    ("workspace_order_changed", MessageType::WorkspaceOrderChanged),
    ("user_online", MessageType::UserOnline),
    ("user_offline", MessageType::UserOffline),
    ("user_typing", MessageType::UserTyping),
    ("user_stop_typing", MessageType::UserStopTyping),
];

impl MessageType {
    /// Wire name of this type.
    pub fn as_str(&self) -> &str {
        if let MessageType::Other(name) = self {
            return name;
        }
        KNOWN
            .iter()
            .find(|(_, ty)| ty == self)
            .map(|(name, _)| *name)
            .unwrap_or_default()
    }

    /// System frames are consumed by the client and never reach domain handlers.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            MessageType::ConnectionEstablished
                | MessageType::RoomJoined
                | MessageType::RoomLeft
                | MessageType::Error
                | MessageType::Heartbeat
        )
    }

    /// Frames that deserve a user-facing notification.
    pub fn should_notify(&self) -> bool {
        matches!(
            self,
            MessageType::NotificationNew
                | MessageType::TaskAssigned
                | MessageType::CommentMention
                | MessageType::ProjectMemberAdded
                | MessageType::ProjectInvitationSent
        )
    }

    /// Frames that change something a board or list view renders.
    pub fn should_update_ui(&self) -> bool {
        matches!(
            self,
            MessageType::TaskCreated
                | MessageType::TaskUpdated
                | MessageType::TaskDeleted
                | MessageType::TaskStatusChanged
                | MessageType::CommentCreated
                | MessageType::CommentUpdated
                | MessageType::CommentDeleted
                | MessageType::ProjectCreated
                | MessageType::ProjectUpdated
                | MessageType::ProjectDeleted
                | MessageType::WorkspaceCreated
                | MessageType::WorkspaceUpdated
                | MessageType::WorkspaceDeleted
        )
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        KNOWN
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, ty)| ty.clone())
            .unwrap_or_else(|| MessageType::Other(name.to_string()))
    }
}

impl From<String> for MessageType {
    fn from(name: String) -> Self {
        MessageType::from(name.as_str())
    }
}

impl From<MessageType> for String {
    fn from(ty: MessageType) -> Self {
        ty.as_str().to_string()
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
