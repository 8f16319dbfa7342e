use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::reconcile::MutationId;

/// Unified error type for boardsync operations
#[derive(Debug, Error)]
pub enum SyncError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    // Connection errors
    #[error("Invalid server URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("A bearer credential is required to open the connection")]
    MissingCredential,

    #[error("Transport error: {0}")]
    Transport(String),

    // Protocol errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid room id '{0}': expected 'kind:id'")]
    InvalidRoomId(String),

    // Reconciliation errors
    #[error("No pending optimistic mutation with id {0}")]
    UnknownMutation(MutationId),
}

/// Result type alias for boardsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// A serializable representation of SyncError for the UI layer
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
}

impl From<&SyncError> for SerializableError {
    fn from(err: &SyncError) -> Self {
        let kind = match err {
            SyncError::Io(_) => "Io",
            SyncError::FileRead { .. } => "FileRead",
            SyncError::FileWrite { .. } => "FileWrite",
            SyncError::ConfigParse(_) => "ConfigParse",
            SyncError::ConfigSerialize(_) => "ConfigSerialize",
            SyncError::NoConfigDir => "NoConfigDir",
            SyncError::InvalidUrl { .. } => "InvalidUrl",
            SyncError::MissingCredential => "MissingCredential",
            SyncError::Transport(_) => "Transport",
            SyncError::Json(_) => "Json",
            SyncError::InvalidRoomId(_) => "InvalidRoomId",
            SyncError::UnknownMutation(_) => "UnknownMutation",
        }
        .to_string();

        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl SyncError {
    /// Convert to a serializable representation for the UI layer
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializable_kind_and_message() {
        let err = SyncError::InvalidRoomId("project".to_string());
        let ser = err.to_serializable();
        assert_eq!(ser.kind, "InvalidRoomId");
        assert!(ser.message.contains("'project'"));
    }

    #[test]
    fn test_unknown_mutation_message() {
        let err = SyncError::UnknownMutation(MutationId(7));
        assert_eq!(err.to_string(), "No pending optimistic mutation with id 7");
    }
}
