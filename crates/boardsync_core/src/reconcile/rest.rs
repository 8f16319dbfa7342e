//! The REST collaborator seam and the typed reasons a mutation can fail.
//!
//! The REST client itself lives outside this crate. [`RestCollaborator`] is
//! the shape the realtime client needs from it: one verb per operation, keyed
//! by [`EntityKind`], returning the server's JSON snapshot or a [`RestError`].
//!
//! ## Object safety
//!
//! Methods return boxed futures so the collaborator can sit behind
//! `Arc<dyn RestCollaborator>`.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use ts_rs::TS;

use super::EntityKind;

/// A boxed future for object-safe async methods.
///
/// On native targets, futures are `Send` for compatibility with multi-threaded runtimes.
#[cfg(not(target_arch = "wasm32"))]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed future for object-safe async methods.
///
/// WASM version without `Send` requirement - JavaScript is single-threaded.
#[cfg(target_arch = "wasm32")]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// A failed REST call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("HTTP {status}: {message}")]
pub struct RestError {
    /// HTTP status code (0 when the request never reached the server)
    pub status: u16,
    /// Server or transport message
    pub message: String,
}

impl RestError {
    /// Create a REST error.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Why an optimistic mutation was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, TS)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum MutationFailure {
    /// 401: the session expired; the caller should re-authenticate.
    #[error("Your session has expired. Please sign in again.")]
    AuthExpired,

    /// 403: the user may not perform this change.
    #[error("You do not have permission to make this change.")]
    PermissionDenied,

    /// 404: the entity no longer exists.
    #[error("The item no longer exists.")]
    NotFound,

    /// 409: someone else changed the entity first.
    #[error("This item was changed by someone else. Your change was reverted.")]
    Conflict,

    /// Anything else.
    #[error("The change could not be saved: {0}")]
    Generic(String),
}

impl MutationFailure {
    /// Map an HTTP status (and message) to a failure reason.
    pub fn from_status(status: u16, message: &str) -> Self {
        match status {
            401 => MutationFailure::AuthExpired,
            403 => MutationFailure::PermissionDenied,
            404 => MutationFailure::NotFound,
            409 => MutationFailure::Conflict,
            _ => MutationFailure::Generic(message.to_string()),
        }
    }
}

impl From<&RestError> for MutationFailure {
    fn from(err: &RestError) -> Self {
        MutationFailure::from_status(err.status, &err.message)
    }
}

impl From<RestError> for MutationFailure {
    fn from(err: RestError) -> Self {
        MutationFailure::from(&err)
    }
}

/// The REST backend as seen by the realtime client.
#[cfg(not(target_arch = "wasm32"))]
pub trait RestCollaborator: Send + Sync {
    /// Create an entity; returns the stored snapshot.
    fn create<'a>(
        &'a self,
        kind: EntityKind,
        fields: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, RestError>>;

    /// Patch an entity; returns the stored snapshot.
    fn update<'a>(
        &'a self,
        kind: EntityKind,
        id: &'a str,
        fields: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, RestError>>;

    /// Delete an entity.
    fn delete<'a>(&'a self, kind: EntityKind, id: &'a str) -> BoxFuture<'a, Result<(), RestError>>;

    /// List entities visible to the user.
    fn list<'a>(&'a self, kind: EntityKind) -> BoxFuture<'a, Result<Vec<Value>, RestError>>;
}

/// The REST backend as seen by the realtime client.
#[cfg(target_arch = "wasm32")]
pub trait RestCollaborator {
    /// Create an entity; returns the stored snapshot.
    fn create<'a>(
        &'a self,
        kind: EntityKind,
        fields: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, RestError>>;

    /// Patch an entity; returns the stored snapshot.
    fn update<'a>(
        &'a self,
        kind: EntityKind,
        id: &'a str,
        fields: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, RestError>>;

    /// Delete an entity.
    fn delete<'a>(&'a self, kind: EntityKind, id: &'a str) -> BoxFuture<'a, Result<(), RestError>>;

    /// List entities visible to the user.
    fn list<'a>(&'a self, kind: EntityKind) -> BoxFuture<'a, Result<Vec<Value>, RestError>>;
}
