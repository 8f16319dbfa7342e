//! Entity reconciliation.
//!
//! One [`EntityStore`] per [`EntityKind`] holds the client's view of tasks,
//! comments and notifications. Two kinds of change flow in:
//!
//! - **Authoritative updates** pushed by the server. They are applied only if
//!   their version (`updated_at`) is strictly newer than the stored one, and a
//!   repeat of the same `(entity, update type)` inside the duplicate window is
//!   discarded.
//! - **Optimistic mutations** made by the user before the REST call returns.
//!   They are applied immediately, never advance the version, and are either
//!   confirmed or rolled back to the pre-mutation snapshot.
//!
//! Subscribers receive an [`EntityChange`] after each visible change. The
//! store lock is released before any subscriber runs.

mod frames;
mod rest;
mod store;

pub use frames::{classify, update_from_envelope, version_of};
pub use rest::{BoxFuture, MutationFailure, RestCollaborator, RestError};
pub use store::{EntityStore, PendingMutation};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::callback_registry::{CallbackRegistry, SubscriptionId};
use crate::error::{Result, SyncError};
use crate::locks;
use crate::protocol::Envelope;

/// Kinds of entity the client keeps in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EntityKind {
    /// Board tasks
    Task,
    /// Task comments
    Comment,
    /// User notifications
    Notification,
}

impl EntityKind {
    /// Every kind, in a stable order.
    pub const ALL: [EntityKind; 3] = [EntityKind::Task, EntityKind::Comment, EntityKind::Notification];

    /// Field in a pushed snapshot holding the entity id.
    pub fn id_field(&self) -> &'static str {
        match self {
            EntityKind::Task => "task_id",
            EntityKind::Comment => "comment_id",
            EntityKind::Notification => "notification_id",
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Comment => "comment",
            EntityKind::Notification => "notification",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The client's copy of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EntityRecord {
    /// Entity id as a string
    pub id: String,
    /// Server version marker; `None` until the server has sent one
    #[ts(type = "string | null")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Entity fields as sent by the server
    #[ts(type = "Record<string, unknown>")]
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// An empty record.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            updated_at: None,
            fields: Map::new(),
        }
    }

    /// Field lookup.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// What a server push does to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateType {
    /// `*_created`
    Created,
    /// `*_updated`
    Updated,
    /// `task_status_changed`
    StatusChanged,
    /// `notification_read`
    Read,
    /// `*_deleted`
    Deleted,
}

/// A server-pushed change to one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthoritativeUpdate {
    /// Entity kind
    pub kind: EntityKind,
    /// Entity id
    pub entity_id: String,
    /// What happened
    pub update_type: UpdateType,
    /// Version of the pushed snapshot
    pub version: Option<DateTime<Utc>>,
    /// Pushed fields
    pub fields: Map<String, Value>,
}

/// Handle for a pending optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationId(pub u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of applying an authoritative update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The entity was new.
    Created,
    /// The entity changed.
    Updated,
    /// The entity was removed.
    Deleted,
    /// Same entity and update type inside the duplicate window.
    Duplicate,
    /// Not strictly newer than the stored version.
    Stale,
    /// `created` for an entity that is already present.
    AlreadyExists,
    /// `deleted` for an entity that is not present.
    NotFound,
}

impl ApplyOutcome {
    /// Whether the store changed.
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Created | ApplyOutcome::Updated | ApplyOutcome::Deleted
        )
    }
}

/// How an entity changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// First sighting
    Created,
    /// Fields changed
    Updated,
    /// Removed by the server
    Deleted,
    /// An optimistic mutation was undone
    RolledBack {
        /// Why the mutation failed
        reason: MutationFailure,
    },
}

/// Notification sent to entity subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChange {
    /// Entity kind
    pub kind: EntityKind,
    /// Entity id
    pub id: String,
    /// What happened
    pub change: ChangeKind,
    /// Whether the change is local and unconfirmed
    pub optimistic: bool,
    /// State after the change; `None` once the entity is gone
    pub record: Option<EntityRecord>,
}

impl EntityChange {
    fn server(kind: EntityKind, change: ChangeKind, record: EntityRecord) -> Self {
        let gone = change == ChangeKind::Deleted;
        Self {
            kind,
            id: record.id.clone(),
            change,
            optimistic: false,
            record: (!gone).then_some(record),
        }
    }

    fn optimistic(kind: EntityKind, change: ChangeKind, record: EntityRecord) -> Self {
        Self {
            kind,
            id: record.id.clone(),
            change,
            optimistic: true,
            record: Some(record),
        }
    }

    fn rolled_back(
        kind: EntityKind,
        reason: MutationFailure,
        record: EntityRecord,
        removed: bool,
    ) -> Self {
        Self {
            kind,
            id: record.id.clone(),
            change: ChangeKind::RolledBack { reason },
            optimistic: false,
            record: (!removed).then_some(record),
        }
    }
}

/// Callback receiving entity changes.
pub type ChangeCallback = Arc<dyn Fn(&EntityChange) + Send + Sync>;

/// All entity stores plus their subscribers.
pub struct ReconcileEngine {
    stores: RwLock<HashMap<EntityKind, EntityStore>>,
    subscribers: CallbackRegistry<EntityChange>,
    next_mutation: AtomicU64,
    duplicate_window: Duration,
}

impl ReconcileEngine {
    /// Create empty stores using the given duplicate window.
    pub fn new(duplicate_window: Duration) -> Self {
        let stores = EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, EntityStore::new(kind, duplicate_window)))
            .collect();
        Self {
            stores: RwLock::new(stores),
            subscribers: CallbackRegistry::new(),
            next_mutation: AtomicU64::new(1),
            duplicate_window,
        }
    }

    fn with_store<T>(&self, kind: EntityKind, f: impl FnOnce(&mut EntityStore) -> T) -> T {
        let mut stores = locks::write(&self.stores);
        let store = stores
            .entry(kind)
            .or_insert_with(|| EntityStore::new(kind, self.duplicate_window));
        f(store)
    }

    fn notify(&self, change: Option<EntityChange>) {
        if let Some(change) = change {
            self.subscribers.emit(&change);
        }
    }

    /// Merge a server-pushed change.
    pub fn apply_authoritative(&self, update: &AuthoritativeUpdate, now: Instant) -> ApplyOutcome {
        let (outcome, change) = self.with_store(update.kind, |store| {
            store.apply_authoritative(update, now)
        });
        log::debug!(
            "[Reconcile] {:?} {} {} -> {:?}",
            update.update_type,
            update.kind,
            update.entity_id,
            outcome
        );
        self.notify(change);
        outcome
    }

    /// Map a domain frame to an update and apply it.
    ///
    /// Returns `None` when the frame does not concern an entity store.
    pub fn apply_frame(&self, envelope: &Envelope, now: Instant) -> Option<ApplyOutcome> {
        let update = update_from_envelope(envelope)?;
        Some(self.apply_authoritative(&update, now))
    }

    /// Seed a store from REST snapshots. Snapshots without an id are skipped.
    pub fn load(&self, kind: EntityKind, snapshots: &[Value]) -> usize {
        let mut changes = Vec::new();
        self.with_store(kind, |store| {
            for snapshot in snapshots {
                let Some((id, fields)) = split_snapshot(kind, snapshot) else {
                    log::warn!("[Reconcile] {} snapshot without id, skipping", kind);
                    continue;
                };
                let (_, change) = store.load(&id, version_of(&fields), &fields);
                changes.extend(change);
            }
        });
        let loaded = changes.len();
        for change in changes {
            self.subscribers.emit(&change);
        }
        loaded
    }

    /// Apply a local change immediately. The returned id confirms or rolls it back.
    pub fn apply_optimistic(
        &self,
        kind: EntityKind,
        entity_id: &str,
        fields: &Map<String, Value>,
        now: Instant,
    ) -> MutationId {
        let id = MutationId(self.next_mutation.fetch_add(1, Ordering::SeqCst));
        let change = self.with_store(kind, |store| {
            store.apply_optimistic(id, entity_id, fields, now)
        });
        log::debug!("[Reconcile] Optimistic {} on {} {}", id, kind, entity_id);
        self.notify(Some(change));
        id
    }

    /// The server accepted a mutation.
    pub fn confirm(&self, id: MutationId) -> Result<()> {
        let confirmed = locks::write(&self.stores)
            .values_mut()
            .find_map(|store| store.confirm(id));
        match confirmed {
            Some(_) => {
                log::debug!("[Reconcile] Mutation {} confirmed", id);
                Ok(())
            }
            None => Err(SyncError::UnknownMutation(id)),
        }
    }

    /// The server rejected a mutation: restore the pre-mutation state.
    pub fn rollback(&self, id: MutationId, reason: MutationFailure) -> Result<()> {
        let change = locks::write(&self.stores)
            .values_mut()
            .find_map(|store| store.rollback(id, reason.clone()));
        match change {
            Some(change) => {
                log::info!("[Reconcile] Mutation {} rolled back: {}", id, reason);
                self.notify(Some(change));
                Ok(())
            }
            None => Err(SyncError::UnknownMutation(id)),
        }
    }

    /// Remove an entity locally (confirmed delete or discarded placeholder).
    pub fn remove_local(&self, kind: EntityKind, id: &str) -> bool {
        let change = self.with_store(kind, |store| store.remove_local(id));
        let removed = change.is_some();
        self.notify(change);
        removed
    }

    /// Whether a mutation is still pending.
    pub fn is_pending(&self, id: MutationId) -> bool {
        locks::read(&self.stores)
            .values()
            .any(|store| store.has_pending(id))
    }

    /// Snapshot of one entity.
    pub fn get(&self, kind: EntityKind, id: &str) -> Option<EntityRecord> {
        locks::read(&self.stores)
            .get(&kind)
            .and_then(|store| store.get(id).cloned())
    }

    /// Snapshots of every entity of a kind.
    pub fn entities(&self, kind: EntityKind) -> Vec<EntityRecord> {
        locks::read(&self.stores)
            .get(&kind)
            .map(|store| store.records().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscribe to changes of one kind.
    pub fn subscribe(&self, kind: EntityKind, callback: ChangeCallback) -> SubscriptionId {
        self.subscribers.subscribe(Arc::new(move |change: &EntityChange| {
            if change.kind == kind {
                callback(change);
            }
        }))
    }

    /// Subscribe to changes of every kind.
    pub fn subscribe_all(&self, callback: ChangeCallback) -> SubscriptionId {
        self.subscribers.subscribe(callback)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }
}

impl std::fmt::Debug for ReconcileEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileEngine")
            .field("subscribers", &self.subscribers.subscriber_count())
            .finish()
    }
}

/// Split a REST snapshot into its id and fields.
pub fn split_snapshot(kind: EntityKind, snapshot: &Value) -> Option<(String, Map<String, Value>)> {
    let fields = snapshot.as_object()?.clone();
    let id = fields
        .get(kind.id_field())
        .or_else(|| fields.get("id"))
        .and_then(crate::protocol::value_as_id)?;
    Some((id, fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn engine() -> ReconcileEngine {
        ReconcileEngine::new(Duration::from_millis(100))
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn frame(raw: &str) -> Envelope {
        Envelope::parse(raw).unwrap()
    }

    #[test]
    fn test_subscribers_filtered_by_kind() {
        let engine = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let tasks = Arc::clone(&seen);
        engine.subscribe(
            EntityKind::Task,
            Arc::new(move |c| tasks.lock().unwrap().push(c.id.clone())),
        );

        let now = Instant::now();
        engine.apply_frame(
            &frame(r#"{"type":"task_created","timestamp":"2024-05-01T10:00:00Z","data":{"task_id":1}}"#),
            now,
        );
        engine.apply_frame(
            &frame(r#"{"type":"comment_created","timestamp":"2024-05-01T10:00:00Z","data":{"comment_id":9}}"#),
            now,
        );

        assert_eq!(*seen.lock().unwrap(), vec!["1"]);
        assert!(engine.get(EntityKind::Comment, "9").is_some());
    }

    #[test]
    fn test_confirm_and_rollback_unknown_ids() {
        let engine = engine();
        let id = engine.apply_optimistic(
            EntityKind::Task,
            "1",
            &fields(json!({"title": "draft"})),
            Instant::now(),
        );
        assert!(engine.is_pending(id));
        engine.confirm(id).unwrap();
        assert!(!engine.is_pending(id));

        assert!(matches!(
            engine.confirm(id),
            Err(SyncError::UnknownMutation(_))
        ));
        assert!(matches!(
            engine.rollback(id, MutationFailure::Conflict),
            Err(SyncError::UnknownMutation(_))
        ));
    }

    #[test]
    fn test_rollback_notifies_with_reason() {
        let engine = engine();
        let now = Instant::now();
        engine.apply_frame(
            &frame(r#"{"type":"task_created","timestamp":"2024-05-01T10:00:00Z","data":{"task_id":1,"status":"todo"}}"#),
            now,
        );

        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        engine.subscribe_all(Arc::new(move |c| sink.lock().unwrap().push(c.clone())));

        let id = engine.apply_optimistic(EntityKind::Task, "1", &fields(json!({"status": "done"})), now);
        engine.rollback(id, MutationFailure::PermissionDenied).unwrap();

        let changes = changes.lock().unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes[0].optimistic);
        assert_eq!(
            changes[1].change,
            ChangeKind::RolledBack {
                reason: MutationFailure::PermissionDenied
            }
        );
        assert_eq!(changes[1].record.as_ref().unwrap().fields["status"], "todo");
    }

    #[test]
    fn test_subscriber_can_reenter_engine() {
        let engine = Arc::new(engine());
        let inner = Arc::clone(&engine);
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        engine.subscribe(
            EntityKind::Task,
            Arc::new(move |c| {
                *sink.lock().unwrap() = inner.get(EntityKind::Task, &c.id);
            }),
        );

        engine.apply_optimistic(EntityKind::Task, "1", &fields(json!({"title": "x"})), Instant::now());
        assert_eq!(seen.lock().unwrap().as_ref().unwrap().fields["title"], "x");
    }

    #[test]
    fn test_load_uses_recency_rule() {
        let engine = engine();
        let loaded = engine.load(
            EntityKind::Task,
            &[
                json!({"task_id": 1, "title": "a", "updated_at": "2024-05-01T10:00:00Z"}),
                json!({"title": "no id"}),
            ],
        );
        assert_eq!(loaded, 1);

        let loaded = engine.load(
            EntityKind::Task,
            &[json!({"task_id": 1, "title": "old", "updated_at": "2024-05-01T09:00:00Z"})],
        );
        assert_eq!(loaded, 0);
        assert_eq!(engine.get(EntityKind::Task, "1").unwrap().fields["title"], "a");
    }

    #[test]
    fn test_entities_snapshot() {
        let engine = engine();
        let now = Instant::now();
        for id in 1..=3 {
            engine.apply_optimistic(EntityKind::Notification, &id.to_string(), &fields(json!({})), now);
        }
        let ids: Vec<String> = engine
            .entities(EntityKind::Notification)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
