//! Per-kind entity store with optimistic mutation bookkeeping.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::{
    ApplyOutcome, AuthoritativeUpdate, ChangeKind, EntityChange, EntityKind, EntityRecord,
    MutationFailure, MutationId, UpdateType,
};

/// A change applied locally before the server confirmed it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
    /// Mutation handle
    pub id: MutationId,
    /// Entity the mutation touched
    pub entity_id: String,
    /// Optimistic values of the fields this mutation is responsible for
    pub values: Map<String, Value>,
    /// Entity state before the first unconfirmed edit (`None` if it did not exist)
    pub previous: Option<EntityRecord>,
    /// When the mutation was applied
    pub applied_at: Instant,
}

/// Records of one entity kind, plus their pending optimistic mutations.
#[derive(Debug, Clone)]
pub struct EntityStore {
    kind: EntityKind,
    duplicate_window: Duration,
    records: IndexMap<String, EntityRecord>,
    pending: IndexMap<MutationId, PendingMutation>,
    last_applied: HashMap<(String, UpdateType), Instant>,
}

impl EntityStore {
    /// Create an empty store.
    pub fn new(kind: EntityKind, duplicate_window: Duration) -> Self {
        Self {
            kind,
            duplicate_window,
            records: IndexMap::new(),
            pending: IndexMap::new(),
            last_applied: HashMap::new(),
        }
    }

    /// Entity kind held by this store.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Snapshot of one record.
    pub fn get(&self, id: &str) -> Option<&EntityRecord> {
        self.records.get(id)
    }

    /// All records in first-seen order.
    pub fn records(&self) -> impl Iterator<Item = &EntityRecord> {
        self.records.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether a mutation is still pending.
    pub fn has_pending(&self, id: MutationId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Entries currently held for duplicate suppression.
    pub fn tracked_duplicates(&self) -> usize {
        self.last_applied.len()
    }

    /// Pending mutation count.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Merge a server-pushed change.
    pub fn apply_authoritative(
        &mut self,
        update: &AuthoritativeUpdate,
        now: Instant,
    ) -> (ApplyOutcome, Option<EntityChange>) {
        let key = (update.entity_id.clone(), update.update_type);
        if !self.duplicate_window.is_zero()
            && let Some(at) = self.last_applied.get(&key)
            && now.saturating_duration_since(*at) < self.duplicate_window
        {
            log::trace!(
                "[Reconcile] Duplicate {:?} for {} {} suppressed",
                update.update_type,
                self.kind,
                update.entity_id
            );
            return (ApplyOutcome::Duplicate, None);
        }

        let (outcome, change) = match update.update_type {
            UpdateType::Deleted => self.delete(&update.entity_id),
            UpdateType::Created if self.records.contains_key(&update.entity_id) => {
                log::trace!(
                    "[Reconcile] {} {} already exists, ignoring create",
                    self.kind,
                    update.entity_id
                );
                self.confirm_matching(&update.entity_id, &update.fields);
                (ApplyOutcome::AlreadyExists, None)
            }
            _ => self.merge(&update.entity_id, update.version, &update.fields),
        };

        if outcome.is_applied() && !self.duplicate_window.is_zero() {
            let window = self.duplicate_window;
            self.last_applied
                .retain(|_, at| now.saturating_duration_since(*at) < window);
            self.last_applied.insert(key, now);
        }
        (outcome, change)
    }

    /// Seed a record from a REST listing: recency applies, duplicates do not.
    pub fn load(
        &mut self,
        id: &str,
        version: Option<DateTime<Utc>>,
        fields: &Map<String, Value>,
    ) -> (ApplyOutcome, Option<EntityChange>) {
        self.merge(id, version, fields)
    }

    fn merge(
        &mut self,
        id: &str,
        version: Option<DateTime<Utc>>,
        fields: &Map<String, Value>,
    ) -> (ApplyOutcome, Option<EntityChange>) {
        let created = match self.records.get(id) {
            None => true,
            Some(existing) => {
                if !is_newer(version, existing.updated_at) {
                    log::trace!(
                        "[Reconcile] Stale update for {} {} ({:?} <= {:?})",
                        self.kind,
                        id,
                        version,
                        existing.updated_at
                    );
                    return (ApplyOutcome::Stale, None);
                }
                false
            }
        };

        let record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| EntityRecord::new(id));
        record.updated_at = version;
        for (key, value) in fields {
            record.fields.insert(key.clone(), value.clone());
        }

        // Pending rollbacks must land on server truth, not on the state
        // before this push
        for mutation in self.pending.values_mut() {
            if mutation.entity_id != id {
                continue;
            }
            let previous = mutation
                .previous
                .get_or_insert_with(|| EntityRecord::new(id));
            previous.updated_at = version;
            for (key, value) in fields {
                previous.fields.insert(key.clone(), value.clone());
            }
        }
        self.confirm_matching(id, fields);
        let snapshot = self.reapply_pending(id);

        let (outcome, change) = if created {
            (ApplyOutcome::Created, ChangeKind::Created)
        } else {
            (ApplyOutcome::Updated, ChangeKind::Updated)
        };
        (
            outcome,
            Some(EntityChange::server(self.kind, change, snapshot)),
        )
    }

    fn delete(&mut self, id: &str) -> (ApplyOutcome, Option<EntityChange>) {
        self.forget(id);
        match self.records.shift_remove(id) {
            Some(record) => (
                ApplyOutcome::Deleted,
                Some(EntityChange::server(self.kind, ChangeKind::Deleted, record)),
            ),
            None => (ApplyOutcome::NotFound, None),
        }
    }

    /// Drop the pending mutations and duplicate markers of an entity.
    fn forget(&mut self, id: &str) {
        self.pending.retain(|_, mutation| mutation.entity_id != id);
        self.last_applied.retain(|(entity_id, _), _| entity_id != id);
    }

    /// Pending mutations whose every value was echoed by the server are done.
    fn confirm_matching(&mut self, id: &str, fields: &Map<String, Value>) {
        self.pending.retain(|mutation_id, mutation| {
            let confirmed = mutation.entity_id == id
                && mutation
                    .values
                    .iter()
                    .all(|(key, value)| fields.get(key) == Some(value));
            if confirmed {
                log::debug!("[Reconcile] Mutation {} confirmed by server push", mutation_id);
            }
            !confirmed
        });
    }

    /// Lay still-pending optimistic values back over a record after a push.
    fn reapply_pending(&mut self, id: &str) -> EntityRecord {
        let record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| EntityRecord::new(id));
        for mutation in self.pending.values().filter(|m| m.entity_id == id) {
            for (key, value) in &mutation.values {
                record.fields.insert(key.clone(), value.clone());
            }
        }
        record.clone()
    }

    /// Apply a local change immediately and remember how to undo it.
    ///
    /// A pending mutation on any of the same fields is superseded: its id
    /// becomes unknown and its fields are folded into the new mutation. Each
    /// folded field keeps the pre-mutation value from the snapshot of the
    /// mutation that owned it.
    pub fn apply_optimistic(
        &mut self,
        id: MutationId,
        entity_id: &str,
        fields: &Map<String, Value>,
        now: Instant,
    ) -> EntityChange {
        let mut values = Map::new();
        let mut previous = self.records.get(entity_id).cloned();

        let superseded: Vec<MutationId> = self
            .pending
            .values()
            .filter(|m| m.entity_id == entity_id && m.values.keys().any(|f| fields.contains_key(f)))
            .map(|m| m.id)
            .collect();
        for old_id in superseded {
            let Some(old) = self.pending.shift_remove(&old_id) else {
                continue;
            };
            log::debug!("[Reconcile] Mutation {} superseded by {}", old_id, id);
            match old.previous {
                // The entity only exists because of an unconfirmed create
                None => previous = None,
                Some(owned) => {
                    if let Some(snapshot) = previous.as_mut() {
                        restore_fields(snapshot, &owned, old.values.keys());
                    }
                }
            }
            values.extend(old.values);
        }
        for (key, value) in fields {
            values.insert(key.clone(), value.clone());
        }

        let existed = self.records.contains_key(entity_id);
        let record = self
            .records
            .entry(entity_id.to_string())
            .or_insert_with(|| EntityRecord::new(entity_id));
        for (key, value) in fields {
            record.fields.insert(key.clone(), value.clone());
        }
        let snapshot = record.clone();

        self.pending.insert(
            id,
            PendingMutation {
                id,
                entity_id: entity_id.to_string(),
                values,
                previous,
                applied_at: now,
            },
        );

        let change = if existed {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };
        EntityChange::optimistic(self.kind, change, snapshot)
    }

    /// Remove a record after the server confirmed a local delete, or to drop
    /// a placeholder created under a temporary id.
    pub fn remove_local(&mut self, id: &str) -> Option<EntityChange> {
        self.forget(id);
        let record = self.records.shift_remove(id)?;
        Some(EntityChange::server(self.kind, ChangeKind::Deleted, record))
    }

    /// Forget a pending mutation after the server accepted it.
    pub fn confirm(&mut self, id: MutationId) -> Option<PendingMutation> {
        self.pending.shift_remove(&id)
    }

    /// Undo a pending mutation.
    ///
    /// The fields it owns go back to their pre-mutation values; if the entity
    /// did not exist before, it is removed.
    pub fn rollback(&mut self, id: MutationId, reason: MutationFailure) -> Option<EntityChange> {
        let mutation = self.pending.shift_remove(&id)?;
        let entity_id = mutation.entity_id.as_str();

        let Some(previous) = mutation.previous else {
            self.pending.retain(|_, m| m.entity_id != entity_id);
            let record = self
                .records
                .shift_remove(entity_id)
                .unwrap_or_else(|| EntityRecord::new(entity_id));
            return Some(EntityChange::rolled_back(self.kind, reason, record, true));
        };

        let record = self
            .records
            .entry(entity_id.to_string())
            .or_insert_with(|| EntityRecord::new(entity_id));
        restore_fields(record, &previous, mutation.values.keys());
        record.updated_at = previous.updated_at.max(record.updated_at);
        Some(EntityChange::rolled_back(
            self.kind,
            reason,
            record.clone(),
            false,
        ))
    }
}

/// Copy `fields` from `source` into `target`, removing those `source` lacks.
fn restore_fields<'a>(
    target: &mut EntityRecord,
    source: &EntityRecord,
    fields: impl Iterator<Item = &'a String>,
) {
    for field in fields {
        match source.fields.get(field) {
            Some(value) => {
                target.fields.insert(field.clone(), value.clone());
            }
            None => {
                target.fields.remove(field);
            }
        }
    }
}

/// Strictly-newer rule. A record without a version accepts anything; an
/// update without a version never beats a versioned record.
fn is_newer(incoming: Option<DateTime<Utc>>, stored: Option<DateTime<Utc>>) -> bool {
    match (incoming, stored) {
        (_, None) => true,
        (Some(incoming), Some(stored)) => incoming > stored,
        (None, Some(_)) => false,
    }
}
