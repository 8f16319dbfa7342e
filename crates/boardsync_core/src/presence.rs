//! Ephemeral presence state: who is online and who is typing where.
//!
//! Remote state is fed by `user_online` / `user_offline` and
//! `user_typing` / `user_stop_typing` frames. Local typing keeps a deadline per
//! project so an indicator the user forgot to stop is withdrawn automatically.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};

/// Online users and remote typing indicators.
#[derive(Debug, Clone, Default)]
pub struct PresenceState {
    online: IndexSet<String>,
    typing: IndexMap<String, IndexSet<String>>,
}

impl PresenceState {
    /// Create empty presence state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user online. Returns `false` if they already were.
    pub fn user_online(&mut self, user_id: &str) -> bool {
        self.online.insert(user_id.to_string())
    }

    /// Mark a user offline. Returns `false` if they were not online.
    pub fn user_offline(&mut self, user_id: &str) -> bool {
        self.online.shift_remove(user_id)
    }

    /// Whether a user is currently online.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    /// Online users in the order they came online.
    pub fn online_users(&self) -> Vec<String> {
        self.online.iter().cloned().collect()
    }

    /// Record that a user is typing in a project.
    pub fn typing_started(&mut self, project_id: &str, user_id: &str) -> bool {
        self.typing
            .entry(project_id.to_string())
            .or_default()
            .insert(user_id.to_string())
    }

    /// Record that a user stopped typing in a project.
    pub fn typing_stopped(&mut self, project_id: &str, user_id: &str) -> bool {
        let Some(users) = self.typing.get_mut(project_id) else {
            return false;
        };
        let removed = users.shift_remove(user_id);
        if users.is_empty() {
            self.typing.shift_remove(project_id);
        }
        removed
    }

    /// Users currently typing in a project.
    pub fn typing_users(&self, project_id: &str) -> Vec<String> {
        self.typing
            .get(project_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget everything. Returns `false` if there was nothing to forget.
    pub fn clear(&mut self) -> bool {
        let had_state = !self.online.is_empty() || !self.typing.is_empty();
        self.online.clear();
        self.typing.clear();
        had_state
    }
}

/// Typing indicators this client has sent and when they expire.
#[derive(Debug, Clone)]
pub struct LocalTyping {
    timeout: Duration,
    deadlines: HashMap<String, Instant>,
}

impl LocalTyping {
    /// Create a tracker that stops indicators after `timeout` without input.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadlines: HashMap::new(),
        }
    }

    /// Note a keystroke in a project. Returns `true` when a `typing` frame
    /// should be sent (the indicator was not already active). The auto-stop
    /// deadline is pushed back either way.
    pub fn start(&mut self, project_id: &str, now: Instant) -> bool {
        self.deadlines
            .insert(project_id.to_string(), now + self.timeout)
            .is_none()
    }

    /// Stop an indicator. Returns `true` when a `stop_typing` frame should be sent.
    pub fn stop(&mut self, project_id: &str) -> bool {
        self.deadlines.remove(project_id).is_some()
    }

    /// Whether an indicator is active for a project.
    pub fn is_typing(&self, project_id: &str) -> bool {
        self.deadlines.contains_key(project_id)
    }

    /// Remove and return every project whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let mut expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(project, _)| project.clone())
            .collect();
        expired.sort();
        for project in &expired {
            self.deadlines.remove(project);
        }
        expired
    }

    /// Earliest pending auto-stop.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Drop every indicator without sending anything.
    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}
