//! The realtime client.
//!
//! [`RealtimeClient`] owns the connection, the scheduler, the room set, the
//! presence state, the router and the entity stores. It is a cheap,
//! cloneable handle: every clone drives the same client.
//!
//! The client does no IO and reads no clock. Whoever owns it (the native
//! driver, a host event loop, a test) passes in:
//!
//! - transport events via [`RealtimeClient::handle_transport_event`]
//! - the current time via [`RealtimeClient::tick`], ideally at
//!   [`RealtimeClient::next_deadline`]
//!
//! Internal locks are never held while handlers, subscribers or event
//! callbacks run, so a callback may call back into the client.
//!
//! # Example
//!
//! ```ignore
//! use boardsync_core::client::RealtimeClient;
//! use boardsync_core::config::RealtimeConfig;
//! use boardsync_core::rooms::RoomId;
//!
//! let client = RealtimeClient::new(RealtimeConfig::default(), Box::new(transport));
//! client.join(RoomId::project(42));
//! client.open("bearer-token")?;
//! ```

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::{Map, Value};

use crate::callback_registry::{CallbackRegistry, SubscriptionId};
use crate::config::RealtimeConfig;
use crate::error::Result;
use crate::locks;
use crate::presence::{LocalTyping, PresenceState};
use crate::protocol::{ControlFrame, Envelope, HeartbeatKind, MessageType};
use crate::reconcile::{
    ChangeCallback, EntityKind, EntityRecord, MutationFailure, MutationId, ReconcileEngine,
    RestCollaborator, RestError, split_snapshot,
};
use crate::rooms::{RoomId, RoomTracker};
use crate::router::{
    Handler, HandlerId, Notification, PresenceUpdate, Route, Router, SystemMessage,
};
use crate::scheduler::{CloseOutcome, Scheduler, SchedulerAction};
use crate::transport::{
    CLOSE_LIVENESS_TIMEOUT, CloseDisposition, Connection, ConnectionState, ConnectionStatus,
    Transport, TransportEvent,
};

/// Something the UI layer may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The connection state changed.
    StatusChanged(ConnectionState),
    /// The socket is open and every tracked room has been re-joined.
    Ready {
        /// Number of rooms replayed
        rooms: usize,
    },
    /// The server sent an `error` frame.
    ServerError {
        /// Server message
        message: String,
    },
    /// A frame that deserves a user-facing notification.
    Notify(Notification),
    /// The server acknowledged a room join.
    RoomJoined {
        /// Room id, when the server names it
        room_id: Option<String>,
    },
    /// The server acknowledged a room leave.
    RoomLeft {
        /// Room id, when the server names it
        room_id: Option<String>,
    },
    /// Online or typing state changed.
    Presence(PresenceUpdate),
    /// The connection went away and all online and typing state was dropped.
    PresenceCleared,
}

/// Callback receiving client events.
pub type EventCallback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

struct ClientState {
    connection: Connection,
    scheduler: Scheduler,
    rooms: RoomTracker,
    presence: PresenceState,
    typing: LocalTyping,
    ready: bool,
}

impl ClientState {
    fn send_frame(&mut self, frame: &ControlFrame) -> bool {
        self.connection.send(&frame.to_envelope())
    }

    /// Presence is only valid while connected.
    fn reset_presence(&mut self, events: &mut Vec<ClientEvent>) {
        self.ready = false;
        self.typing.clear();
        if self.presence.clear() {
            events.push(ClientEvent::PresenceCleared);
        }
    }

    /// Schedule (or give up on) reconnection after losing the socket.
    fn on_connection_lost(&mut self, now: Instant, events: &mut Vec<ClientEvent>) {
        self.reset_presence(events);
        let can_reconnect = self.connection.has_credential();
        match self.scheduler.on_unexpected_close(now, can_reconnect) {
            CloseOutcome::Reconnecting { attempt, .. } => self.connection.set_reconnecting(attempt),
            CloseOutcome::Failed { attempts } => self.connection.set_failed(format!(
                "Connection lost; gave up after {} reconnect attempts",
                attempts
            )),
            CloseOutcome::Stopped => self.connection.set_idle(),
        }
    }
}

struct Inner {
    config: RealtimeConfig,
    state: Mutex<ClientState>,
    router: Router,
    engine: ReconcileEngine,
    events: CallbackRegistry<ClientEvent>,
}

/// Handle to the realtime synchronization core.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    /// Create a client that talks through `transport`.
    pub fn new(config: RealtimeConfig, transport: Box<dyn Transport>) -> Self {
        let state = ClientState {
            connection: Connection::new(transport, &config),
            scheduler: Scheduler::new(&config),
            rooms: RoomTracker::new(),
            presence: PresenceState::new(),
            typing: LocalTyping::new(config.typing_timeout()),
            ready: false,
        };
        Self {
            inner: Arc::new(Inner {
                engine: ReconcileEngine::new(config.duplicate_window()),
                config,
                state: Mutex::new(state),
                router: Router::new(),
                events: CallbackRegistry::new(),
            }),
        }
    }

    /// The configuration the client was built with.
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Run `f` on the locked state, then emit the collected events unlocked.
    ///
    /// A `StatusChanged` event is added whenever the connection state differs
    /// afterwards.
    fn with_state<T>(&self, f: impl FnOnce(&mut ClientState, &mut Vec<ClientEvent>) -> T) -> T {
        let mut events = Vec::new();
        let result = {
            let mut state = locks::lock(&self.inner.state);
            let before = state.connection.state().clone();
            let result = f(&mut state, &mut events);
            let after = state.connection.state();
            if *after != before {
                events.insert(0, ClientEvent::StatusChanged(after.clone()));
            }
            result
        };
        self.emit_all(events);
        result
    }

    fn emit_all(&self, events: Vec<ClientEvent>) {
        for event in events {
            self.inner.events.emit(&event);
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Open the connection with a bearer credential.
    ///
    /// A no-op while already open or connecting. Cancels a pending reconnect,
    /// and after `Failed` starts a fresh round of attempts.
    pub fn open(&self, credential: impl Into<String>) -> Result<bool> {
        let credential = credential.into();
        self.with_state(|state, _| {
            let started = state.connection.open(credential)?;
            if started {
                state.scheduler.on_connecting();
            }
            Ok(started)
        })
    }

    /// Close on purpose. No reconnection follows and the credential is dropped.
    ///
    /// Tracked rooms are kept and replayed on the next `open`.
    pub fn close(&self, reason: &str) {
        self.with_state(|state, events| {
            state.connection.close(reason);
            state.scheduler.stop();
            state.reset_presence(events);
        });
    }

    /// Send an arbitrary envelope. Returns `false` when not open.
    pub fn send(&self, envelope: &Envelope) -> bool {
        locks::lock(&self.inner.state).connection.send(envelope)
    }

    /// Connection state snapshot.
    pub fn connection_state(&self) -> ConnectionState {
        locks::lock(&self.inner.state).connection.state().clone()
    }

    /// Connection status.
    pub fn status(&self) -> ConnectionStatus {
        locks::lock(&self.inner.state).connection.status()
    }

    /// Whether the socket is open and the room set has been replayed.
    pub fn is_ready(&self) -> bool {
        locks::lock(&self.inner.state).ready
    }

    /// Feed one transport event into the client.
    pub fn handle_transport_event(&self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Opened => self.on_opened(now),
            TransportEvent::Message(raw) => self.on_message(&raw, now),
            TransportEvent::Error(error) => self.with_state(|state, _| {
                state.connection.on_error(&error);
            }),
            TransportEvent::Closed { code, reason } => self.with_state(|state, events| {
                match state.connection.on_closed(code, &reason) {
                    CloseDisposition::Ignored => {}
                    CloseDisposition::Normal => {
                        state.scheduler.stop();
                        state.reset_presence(events);
                    }
                    CloseDisposition::Abnormal => state.on_connection_lost(now, events),
                }
            }),
        }
    }

    fn on_opened(&self, now: Instant) {
        self.with_state(|state, events| {
            if state.connection.status() != ConnectionStatus::Connecting {
                log::debug!(
                    "[Client] Open event while {:?}, ignoring",
                    state.connection.status()
                );
                return;
            }
            state.connection.on_opened();
            state.scheduler.on_open(now);

            let rooms = state.rooms.replay();
            for room in &rooms {
                state.send_frame(&ControlFrame::JoinRoom {
                    room_id: room.to_string(),
                });
            }
            log::info!("[Client] Ready, replayed {} room(s)", rooms.len());
            state.ready = true;
            events.push(ClientEvent::Ready { rooms: rooms.len() });
        });
    }

    fn on_message(&self, raw: &str, now: Instant) {
        locks::lock(&self.inner.state).scheduler.on_inbound(now);

        let Some((envelope, route)) = self.inner.router.accept(raw) else {
            return;
        };

        match route {
            Route::Heartbeat { reply } => {
                if let Some(reply) = reply {
                    self.with_state(|state, _| {
                        state.send_frame(&ControlFrame::Heartbeat(reply));
                    });
                }
            }
            Route::System(SystemMessage::Error { message }) => {
                log::warn!("[Client] Server error: {}", message);
                self.with_state(|state, events| {
                    state.connection.set_last_error(message.clone());
                    events.push(ClientEvent::ServerError { message });
                });
            }
            Route::System(SystemMessage::RoomJoined { room_id }) => {
                self.emit_all(vec![ClientEvent::RoomJoined { room_id }]);
            }
            Route::System(SystemMessage::RoomLeft { room_id }) => {
                self.emit_all(vec![ClientEvent::RoomLeft { room_id }]);
            }
            Route::System(SystemMessage::ConnectionEstablished) => {
                log::debug!("[Client] Connection established");
            }
            Route::Domain { presence } => {
                if let Some(update) = presence {
                    self.apply_presence(update);
                }
                self.inner.engine.apply_frame(&envelope, now);
                if let Some(notification) = Notification::from_envelope(&envelope) {
                    self.emit_all(vec![ClientEvent::Notify(notification)]);
                }
                self.inner.router.dispatch(&envelope);
            }
        }
    }

    fn apply_presence(&self, update: PresenceUpdate) {
        self.with_state(|state, events| {
            let presence = &mut state.presence;
            let changed = match &update {
                PresenceUpdate::Online { user_id } => presence.user_online(user_id),
                PresenceUpdate::Offline { user_id } => presence.user_offline(user_id),
                PresenceUpdate::Typing {
                    project_id,
                    user_id,
                } => presence.typing_started(project_id, user_id),
                PresenceUpdate::StopTyping {
                    project_id,
                    user_id,
                } => presence.typing_stopped(project_id, user_id),
            };
            if changed {
                events.push(ClientEvent::Presence(update));
            }
        });
    }

    /// Run every timer that is due at `now`.
    pub fn tick(&self, now: Instant) {
        self.with_state(|state, events| {
            for action in state.scheduler.tick(now) {
                match action {
                    SchedulerAction::SendHeartbeat => {
                        state.send_frame(&ControlFrame::Heartbeat(HeartbeatKind::Ping));
                    }
                    SchedulerAction::Reconnect { attempt } => {
                        log::info!("[Client] Reconnect attempt {}", attempt);
                        if let Err(e) = state.connection.reconnect() {
                            log::error!("[Client] Reconnect failed to start: {}", e);
                            state.connection.on_error(&e.to_string());
                            state.on_connection_lost(now, events);
                        }
                    }
                    SchedulerAction::LivenessTimeout => {
                        state
                            .connection
                            .force_close(CLOSE_LIVENESS_TIMEOUT, "No traffic from server");
                        state.on_connection_lost(now, events);
                    }
                }
            }

            for project_id in state.typing.expire(now) {
                log::debug!("[Client] Typing in {} timed out", project_id);
                state.send_frame(&ControlFrame::StopTyping { project_id });
            }
        });
    }

    /// When [`tick`](Self::tick) next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let state = locks::lock(&self.inner.state);
        [state.scheduler.next_deadline(), state.typing.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    // ========================================================================
    // Rooms
    // ========================================================================

    /// Track a room, joining it now if the socket is open.
    ///
    /// Returns `false` if the room was already tracked.
    pub fn join(&self, room: RoomId) -> bool {
        self.with_state(|state, _| {
            let frame = ControlFrame::JoinRoom {
                room_id: room.to_string(),
            };
            let added = state.rooms.join(room);
            if added && state.connection.is_open() {
                state.send_frame(&frame);
            }
            added
        })
    }

    /// Stop tracking a room, leaving it now if the socket is open.
    ///
    /// Returns `false` if the room was not tracked.
    pub fn leave(&self, room: &RoomId) -> bool {
        self.with_state(|state, _| {
            let removed = state.rooms.leave(room);
            if removed && state.connection.is_open() {
                state.send_frame(&ControlFrame::LeaveRoom {
                    room_id: room.to_string(),
                });
            }
            removed
        })
    }

    /// Tracked rooms in join order.
    pub fn rooms(&self) -> Vec<RoomId> {
        locks::lock(&self.inner.state).rooms.replay()
    }

    /// Ask the server for the members of a room.
    pub fn request_room_members(&self, room: &RoomId) -> bool {
        self.with_state(|state, _| {
            state.send_frame(&ControlFrame::GetRoomMembers {
                room_id: room.to_string(),
            })
        })
    }

    /// Ask the server for connection statistics.
    pub fn request_connection_stats(&self) -> bool {
        self.with_state(|state, _| state.send_frame(&ControlFrame::GetConnectionStats))
    }

    // ========================================================================
    // Presence
    // ========================================================================

    /// Send a raw `typing` frame.
    pub fn send_typing(&self, project_id: &str) -> bool {
        self.with_state(|state, _| {
            state.send_frame(&ControlFrame::Typing {
                project_id: project_id.to_string(),
            })
        })
    }

    /// Send a raw `stop_typing` frame.
    pub fn send_stop_typing(&self, project_id: &str) -> bool {
        self.with_state(|state, _| {
            state.send_frame(&ControlFrame::StopTyping {
                project_id: project_id.to_string(),
            })
        })
    }

    /// Note a keystroke: sends `typing` once, then `stop_typing` automatically
    /// after the typing timeout without further keystrokes.
    pub fn start_typing(&self, project_id: &str, now: Instant) -> bool {
        self.with_state(|state, _| {
            if !state.connection.is_open() {
                return false;
            }
            if state.typing.start(project_id, now) {
                state.send_frame(&ControlFrame::Typing {
                    project_id: project_id.to_string(),
                })
            } else {
                false
            }
        })
    }

    /// Withdraw a typing indicator started with [`start_typing`](Self::start_typing).
    pub fn stop_typing(&self, project_id: &str) -> bool {
        self.with_state(|state, _| {
            if state.typing.stop(project_id) {
                state.send_frame(&ControlFrame::StopTyping {
                    project_id: project_id.to_string(),
                })
            } else {
                false
            }
        })
    }

    /// Users currently online.
    pub fn online_users(&self) -> Vec<String> {
        locks::lock(&self.inner.state).presence.online_users()
    }

    /// Whether a user is online.
    pub fn is_online(&self, user_id: &str) -> bool {
        locks::lock(&self.inner.state).presence.is_online(user_id)
    }

    /// Users typing in a project.
    pub fn typing_users(&self, project_id: &str) -> Vec<String> {
        locks::lock(&self.inner.state)
            .presence
            .typing_users(project_id)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe to client events.
    pub fn subscribe_events(&self, callback: EventCallback) -> SubscriptionId {
        self.inner.events.subscribe(callback)
    }

    /// Remove an event subscription.
    pub fn unsubscribe_events(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Register a handler for a domain message type.
    pub fn register_handler(
        &self,
        message_type: impl Into<MessageType>,
        handler: Handler,
    ) -> HandlerId {
        self.inner.router.register_handler(message_type, handler)
    }

    /// Remove a domain message handler.
    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        self.inner.router.unregister(id)
    }

    /// The most recent valid inbound frame.
    pub fn last_message(&self) -> Option<Envelope> {
        self.inner.router.last_message()
    }

    /// Subscribe to changes of one entity kind.
    pub fn subscribe(&self, kind: EntityKind, callback: ChangeCallback) -> SubscriptionId {
        self.inner.engine.subscribe(kind, callback)
    }

    /// Subscribe to changes of every entity kind.
    pub fn subscribe_all(&self, callback: ChangeCallback) -> SubscriptionId {
        self.inner.engine.subscribe_all(callback)
    }

    /// Remove an entity subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.engine.unsubscribe(id)
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// The reconciliation engine.
    pub fn engine(&self) -> &ReconcileEngine {
        &self.inner.engine
    }

    /// Snapshot of one entity.
    pub fn entity(&self, kind: EntityKind, id: &str) -> Option<EntityRecord> {
        self.inner.engine.get(kind, id)
    }

    /// Snapshots of every entity of a kind.
    pub fn entities(&self, kind: EntityKind) -> Vec<EntityRecord> {
        self.inner.engine.entities(kind)
    }

    /// Apply a local change before the server has seen it.
    pub fn apply_optimistic(
        &self,
        kind: EntityKind,
        entity_id: &str,
        fields: &Map<String, Value>,
    ) -> MutationId {
        self.inner
            .engine
            .apply_optimistic(kind, entity_id, fields, Instant::now())
    }

    /// The server accepted a mutation.
    pub fn confirm(&self, id: MutationId) -> Result<()> {
        self.inner.engine.confirm(id)
    }

    /// The server rejected a mutation.
    pub fn rollback(&self, id: MutationId, reason: MutationFailure) -> Result<()> {
        self.inner.engine.rollback(id, reason)
    }

    /// Patch an entity optimistically through the REST collaborator.
    ///
    /// The change is visible at once. On success the server snapshot is
    /// merged under the recency rule; on failure the entity is restored and
    /// the typed reason returned.
    pub async fn update_entity(
        &self,
        rest: &dyn RestCollaborator,
        kind: EntityKind,
        id: &str,
        fields: Map<String, Value>,
    ) -> std::result::Result<(), MutationFailure> {
        let mutation = self.apply_optimistic(kind, id, &fields);
        match rest.update(kind, id, &fields).await {
            Ok(snapshot) => {
                self.settle(mutation);
                self.inner.engine.load(kind, std::slice::from_ref(&snapshot));
                Ok(())
            }
            Err(e) => Err(self.fail(mutation, &e)),
        }
    }

    /// Create an entity optimistically under a temporary id.
    ///
    /// On success the placeholder is replaced by the server's record and its
    /// id returned.
    pub async fn create_entity(
        &self,
        rest: &dyn RestCollaborator,
        kind: EntityKind,
        temp_id: &str,
        fields: Map<String, Value>,
    ) -> std::result::Result<String, MutationFailure> {
        let mutation = self.apply_optimistic(kind, temp_id, &fields);
        match rest.create(kind, &fields).await {
            Ok(snapshot) => {
                self.settle(mutation);
                let Some((id, _)) = split_snapshot(kind, &snapshot) else {
                    log::warn!("[Client] Created {} has no id, keeping {}", kind, temp_id);
                    return Ok(temp_id.to_string());
                };
                if id != temp_id {
                    self.inner.engine.remove_local(kind, temp_id);
                }
                self.inner.engine.load(kind, std::slice::from_ref(&snapshot));
                Ok(id)
            }
            Err(e) => Err(self.fail(mutation, &e)),
        }
    }

    /// Delete an entity. It is removed locally once the server confirms.
    pub async fn delete_entity(
        &self,
        rest: &dyn RestCollaborator,
        kind: EntityKind,
        id: &str,
    ) -> std::result::Result<(), MutationFailure> {
        match rest.delete(kind, id).await {
            Ok(()) => {
                self.inner.engine.remove_local(kind, id);
                Ok(())
            }
            Err(e) => Err(MutationFailure::from(&e)),
        }
    }

    /// Seed the store for a kind from the REST listing.
    pub async fn load_entities(
        &self,
        rest: &dyn RestCollaborator,
        kind: EntityKind,
    ) -> std::result::Result<usize, RestError> {
        let snapshots = rest.list(kind).await?;
        Ok(self.inner.engine.load(kind, &snapshots))
    }

    fn settle(&self, mutation: MutationId) {
        // Already confirmed by a push, or superseded by a newer edit
        if let Err(e) = self.inner.engine.confirm(mutation) {
            log::debug!("[Client] {}", e);
        }
    }

    fn fail(&self, mutation: MutationId, error: &RestError) -> MutationFailure {
        let failure = MutationFailure::from(error);
        if let Err(e) = self.inner.engine.rollback(mutation, failure.clone()) {
            log::debug!("[Client] Nothing to roll back: {}", e);
        }
        failure
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.connection_state())
            .field("rooms", &self.rooms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use url::Url;

    #[derive(Default)]
    struct Wire {
        connects: usize,
        sent: Vec<Value>,
        closes: Vec<u16>,
    }

    struct MockTransport(Arc<Mutex<Wire>>);

    impl Transport for MockTransport {
        fn connect(&mut self, _url: &Url) -> Result<()> {
            self.0.lock().unwrap().connects += 1;
            Ok(())
        }

        fn send_text(&mut self, text: String) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .sent
                .push(serde_json::from_str(&text).unwrap());
            Ok(())
        }

        fn close(&mut self, code: u16, _reason: &str) {
            self.0.lock().unwrap().closes.push(code);
        }
    }

    fn client() -> (RealtimeClient, Arc<Mutex<Wire>>) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        let client = RealtimeClient::new(
            RealtimeConfig::default(),
            Box::new(MockTransport(Arc::clone(&wire))),
        );
        (client, wire)
    }

    fn sent_types(wire: &Arc<Mutex<Wire>>) -> Vec<String> {
        wire.lock()
            .unwrap()
            .sent
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn open(client: &RealtimeClient, now: Instant) {
        client.open("token").unwrap();
        client.handle_transport_event(TransportEvent::Opened, now);
    }

    #[test]
    fn test_open_and_ready() {
        let (client, wire) = client();
        let now = Instant::now();
        assert!(!client.is_ready());
        assert!(client.open("token").unwrap());
        assert_eq!(client.status(), ConnectionStatus::Connecting);
        assert!(!client.open("token").unwrap());

        client.handle_transport_event(TransportEvent::Opened, now);
        assert!(client.is_ready());
        assert_eq!(client.status(), ConnectionStatus::Open);
        assert_eq!(wire.lock().unwrap().connects, 1);
    }

    #[test]
    fn test_join_while_disconnected_is_replayed() {
        let (client, wire) = client();
        assert!(client.join(RoomId::project(42)));
        assert!(!client.join(RoomId::project(42)));
        assert!(sent_types(&wire).is_empty());

        open(&client, Instant::now());
        let sent = &wire.lock().unwrap().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "join_room");
        assert_eq!(sent[0]["room_id"], "project:42");
    }

    #[test]
    fn test_join_and_leave_while_open_send_immediately() {
        let (client, wire) = client();
        open(&client, Instant::now());
        client.join(RoomId::user(7));
        client.leave(&RoomId::user(7));
        assert!(!client.leave(&RoomId::user(7)));
        assert_eq!(sent_types(&wire), vec!["join_room", "leave_room"]);
    }

    #[test]
    fn test_peer_ping_answered_with_pong() {
        let (client, wire) = client();
        let now = Instant::now();
        open(&client, now);
        client.handle_transport_event(
            TransportEvent::Message(
                r#"{"type":"heartbeat","timestamp":"2024-05-01T10:00:00Z","message":"ping"}"#.into(),
            ),
            now,
        );
        let sent = &wire.lock().unwrap().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "heartbeat");
        assert_eq!(sent[0]["message"], "pong");
    }

    #[test]
    fn test_heartbeat_sent_on_tick() {
        let (client, wire) = client();
        let t0 = Instant::now();
        open(&client, t0);
        assert_eq!(client.next_deadline(), Some(t0 + Duration::from_secs(25)));
        client.tick(t0 + Duration::from_secs(25));
        assert_eq!(sent_types(&wire), vec!["heartbeat"]);
        assert_eq!(wire.lock().unwrap().sent[0]["message"], "ping");
    }

    #[test]
    fn test_error_frame_sets_last_error() {
        let (client, _) = client();
        let now = Instant::now();
        open(&client, now);

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        client.subscribe_events(Arc::new(move |e| sink.lock().unwrap().push(e.clone())));

        client.handle_transport_event(
            TransportEvent::Message(
                r#"{"type":"error","timestamp":"t","data":{"message":"Room not found"}}"#.into(),
            ),
            now,
        );
        assert_eq!(
            client.connection_state().last_error.as_deref(),
            Some("Room not found")
        );
        assert!(events.lock().unwrap().contains(&ClientEvent::ServerError {
            message: "Room not found".to_string()
        }));
    }

    #[test]
    fn test_presence_updates_without_handlers() {
        let (client, _) = client();
        let now = Instant::now();
        open(&client, now);
        for raw in [
            r#"{"type":"user_online","timestamp":"t","data":{"user_id":7}}"#,
            r#"{"type":"user_typing","timestamp":"t","data":{"user_id":7,"project_id":42}}"#,
        ] {
            client.handle_transport_event(TransportEvent::Message(raw.into()), now);
        }
        assert!(client.is_online("7"));
        assert_eq!(client.typing_users("42"), vec!["7"]);

        client.handle_transport_event(
            TransportEvent::Message(
                r#"{"type":"user_offline","timestamp":"t","data":{"user_id":7}}"#.into(),
            ),
            now,
        );
        assert!(client.online_users().is_empty());
    }

    #[test]
    fn test_local_typing_auto_stops() {
        let (client, wire) = client();
        let t0 = Instant::now();
        open(&client, t0);

        assert!(client.start_typing("42", t0));
        assert!(!client.start_typing("42", t0 + Duration::from_secs(1)));
        client.tick(t0 + Duration::from_secs(3));
        assert_eq!(sent_types(&wire), vec!["typing"]);

        client.tick(t0 + Duration::from_secs(4));
        assert_eq!(sent_types(&wire), vec!["typing", "stop_typing"]);
        assert!(!client.stop_typing("42"));
    }

    #[test]
    fn test_send_while_closed_returns_false() {
        let (client, wire) = client();
        assert!(!client.request_connection_stats());
        assert!(!client.send_typing("42"));
        assert!(wire.lock().unwrap().sent.is_empty());
    }

    #[test]
    fn test_normal_close_does_not_reconnect() {
        let (client, _) = client();
        let now = Instant::now();
        open(&client, now);
        client.handle_transport_event(
            TransportEvent::Closed {
                code: 1000,
                reason: String::new(),
            },
            now,
        );
        assert_eq!(client.status(), ConnectionStatus::Idle);
        assert!(client.next_deadline().is_none());
    }

    #[test]
    fn test_manual_close_ignores_late_close_event() {
        let (client, wire) = client();
        let now = Instant::now();
        open(&client, now);
        client.close("logout");
        client.handle_transport_event(
            TransportEvent::Closed {
                code: 1006,
                reason: String::new(),
            },
            now,
        );
        assert_eq!(client.status(), ConnectionStatus::Idle);
        assert!(client.next_deadline().is_none());
        assert_eq!(wire.lock().unwrap().closes, vec![1000]);
    }

    #[test]
    fn test_liveness_timeout_forces_reconnect() {
        let (client, wire) = client();
        let t0 = Instant::now();
        open(&client, t0);
        client.tick(t0 + Duration::from_secs(60));

        assert_eq!(client.status(), ConnectionStatus::Reconnecting);
        assert_eq!(client.connection_state().attempt, 1);
        assert_eq!(wire.lock().unwrap().closes, vec![CLOSE_LIVENESS_TIMEOUT]);

        client.tick(t0 + Duration::from_secs(63));
        assert_eq!(client.status(), ConnectionStatus::Connecting);
        assert_eq!(wire.lock().unwrap().connects, 2);
    }

    #[test]
    fn test_handler_can_reenter_client() {
        let (client, wire) = client();
        let now = Instant::now();
        open(&client, now);

        let inner = client.clone();
        client.register_handler(
            MessageType::ProjectMemberAdded,
            Arc::new(move |env| {
                if let Some(project) = env.data_id("project_id") {
                    inner.join(RoomId::project(project));
                }
            }),
        );
        client.handle_transport_event(
            TransportEvent::Message(
                r#"{"type":"project_member_added","timestamp":"t","data":{"project_id":9}}"#.into(),
            ),
            now,
        );
        assert_eq!(client.rooms(), vec![RoomId::project(9)]);
        assert_eq!(sent_types(&wire), vec!["join_room"]);
    }

    #[test]
    fn test_presence_reset_whenever_the_socket_goes_away() {
        let (client, _) = client();
        let t0 = Instant::now();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        client.subscribe_events(Arc::new(move |e| sink.lock().unwrap().push(e.clone())));

        let seed_presence = |now| {
            for raw in [
                r#"{"type":"user_online","timestamp":"t","data":{"user_id":7}}"#,
                r#"{"type":"user_typing","timestamp":"t","data":{"user_id":7,"project_id":42}}"#,
            ] {
                client.handle_transport_event(TransportEvent::Message(raw.into()), now);
            }
            assert!(client.is_online("7"));
            assert_eq!(client.typing_users("42"), vec!["7"]);
        };
        let cleared = || {
            events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| **e == ClientEvent::PresenceCleared)
                .count()
        };

        // Abnormal close
        open(&client, t0);
        seed_presence(t0);
        client.handle_transport_event(
            TransportEvent::Closed {
                code: 1006,
                reason: String::new(),
            },
            t0,
        );
        assert_eq!(client.status(), ConnectionStatus::Reconnecting);
        assert!(!client.is_online("7"));
        assert!(client.typing_users("42").is_empty());
        assert_eq!(cleared(), 1);

        // Manual close after reconnecting
        let t1 = t0 + Duration::from_secs(5);
        client.tick(t1);
        client.handle_transport_event(TransportEvent::Opened, t1);
        seed_presence(t1);
        client.close("logout");
        assert!(client.online_users().is_empty());
        assert!(client.typing_users("42").is_empty());
        assert_eq!(cleared(), 2);

        // Normal close from the server
        open(&client, t1);
        seed_presence(t1);
        client.handle_transport_event(
            TransportEvent::Closed {
                code: 1000,
                reason: String::new(),
            },
            t1,
        );
        assert!(!client.is_online("7"));
        assert_eq!(cleared(), 3);

        // Nothing left to clear, nothing emitted
        client.close("again");
        assert_eq!(cleared(), 3);
    }
}
