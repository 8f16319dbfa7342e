//! Inbound message routing.
//!
//! The router validates raw frames, decides what the client must do with them
//! ([`Route`]) and fans domain frames out to handlers registered per
//! [`MessageType`]. Handlers for one type run in registration order; a
//! panicking handler is logged and the rest still run.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::callback_registry::{CallbackRegistry, SubscriptionId};
use crate::locks;
use crate::protocol::{Envelope, HeartbeatKind, MessageType, value_as_id};

/// Identifier returned by [`Router::register_handler`].
pub type HandlerId = SubscriptionId;

/// A domain message handler.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// A change to presence state carried by a domain frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceUpdate {
    /// `user_online`
    Online {
        /// User that came online
        user_id: String,
    },
    /// `user_offline`
    Offline {
        /// User that went offline
        user_id: String,
    },
    /// `user_typing`
    Typing {
        /// Project the user is typing in
        project_id: String,
        /// User that is typing
        user_id: String,
    },
    /// `user_stop_typing`
    StopTyping {
        /// Project the user stopped typing in
        project_id: String,
        /// User that stopped typing
        user_id: String,
    },
}

/// A system frame the client consumes itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemMessage {
    /// The server accepted the connection.
    ConnectionEstablished,
    /// A `join_room` was acknowledged.
    RoomJoined {
        /// Room that was joined, when the server names it
        room_id: Option<String>,
    },
    /// A `leave_room` was acknowledged.
    RoomLeft {
        /// Room that was left, when the server names it
        room_id: Option<String>,
    },
    /// The server reported an error.
    Error {
        /// Message shown to the user
        message: String,
    },
}

/// What the client has to do with a validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// A heartbeat; `reply` is set when the peer expects an answer.
    Heartbeat {
        /// Heartbeat to send back
        reply: Option<HeartbeatKind>,
    },
    /// A system frame, never shown to domain handlers.
    System(SystemMessage),
    /// A domain frame for the reconciliation engine and the handlers.
    Domain {
        /// Presence side effect to apply before dispatch
        presence: Option<PresenceUpdate>,
    },
}

/// A user-facing notification derived from a domain frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Type of the frame that triggered it
    pub message_type: MessageType,
    /// Short title
    pub title: String,
    /// Body text
    pub body: String,
}

impl Notification {
    /// Build a notification for a frame whose type deserves one.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        if !envelope.message_type.should_notify() {
            return None;
        }
        let text = |key: &str| {
            envelope
                .data_field(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            message_type: envelope.message_type.clone(),
            title: text("title").unwrap_or_else(|| "New notification".to_string()),
            body: text("message")
                .or_else(|| text("content"))
                .unwrap_or_else(|| "You have a new update.".to_string()),
        })
    }
}

/// Validates frames and dispatches domain frames to registered handlers.
pub struct Router {
    handlers: CallbackRegistry<Envelope>,
    handler_types: RwLock<HashMap<HandlerId, MessageType>>,
    last_message: RwLock<Option<Envelope>>,
}

impl Router {
    /// Create a router with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: CallbackRegistry::new(),
            handler_types: RwLock::new(HashMap::new()),
            last_message: RwLock::new(None),
        }
    }

    /// Register a handler for one message type.
    pub fn register_handler(
        &self,
        message_type: impl Into<MessageType>,
        handler: Handler,
    ) -> HandlerId {
        let message_type = message_type.into();
        let wanted = message_type.clone();
        let id = self.handlers.subscribe(Arc::new(move |envelope: &Envelope| {
            if envelope.message_type == wanted {
                handler(envelope);
            }
        }));
        log::debug!("[Router] Handler {} registered for '{}'", id, message_type);
        locks::write(&self.handler_types).insert(id, message_type);
        id
    }

    /// Remove a handler. Returns `false` if the id is unknown.
    pub fn unregister(&self, id: HandlerId) -> bool {
        locks::write(&self.handler_types).remove(&id);
        self.handlers.unsubscribe(id)
    }

    /// Number of handlers registered for a type.
    pub fn handler_count(&self, message_type: &MessageType) -> usize {
        locks::read(&self.handler_types)
            .values()
            .filter(|ty| *ty == message_type)
            .count()
    }

    /// Parse and validate a raw frame and decide how it is handled.
    ///
    /// Invalid frames are logged and dropped (`None`).
    pub fn accept(&self, raw: &str) -> Option<(Envelope, Route)> {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("[Router] Dropping invalid frame: {}", e);
                return None;
            }
        };
        *locks::write(&self.last_message) = Some(envelope.clone());
        let route = classify(&envelope);
        log::trace!("[Router] '{}' -> {:?}", envelope.message_type, route);
        Some((envelope, route))
    }

    /// Run every handler registered for the envelope's type.
    ///
    /// Must only be called for [`Route::Domain`] frames.
    pub fn dispatch(&self, envelope: &Envelope) {
        if self.handler_count(&envelope.message_type) == 0 {
            log::trace!("[Router] No handler for '{}'", envelope.message_type);
            return;
        }
        self.handlers.emit(envelope);
    }

    /// The most recent valid frame.
    pub fn last_message(&self) -> Option<Envelope> {
        locks::read(&self.last_message).clone()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("handlers", &self.handlers.subscriber_count())
            .finish()
    }
}

/// Decide how a validated frame is handled.
pub fn classify(envelope: &Envelope) -> Route {
    match &envelope.message_type {
        MessageType::Heartbeat => Route::Heartbeat {
            reply: (envelope.heartbeat_message() == Some("ping")).then_some(HeartbeatKind::Pong),
        },
        MessageType::ConnectionEstablished => Route::System(SystemMessage::ConnectionEstablished),
        MessageType::RoomJoined => Route::System(SystemMessage::RoomJoined {
            room_id: room_of(envelope),
        }),
        MessageType::RoomLeft => Route::System(SystemMessage::RoomLeft {
            room_id: room_of(envelope),
        }),
        MessageType::Error => Route::System(SystemMessage::Error {
            message: envelope
                .data_field("message")
                .or_else(|| envelope.extra.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown server error")
                .to_string(),
        }),
        _ => Route::Domain {
            presence: presence_update(envelope),
        },
    }
}

fn room_of(envelope: &Envelope) -> Option<String> {
    envelope
        .room_id
        .clone()
        .or_else(|| envelope.extra.get("room_id").and_then(value_as_id))
        .or_else(|| envelope.data_id("room_id"))
}

fn presence_update(envelope: &Envelope) -> Option<PresenceUpdate> {
    let user_id = || envelope.data_id("user_id");
    let project_id = || envelope.data_id("project_id");

    let update = match envelope.message_type {
        MessageType::UserOnline => PresenceUpdate::Online {
            user_id: user_id()?,
        },
        MessageType::UserOffline => PresenceUpdate::Offline {
            user_id: user_id()?,
        },
        MessageType::UserTyping => PresenceUpdate::Typing {
            project_id: project_id()?,
            user_id: user_id()?,
        },
        MessageType::UserStopTyping => PresenceUpdate::StopTyping {
            project_id: project_id()?,
            user_id: user_id()?,
        },
        _ => return None,
    };
    Some(update)
}
