//! The single physical connection to the realtime server.
//!
//! The core never touches a socket directly. A [`Transport`] implementation
//! does the IO and reports what happened as [`TransportEvent`]s, which the
//! owner of the client feeds back through
//! [`RealtimeClient::handle_transport_event`](crate::client::RealtimeClient::handle_transport_event).
//! [`Connection`] wraps the transport with the connection status, the stored
//! credential and the "only send while open" rule.

#[cfg(all(feature = "native-sync", not(target_arch = "wasm32")))]
mod websocket;

#[cfg(all(feature = "native-sync", not(target_arch = "wasm32")))]
pub use websocket::WebSocketTransport;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use url::Url;

use crate::config::RealtimeConfig;
use crate::error::{Result, SyncError};
use crate::protocol::Envelope;

/// Close code for a normal, application-initiated close.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code sent when the peer is going away (page unload, server restart).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code reported when the socket dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code used when the client gives up on a silent socket.
pub const CLOSE_LIVENESS_TIMEOUT: u16 = 4000;

/// Whether a close code means the session ended on purpose.
///
/// Only these codes suppress automatic reconnection.
pub fn is_normal_close(code: u16) -> bool {
    code == CLOSE_NORMAL || code == CLOSE_GOING_AWAY
}

/// Something that happened on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The socket reported an error. A `Closed` event follows when the
    /// error is fatal.
    Error(String),
    /// The socket is gone.
    Closed {
        /// WebSocket close code (1006 when no close frame was received)
        code: u16,
        /// Close reason sent by the peer, if any
        reason: String,
    },
}

/// The IO seam.
///
/// Implementations must not block: `connect` starts a handshake and reports
/// the outcome later as `Opened` or `Error` + `Closed`. After `close` (or a new
/// `connect`) no further events from the old socket may be delivered.
pub trait Transport: Send {
    /// Start connecting to `url`.
    fn connect(&mut self, url: &Url) -> Result<()>;

    /// Queue a text frame on the open socket.
    fn send_text(&mut self, text: String) -> Result<()>;

    /// Close the socket with the given code and reason.
    fn close(&mut self, code: u16, reason: &str);
}

/// Connection lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ConnectionStatus {
    /// No socket and no reconnection pending
    #[default]
    Idle,
    /// Handshake in progress
    Connecting,
    /// Socket open
    Open,
    /// Waiting for the next reconnection attempt
    Reconnecting,
    /// Reconnection attempts exhausted; only an explicit `open` retries
    Failed,
}

/// Snapshot of the connection exposed to the UI layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ConnectionState {
    /// Current lifecycle status
    pub status: ConnectionStatus,
    /// Reconnection attempts since the last successful open
    pub attempt: u32,
    /// Most recent transport or server-reported error
    pub last_error: Option<String>,
}

/// What a `Closed` event means for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// The client had already been closed locally; nothing to do.
    Ignored,
    /// Normal close; the connection is now idle.
    Normal,
    /// Unexpected close; reconnection should be considered.
    Abnormal,
}

/// The transport plus everything the client knows about it.
pub struct Connection {
    transport: Box<dyn Transport>,
    server_url: String,
    endpoint_path: String,
    credential: Option<String>,
    state: ConnectionState,
}

impl Connection {
    /// Wrap a transport for the server named in `config`.
    pub fn new(transport: Box<dyn Transport>, config: &RealtimeConfig) -> Self {
        Self {
            transport,
            server_url: config.server_url.clone(),
            endpoint_path: config.endpoint_path.clone(),
            credential: None,
            state: ConnectionState::default(),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    /// Whether frames can be sent.
    pub fn is_open(&self) -> bool {
        self.state.status == ConnectionStatus::Open
    }

    /// Whether a credential is stored for reconnection.
    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// Open the connection with a bearer credential.
    ///
    /// Returns `Ok(false)` without doing anything when the socket is already
    /// open or connecting.
    pub fn open(&mut self, credential: impl Into<String>) -> Result<bool> {
        if matches!(
            self.state.status,
            ConnectionStatus::Open | ConnectionStatus::Connecting
        ) {
            log::debug!("[Connection] Already {:?}, ignoring open", self.state.status);
            return Ok(false);
        }
        self.credential = Some(credential.into());
        self.state.attempt = 0;
        self.connect_with_stored_credential()?;
        Ok(true)
    }

    /// Connect again with the credential from the last `open`.
    pub fn reconnect(&mut self) -> Result<()> {
        self.connect_with_stored_credential()
    }

    fn connect_with_stored_credential(&mut self) -> Result<()> {
        let token = self.credential.as_deref().ok_or(SyncError::MissingCredential)?;
        let url = build_url(&self.server_url, &self.endpoint_path, token)?;

        log::info!("[Connection] Connecting to {}", redact_token(&url));
        self.state.status = ConnectionStatus::Connecting;
        if let Err(e) = self.transport.connect(&url) {
            self.state.status = ConnectionStatus::Idle;
            self.state.last_error = Some(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Serialize and send an envelope.
    ///
    /// Returns `false` (and logs) when the socket is not open or the transport
    /// refuses the frame. Nothing is queued.
    pub fn send(&mut self, envelope: &Envelope) -> bool {
        if !self.is_open() {
            log::warn!(
                "[Connection] Not open ({:?}), dropping outbound '{}'",
                self.state.status,
                envelope.message_type
            );
            return false;
        }

        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                log::warn!("[Connection] Failed to serialize '{}': {}", envelope.message_type, e);
                return false;
            }
        };

        match self.transport.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[Connection] Send failed: {}", e);
                false
            }
        }
    }

    /// Close on purpose. Clears the credential so nothing reconnects.
    pub fn close(&mut self, reason: &str) {
        self.credential = None;
        if self.state.status == ConnectionStatus::Idle {
            return;
        }
        log::info!("[Connection] Closing: {}", reason);
        self.transport.close(CLOSE_NORMAL, reason);
        self.state.status = ConnectionStatus::Idle;
        self.state.attempt = 0;
    }

    /// Drop a socket the client no longer trusts, keeping the credential.
    pub fn force_close(&mut self, code: u16, reason: &str) {
        log::warn!("[Connection] Force closing ({}): {}", code, reason);
        self.transport.close(code, reason);
        self.state.last_error = Some(reason.to_string());
    }

    /// Record a completed handshake.
    pub fn on_opened(&mut self) {
        log::info!("[Connection] Open");
        self.state.status = ConnectionStatus::Open;
        self.state.attempt = 0;
        self.state.last_error = None;
    }

    /// Record a transport error.
    pub fn on_error(&mut self, error: &str) {
        log::warn!("[Connection] Transport error: {}", error);
        self.state.last_error = Some(error.to_string());
    }

    /// Classify a close reported by the transport.
    pub fn on_closed(&mut self, code: u16, reason: &str) -> CloseDisposition {
        if matches!(
            self.state.status,
            ConnectionStatus::Idle | ConnectionStatus::Failed
        ) {
            log::debug!("[Connection] Close {} after local close, ignoring", code);
            return CloseDisposition::Ignored;
        }

        if is_normal_close(code) {
            log::info!("[Connection] Closed normally ({})", code);
            self.state.status = ConnectionStatus::Idle;
            return CloseDisposition::Normal;
        }

        log::warn!("[Connection] Closed unexpectedly ({}): {}", code, reason);
        if !reason.is_empty() {
            self.state.last_error = Some(reason.to_string());
        }
        CloseDisposition::Abnormal
    }

    /// Waiting before reconnection attempt `attempt`.
    pub fn set_reconnecting(&mut self, attempt: u32) {
        self.state.status = ConnectionStatus::Reconnecting;
        self.state.attempt = attempt;
    }

    /// Abnormal close with nothing to reconnect with.
    pub fn set_idle(&mut self) {
        self.state.status = ConnectionStatus::Idle;
    }

    /// Give up until the next explicit `open`.
    pub fn set_failed(&mut self, error: impl Into<String>) {
        self.state.status = ConnectionStatus::Failed;
        self.state.last_error = Some(error.into());
    }

    /// Record an error reported by the server in an `error` frame.
    pub fn set_last_error(&mut self, error: impl Into<String>) {
        self.state.last_error = Some(error.into());
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server_url", &self.server_url)
            .field("endpoint_path", &self.endpoint_path)
            .field("has_credential", &self.credential.is_some())
            .field("state", &self.state)
            .finish()
    }
}

/// Build the endpoint URL: `server_url` + `endpoint_path` + `?token=<credential>`.
///
/// `http`/`https` bases are mapped to `ws`/`wss`.
pub fn build_url(server_url: &str, endpoint_path: &str, token: &str) -> Result<Url> {
    let mut url = Url::parse(server_url).map_err(|e| SyncError::InvalidUrl {
        url: server_url.to_string(),
        source: e,
    })?;

    let scheme = match url.scheme() {
        "http" => Some("ws"),
        "https" => Some("wss"),
        _ => None,
    };
    if let Some(scheme) = scheme
        && url.set_scheme(scheme).is_err()
    {
        log::warn!("[Connection] Could not switch {} to {}", server_url, scheme);
    }

    let endpoint = endpoint_path.trim_start_matches('/');
    if !endpoint.is_empty() {
        let path = format!("{}/{}", url.path().trim_end_matches('/'), endpoint);
        url.set_path(&path);
    }

    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// URL for logs, without the credential.
fn redact_token(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
