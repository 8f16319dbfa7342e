//! Native WebSocket transport over tokio-tungstenite.
//!
//! Each `connect` spawns one socket task on the current tokio runtime. Events
//! from the task are forwarded on an unbounded channel, tagged with the
//! generation of the socket that produced them; once a socket is replaced or
//! closed its generation is stale and its events are discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use super::{CLOSE_ABNORMAL, Transport, TransportEvent};
use crate::error::{Result, SyncError};

/// Close code reported when the peer closed without a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// WebSocket transport for native targets.
pub struct WebSocketTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    generation: Arc<AtomicU64>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Create a transport and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            events,
            generation: Arc::new(AtomicU64::new(0)),
            outgoing: None,
            task: None,
        };
        (transport, rx)
    }

    /// Invalidate the current socket so its remaining events are dropped.
    fn retire_current(&mut self) -> u64 {
        self.outgoing = None;
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Transport for WebSocketTransport {
    fn connect(&mut self, url: &Url) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Transport(format!("no tokio runtime: {}", e)))?;

        let generation = self.retire_current();
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.outgoing = Some(outgoing_tx);

        let emitter = Emitter {
            generation,
            current: Arc::clone(&self.generation),
            events: self.events.clone(),
        };
        self.task = Some(runtime.spawn(run_socket(url.to_string(), emitter, outgoing_rx)));
        Ok(())
    }

    fn send_text(&mut self, text: String) -> Result<()> {
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| SyncError::Transport("socket is not connected".to_string()))?;
        outgoing
            .send(Message::Text(text.into()))
            .map_err(|_| SyncError::Transport("socket task has ended".to_string()))
    }

    fn close(&mut self, code: u16, reason: &str) {
        let outgoing = self.outgoing.take();
        self.retire_current();

        // The task exits after flushing the close frame
        if let Some(outgoing) = outgoing {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            };
            let _ = outgoing.send(Message::Close(Some(frame)));
        }
        self.task = None;
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.retire_current();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Forwards events only while its socket is the current one.
struct Emitter {
    generation: u64,
    current: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Emitter {
    fn emit(&self, event: TransportEvent) {
        if self.current.load(Ordering::SeqCst) != self.generation {
            log::trace!("[WebSocket] Dropping event from stale socket: {:?}", event);
            return;
        }
        let _ = self.events.send(event);
    }

    fn fail(&self, error: String) {
        self.emit(TransportEvent::Error(error));
        self.emit(TransportEvent::Closed {
            code: CLOSE_ABNORMAL,
            reason: String::new(),
        });
    }
}

async fn run_socket(
    url: String,
    emitter: Emitter,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
) {
    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            log::debug!("[WebSocket] Handshake failed: {}", e);
            emitter.fail(e.to_string());
            return;
        }
    };
    emitter.emit(TransportEvent::Opened);

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            outbound = outgoing.recv() => match outbound {
                Some(message) => {
                    let is_close = matches!(message, Message::Close(_));
                    if let Err(e) = write.send(message).await {
                        emitter.fail(e.to_string());
                        return;
                    }
                    if is_close {
                        return;
                    }
                }
                None => {
                    let _ = write.close().await;
                    return;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    emitter.emit(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    emitter.emit(TransportEvent::Closed { code, reason });
                    return;
                }
                // Ping/pong are answered by tungstenite; binary frames are not part of the protocol
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emitter.fail(e.to_string());
                    return;
                }
                None => {
                    emitter.emit(TransportEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: String::new(),
                    });
                    return;
                }
            },
        }
    }
}
