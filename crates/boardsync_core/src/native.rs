//! Native driver: runs a [`RealtimeClient`] on tokio.
//!
//! The driver is a single task that serializes the three inputs of the
//! client: socket events from [`WebSocketTransport`], the scheduler's next
//! deadline and a shutdown signal.
//!
//! # Example
//!
//! ```ignore
//! use boardsync_core::native::{native_client, run};
//!
//! let (client, events) = native_client(config);
//! client.open(token)?;
//! let exit = run(client, events, async { tokio::signal::ctrl_c().await.ok(); }).await;
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::client::RealtimeClient;
use crate::config::RealtimeConfig;
use crate::transport::{ConnectionStatus, TransportEvent, WebSocketTransport};

/// How long to sleep when no timer is armed.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Why [`run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverExit {
    /// The shutdown future completed; the client was closed.
    Shutdown,
    /// Reconnection attempts were exhausted.
    Failed(Option<String>),
    /// The event channel closed because every sender was dropped.
    ///
    /// Never happens with the receiver from [`native_client`], whose sender
    /// lives as long as the client. A host feeding [`run`] from its own
    /// channel gets this when it drops the sending side.
    TransportGone,
}

/// Build a client wired to a [`WebSocketTransport`], plus the event receiver
/// to pass to [`run`].
pub fn native_client(
    config: RealtimeConfig,
) -> (RealtimeClient, mpsc::UnboundedReceiver<TransportEvent>) {
    let (transport, events) = WebSocketTransport::new();
    (RealtimeClient::new(config, Box::new(transport)), events)
}

/// Drive the client until shutdown, failure or loss of the event channel.
pub async fn run<F>(
    client: RealtimeClient,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    shutdown: F,
) -> DriverExit
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    log::debug!("[Driver] Started");

    loop {
        let deadline = client.next_deadline();
        let wake_at = deadline.unwrap_or_else(|| Instant::now() + IDLE_WAIT);
        let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(wake_at));

        tokio::select! {
            _ = &mut shutdown => {
                log::info!("[Driver] Shutdown requested");
                client.close("Client shutting down");
                return DriverExit::Shutdown;
            }
            event = events.recv() => match event {
                Some(event) => client.handle_transport_event(event, Instant::now()),
                None => {
                    log::warn!("[Driver] Transport event channel closed");
                    return DriverExit::TransportGone;
                }
            },
            _ = sleep, if deadline.is_some() => client.tick(Instant::now()),
        }

        let state = client.connection_state();
        if state.status == ConnectionStatus::Failed {
            log::error!("[Driver] Connection failed: {:?}", state.last_error);
            return DriverExit::Failed(state.last_error);
        }
    }
}
