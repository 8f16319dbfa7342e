//! `watch` command: connect, join rooms and print what the server pushes.

use std::path::Path;
use std::sync::Arc;

use boardsync_core::client::ClientEvent;
use boardsync_core::config::RealtimeConfig;
use boardsync_core::native::{DriverExit, native_client, run};
use boardsync_core::reconcile::{ChangeKind, EntityChange};
use boardsync_core::rooms::RoomId;
use boardsync_core::router::PresenceUpdate;
use boardsync_core::transport::ConnectionStatus;

/// Returns true on a clean shutdown, false on error
pub fn handle_watch(
    config_path: &Path,
    server: Option<String>,
    token: &str,
    rooms: &[String],
    json: bool,
) -> bool {
    let mut config = RealtimeConfig::load_from_or_default(config_path);
    if let Some(server) = server {
        config.server_url = server;
    }

    let rooms = match parse_rooms(rooms) {
        Ok(rooms) => rooms,
        Err(e) => {
            eprintln!("✗ {}", e);
            return false;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("✗ Failed to start async runtime: {}", e);
            return false;
        }
    };

    log::debug!("[Watch] Joining {} room(s)", rooms.len());
    println!("Connecting to {} ...", config.server_url);

    let exit = runtime.block_on(async {
        let (client, events) = native_client(config);

        for room in rooms {
            client.join(room);
        }

        client.subscribe_events(Arc::new(print_event));
        client.subscribe_all(Arc::new(move |change| print_change(change, json)));

        if let Err(e) = client.open(token) {
            eprintln!("✗ {}", e);
            return DriverExit::Failed(Some(e.to_string()));
        }

        run(client, events, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            println!("\nShutting down...");
        })
        .await
    });

    match exit {
        DriverExit::Shutdown => {
            println!("Stopped.");
            true
        }
        DriverExit::Failed(reason) => {
            eprintln!(
                "✗ Connection failed: {}",
                reason.unwrap_or_else(|| "unknown error".to_string())
            );
            false
        }
        DriverExit::TransportGone => {
            eprintln!("✗ Transport stopped unexpectedly");
            false
        }
    }
}

fn parse_rooms(rooms: &[String]) -> boardsync_core::Result<Vec<RoomId>> {
    rooms.iter().map(|room| RoomId::parse(room)).collect()
}

fn stamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::StatusChanged(state) => match state.status {
            ConnectionStatus::Reconnecting => println!(
                "[{}] ~ reconnecting (attempt {})",
                stamp(),
                state.attempt
            ),
            ConnectionStatus::Failed => println!(
                "[{}] ✗ failed: {}",
                stamp(),
                state.last_error.as_deref().unwrap_or("unknown error")
            ),
            status => println!("[{}] ~ {:?}", stamp(), status),
        },
        ClientEvent::Ready { rooms } => {
            println!("[{}] ✓ connected, joined {} room(s)", stamp(), rooms)
        }
        ClientEvent::ServerError { message } => {
            println!("[{}] ✗ server error: {}", stamp(), message)
        }
        ClientEvent::Notify(notification) => println!(
            "[{}] ! {}: {}",
            stamp(),
            notification.title,
            notification.body
        ),
        ClientEvent::RoomJoined { room_id } => println!(
            "[{}]   joined {}",
            stamp(),
            room_id.as_deref().unwrap_or("room")
        ),
        ClientEvent::RoomLeft { room_id } => println!(
            "[{}]   left {}",
            stamp(),
            room_id.as_deref().unwrap_or("room")
        ),
        ClientEvent::Presence(update) => println!("[{}]   {}", stamp(), describe_presence(update)),
        ClientEvent::PresenceCleared => println!("[{}]   presence reset", stamp()),
    }
}

fn describe_presence(update: &PresenceUpdate) -> String {
    match update {
        PresenceUpdate::Online { user_id } => format!("user {} is online", user_id),
        PresenceUpdate::Offline { user_id } => format!("user {} went offline", user_id),
        PresenceUpdate::Typing {
            project_id,
            user_id,
        } => format!("user {} is typing in project {}", user_id, project_id),
        PresenceUpdate::StopTyping {
            project_id,
            user_id,
        } => format!("user {} stopped typing in project {}", user_id, project_id),
    }
}

fn print_change(change: &EntityChange, pretty: bool) {
    let verb = match &change.change {
        ChangeKind::Created => "created".to_string(),
        ChangeKind::Updated => "updated".to_string(),
        ChangeKind::Deleted => "deleted".to_string(),
        ChangeKind::RolledBack { reason } => format!("rolled back ({})", reason),
    };
    let fields = change
        .record
        .as_ref()
        .and_then(|record| {
            if pretty {
                serde_json::to_string_pretty(&record.fields).ok()
            } else {
                serde_json::to_string(&record.fields).ok()
            }
        })
        .unwrap_or_default();
    println!(
        "[{}] + {} {} {} {}",
        stamp(),
        change.kind,
        change.id,
        verb,
        fields
    );
}
