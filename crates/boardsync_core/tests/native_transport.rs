//! Integration tests for the tokio WebSocket transport against a local server

use std::sync::{Arc, Mutex};
use std::time::Duration;

use boardsync_core::config::RealtimeConfig;
use boardsync_core::native::{DriverExit, native_client, run};
use boardsync_core::reconcile::EntityKind;
use boardsync_core::rooms::RoomId;
use boardsync_core::transport::{Transport, TransportEvent, WebSocketTransport};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

/// Accept one socket, record every text frame and run `script` on it.
async fn serve_once<F, Fut>(script: F) -> (String, mpsc::UnboundedReceiver<Value>)
where
    F: FnOnce(
            tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
            mpsc::UnboundedSender<Value>,
        ) -> Fut
        + Send
        + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(socket, seen_tx).await;
    });

    (format!("ws://{}", addr), seen_rx)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

fn text_of(message: Message) -> Option<Value> {
    match message {
        Message::Text(text) => serde_json::from_str(text.as_str()).ok(),
        _ => None,
    }
}

#[tokio::test]
async fn test_transport_open_send_receive_close() {
    let (server, mut seen) = serve_once(|mut socket, seen| async move {
        if let Some(Ok(message)) = socket.next().await
            && let Some(value) = text_of(message)
        {
            seen.send(value).ok();
        }
        socket
            .send(Message::text(
                r#"{"type":"connection_established","timestamp":"2024-05-01T10:00:00Z"}"#,
            ))
            .await
            .unwrap();
        socket
            .close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "restarting".into(),
            }))
            .await
            .ok();
    })
    .await;

    let (mut transport, mut events) = WebSocketTransport::new();
    transport
        .connect(&Url::parse(&server).unwrap())
        .unwrap();

    assert_eq!(next_event(&mut events).await, TransportEvent::Opened);
    transport
        .send_text(json!({"type": "heartbeat", "message": "ping"}).to_string())
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), seen.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received["message"], "ping");

    match next_event(&mut events).await {
        TransportEvent::Message(raw) => assert!(raw.contains("connection_established")),
        other => panic!("expected message, got {:?}", other),
    }
    match next_event(&mut events).await {
        TransportEvent::Closed { code, reason } => {
            assert_eq!(code, 1001);
            assert_eq!(reason, "restarting");
        }
        other => panic!("expected close, got {:?}", other),
    }
}

#[tokio::test]
async fn test_connection_refused_reports_abnormal_close() {
    // Bind and drop to get a port nothing listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let (mut transport, mut events) = WebSocketTransport::new();
    transport
        .connect(&Url::parse(&format!("ws://{}", addr)).unwrap())
        .unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Error(_)
    ));
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Closed { code: 1006, .. }
    ));
}

#[test]
fn test_connect_without_runtime_fails() {
    let (mut transport, _events) = WebSocketTransport::new();
    let url = Url::parse("ws://127.0.0.1:1").unwrap();
    assert!(transport.connect(&url).is_err());
    assert!(transport.send_text("{}".to_string()).is_err());
}

#[tokio::test]
async fn test_driver_joins_rooms_and_reconciles_pushes() {
    let (server, mut seen) = serve_once(|mut socket, seen| async move {
        // Wait for the room replay before pushing
        while let Some(Ok(message)) = socket.next().await {
            if let Some(value) = text_of(message) {
                let joined = value["type"] == "join_room";
                seen.send(value).ok();
                if joined {
                    break;
                }
            }
        }
        let push = json!({
            "type": "task_created",
            "timestamp": "2024-05-01T10:00:00Z",
            "roomId": "project:42",
            "data": {"task_id": 11, "title": "Wire it up", "status": "todo"}
        });
        socket.send(Message::text(push.to_string())).await.unwrap();
        // Keep the socket open until the client leaves
        while let Some(Ok(message)) = socket.next().await {
            if message.is_close() {
                break;
            }
        }
    })
    .await;

    let (client, events) = native_client(RealtimeConfig::new(server));
    client.join(RoomId::project(42));

    let (done_tx, done_rx) = oneshot::channel::<()>();
    let done = Arc::new(Mutex::new(Some(done_tx)));
    client.register_handler(
        "task_created",
        Arc::new(move |_| {
            if let Some(tx) = done.lock().unwrap().take() {
                tx.send(()).ok();
            }
        }),
    );

    client.open("token").unwrap();
    let exit = tokio::time::timeout(
        Duration::from_secs(5),
        run(client.clone(), events, async {
            done_rx.await.ok();
        }),
    )
    .await
    .unwrap();

    assert_eq!(exit, DriverExit::Shutdown);
    let join = seen.recv().await.unwrap();
    assert_eq!(join["type"], "join_room");
    assert_eq!(join["room_id"], "project:42");

    let task = client.entity(EntityKind::Task, "11").unwrap();
    assert_eq!(task.get("title"), Some(&json!("Wire it up")));
    assert!(client.next_deadline().is_none());
    assert!(client.last_message().is_some());
}

#[tokio::test]
async fn test_driver_stops_when_its_event_source_is_dropped() {
    let (client, _transport_events) = native_client(RealtimeConfig::default());
    let (feed, events) = mpsc::unbounded_channel::<TransportEvent>();
    drop(feed);

    let exit = tokio::time::timeout(
        Duration::from_secs(5),
        run(client, events, std::future::pending()),
    )
    .await
    .unwrap();
    assert_eq!(exit, DriverExit::TransportGone);
}
