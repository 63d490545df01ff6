use std::sync::Arc;
use std::time::Duration;

use agent_console::events::{RunCommand, RunEvent, StreamEvent, StreamEventKind};
use agent_console::location::PageLocation;
use agent_console::testing::{InMemoryBackend, RecordingNotifier};
use agent_console::ws::WsConnector;
use agent_console::{
    AcquireMode, ConsoleContext, RunStatus, SessionId, SessionManager, StreamConnection,
    StreamEndpoint, TeardownReason,
};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const USER: &str = "barbara@example.com";

type Seen = mpsc::UnboundedSender<String>;

async fn run_stream(
    ws: WebSocketUpgrade,
    Path(run_id): Path<String>,
    State(seen): State<Seen>,
) -> Response {
    ws.on_upgrade(move |socket| serve_run(socket, run_id, seen))
}

/// `scripted` runs answer a start command with an active status and a
/// completion; any other run idles until the client hangs up.
async fn serve_run(mut socket: WebSocket, run_id: String, seen: Seen) {
    if run_id != "scripted" {
        while let Some(Ok(message)) = socket.recv().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
        let _ = seen.send(format!("{run_id} closed"));
        return;
    }

    if let Some(Ok(Message::Text(text))) = socket.recv().await {
        let _ = seen.send(text);
    }
    let replies = [
        json!({"type": "system", "status": "active"}),
        json!({"type": "message", "data": {"source": "planner", "content": "working"}}),
        json!({"type": "completion", "status": "complete", "data": {"task_result": "done"}}),
    ];
    for reply in replies {
        if socket.send(Message::Text(reply.to_string())).await.is_err() {
            return;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn spawn_stream_server() -> (String, mpsc::UnboundedReceiver<String>) {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/api/ws/runs/:run_id", get(run_stream))
        .with_state(seen_tx);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stream listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stream server");
    });
    (format!("{addr}"), seen_rx)
}

fn manager(
    addr: &str,
    connector: WsConnector,
) -> SessionManager<InMemoryBackend, WsConnector> {
    let page = url::Url::parse(&format!("http://{addr}/")).expect("page url");
    let context = ConsoleContext::new(
        connector,
        StreamEndpoint::new(format!("http://{addr}/api"), page.clone()),
    );
    SessionManager::new(
        InMemoryBackend::with_sessions(USER, &["streaming"]),
        context,
        Arc::new(RecordingNotifier::new()),
        USER,
        PageLocation::new(page),
    )
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event before timeout")
        .expect("event channel open")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_events_drive_the_status_registry() {
    let (addr, mut seen) = spawn_stream_server().await;
    let (connector, mut events) = WsConnector::channel();
    let mut manager = manager(&addr, connector);
    manager.start().await.expect("start");

    let connection = manager
        .acquire(SessionId(1), "scripted", AcquireMode::Reuse)
        .expect("acquire")
        .expect("connection");
    connection
        .send(&RunCommand::start("scripted", "Summarize the quarterly report"))
        .expect("queue start");

    let mut kinds = Vec::new();
    let mut statuses = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        if let Some(status) = manager.apply_stream_event(&event) {
            statuses.push(status);
        }
        let closed = event.kind == StreamEventKind::Closed;
        kinds.push(event.kind);
        if closed {
            break;
        }
    }

    assert_eq!(statuses, vec![RunStatus::Active, RunStatus::Complete]);
    assert_eq!(kinds.first(), Some(&StreamEventKind::Opened));
    assert!(kinds.iter().any(|kind| matches!(
        kind,
        StreamEventKind::Run(RunEvent::Message { .. })
    )));
    assert_eq!(manager.status(SessionId(1)), Some(RunStatus::Complete));
    assert!(!connection.is_open());

    let start: Value = serde_json::from_str(&seen.recv().await.expect("start command"))
        .expect("start json");
    assert_eq!(
        start,
        json!({"type": "start", "id": "scripted", "task": "Summarize the quarterly report"})
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn teardown_hangs_up_open_streams() {
    let (addr, mut seen) = spawn_stream_server().await;
    let (connector, mut events) = WsConnector::channel();
    let mut manager = manager(&addr, connector);
    manager.start().await.expect("start");

    let connection = manager
        .acquire(SessionId(1), "idle", AcquireMode::Reuse)
        .expect("acquire")
        .expect("connection");
    assert_eq!(next_event(&mut events).await.kind, StreamEventKind::Opened);

    let reused = manager
        .acquire(SessionId(1), "idle", AcquireMode::ExistingOnly)
        .expect("acquire")
        .expect("existing");
    assert_eq!(reused.session_id(), connection.session_id());

    assert!(manager.teardown(TeardownReason::Unmount).is_empty());
    assert!(!connection.is_open());
    assert_eq!(next_event(&mut events).await.kind, StreamEventKind::Closed);

    let closed = tokio::time::timeout(Duration::from_secs(5), seen.recv())
        .await
        .expect("server saw close");
    assert_eq!(closed.as_deref(), Some("idle closed"));
}
