use std::sync::Arc;

use agent_console::events::{RunEvent, StreamEvent, StreamEventKind};
use agent_console::location::PageLocation;
use agent_console::testing::{FakeConnector, InMemoryBackend, RecordingNotifier};
use agent_console::{
    AcquireMode, ConsoleContext, ConsoleError, RunStatus, SessionId, SessionManager,
    StreamConnection, StreamEndpoint, TeardownReason,
};
use serde_json::json;
use url::Url;

const USER: &str = "margaret@example.com";

struct Harness {
    manager: SessionManager<InMemoryBackend, FakeConnector>,
    connector: FakeConnector,
    backend: InMemoryBackend,
}

async fn harness(names: &[&str]) -> Harness {
    let backend = InMemoryBackend::with_sessions(USER, names);
    let connector = FakeConnector::new();
    let page = Url::parse("http://localhost:8081/").expect("page url");
    let context = ConsoleContext::new(
        connector.clone(),
        StreamEndpoint::new("http://localhost:8081/api", page.clone()),
    );
    let mut manager = SessionManager::new(
        backend.clone(),
        context,
        Arc::new(RecordingNotifier::new()),
        USER,
        PageLocation::new(page),
    );
    manager.start().await.expect("start");
    Harness {
        manager,
        connector,
        backend,
    }
}

fn status_event(session: i64, run_id: &str, status: &str) -> StreamEvent {
    let event = RunEvent::from_value(json!({"type": "system", "status": status})).expect("event");
    StreamEvent::new(SessionId(session), run_id, StreamEventKind::Run(event))
}

#[tokio::test]
async fn active_runs_stay_mounted_while_hidden() {
    let Harness {
        mut manager,
        connector,
        ..
    } = harness(&["research", "writing"]).await;

    manager.select(SessionId(1)).await.expect("select A");
    manager
        .acquire(SessionId(1), "run-a", AcquireMode::Reuse)
        .expect("acquire A");
    assert_eq!(
        manager.apply_stream_event(&status_event(1, "run-a", "active")),
        Some(RunStatus::Active)
    );

    manager.select(SessionId(2)).await.expect("select B");
    manager
        .acquire(SessionId(2), "run-b", AcquireMode::Reuse)
        .expect("acquire B");

    let views = manager.views();
    let mounted: Vec<(Option<SessionId>, bool)> = views
        .iter()
        .map(|view| (view.session.id, view.visible))
        .collect();
    assert_eq!(
        mounted,
        vec![(Some(SessionId(1)), false), (Some(SessionId(2)), true)]
    );
    assert_eq!(views[0].status, Some(RunStatus::Active));
    assert_eq!(connector.open_for(SessionId(1)), 1);
    assert_eq!(connector.open_for(SessionId(2)), 1);
}

#[tokio::test]
async fn finished_runs_unmount_when_hidden() {
    let Harness { mut manager, .. } = harness(&["research", "writing"]).await;

    manager
        .acquire(SessionId(1), "run-a", AcquireMode::Reuse)
        .expect("acquire A");
    manager.apply_stream_event(&status_event(1, "run-a", "active"));
    manager.select(SessionId(2)).await.expect("select B");
    assert_eq!(manager.views().len(), 2);

    let finished = RunEvent::from_value(json!({"type": "completion", "status": "complete"}))
        .expect("completion");
    manager.apply_stream_event(&StreamEvent::new(
        SessionId(1),
        "run-a",
        StreamEventKind::Run(finished),
    ));

    let views = manager.views();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].session.id, Some(SessionId(2)));
    assert_eq!(manager.status(SessionId(1)), Some(RunStatus::Complete));
}

#[tokio::test]
async fn unload_closes_every_connection_despite_failures() {
    let Harness {
        mut manager,
        connector,
        ..
    } = harness(&["research", "writing"]).await;

    let a = manager
        .acquire(SessionId(1), "run-a", AcquireMode::Reuse)
        .expect("acquire A")
        .expect("connection A");
    let b = manager
        .acquire(SessionId(2), "run-b", AcquireMode::Reuse)
        .expect("acquire B")
        .expect("connection B");
    a.fail_close("already torn down");

    let failures = manager.teardown(TeardownReason::Unload);

    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0],
        ConsoleError::ConnectionClose { session_id: 1, .. }
    ));
    assert!(!b.is_open());
    assert_eq!(b.close_calls(), 1);
    assert_eq!(connector.open_for(SessionId(2)), 0);
    assert!(manager.context().broker.cache().is_empty());
}

#[tokio::test]
async fn deleting_a_session_closes_its_connection() {
    let Harness {
        mut manager,
        backend,
        ..
    } = harness(&["research", "writing"]).await;

    let connection = manager
        .acquire(SessionId(2), "run-b", AcquireMode::Reuse)
        .expect("acquire")
        .expect("connection");
    manager.apply_stream_event(&status_event(2, "run-b", "active"));

    manager.delete(SessionId(2)).await.expect("delete");

    assert!(!connection.is_open());
    assert_eq!(manager.status(SessionId(2)), None);
    assert!(manager.context().broker.cache().is_empty());
    assert_eq!(backend.sessions().len(), 1);
}

#[tokio::test]
async fn events_from_a_replaced_run_are_ignored() {
    let Harness { mut manager, .. } = harness(&["research"]).await;

    manager
        .acquire(SessionId(1), "run-old", AcquireMode::Reuse)
        .expect("acquire old");
    manager
        .acquire(SessionId(1), "run-new", AcquireMode::Reuse)
        .expect("acquire new");

    assert_eq!(
        manager.apply_stream_event(&status_event(1, "run-old", "error")),
        None
    );
    assert_eq!(manager.status(SessionId(1)), None);

    assert_eq!(
        manager.apply_stream_event(&status_event(1, "run-new", "awaiting_input")),
        Some(RunStatus::AwaitingInput)
    );
}

#[tokio::test]
async fn stream_urls_follow_the_page_scheme() {
    let backend = InMemoryBackend::with_sessions(USER, &["research"]);
    let connector = FakeConnector::new();
    let page = Url::parse("https://console.example.com/").expect("page url");
    let context = ConsoleContext::new(
        connector.clone(),
        StreamEndpoint::new("/api", page.clone()),
    );
    let mut manager = SessionManager::new(
        backend,
        context,
        Arc::new(RecordingNotifier::new()),
        USER,
        PageLocation::new(page),
    );
    manager.start().await.expect("start");

    manager
        .acquire(SessionId(1), "run-9", AcquireMode::Reuse)
        .expect("acquire");

    assert_eq!(
        connector.urls(),
        vec!["wss://console.example.com/api/ws/runs/run-9".to_string()]
    );
}

#[tokio::test]
async fn failed_delete_keeps_a_live_run_mounted() {
    let Harness {
        mut manager,
        backend,
        ..
    } = harness(&["research", "writing"]).await;

    manager
        .acquire(SessionId(2), "run-b", AcquireMode::Reuse)
        .expect("acquire")
        .expect("connection");
    manager.apply_stream_event(&status_event(2, "run-b", "active"));
    assert_eq!(manager.views().len(), 2);

    backend.fail("delete_session");
    assert!(manager.delete(SessionId(2)).await.is_err());

    assert_eq!(manager.directory().sessions().len(), 2);
    assert_eq!(manager.status(SessionId(2)), Some(RunStatus::Active));
    let views = manager.views();
    assert_eq!(views.len(), 2);
    assert!(views
        .iter()
        .any(|view| view.session.id == Some(SessionId(2)) && !view.visible));
}
