//! In-memory stand-ins for the backend, the stream connector and the
//! notifier. Used by the crate's own tests and by embedders testing against
//! the manager without a server.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use agent_console_error::ConsoleError;
use agent_console_settings::{AgentSettings, ConfigInfo};
use async_trait::async_trait;

use crate::backend::{SessionBackend, SettingsBackend};
use crate::connection::{Connector, StreamConnection};
use crate::notify::Notifier;
use crate::session::{Session, SessionId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct FakeConnectionInner {
    id: u64,
    run_id: String,
    open: AtomicBool,
    close_calls: AtomicUsize,
    close_error: Mutex<Option<String>>,
}

/// Connection that only tracks whether it was closed.
#[derive(Debug, Clone)]
pub struct FakeConnection {
    inner: Arc<FakeConnectionInner>,
}

impl FakeConnection {
    pub fn new(id: u64, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(FakeConnectionInner {
                id,
                run_id: run_id.into(),
                open: AtomicBool::new(true),
                close_calls: AtomicUsize::new(0),
                close_error: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Makes every later `close` fail with `message`; the connection stays open.
    pub fn fail_close(&self, message: impl Into<String>) {
        *lock(&self.inner.close_error) = Some(message.into());
    }

    /// Simulates the server dropping the connection.
    pub fn drop_remote(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }
}

impl StreamConnection for FakeConnection {
    fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), ConsoleError> {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.inner.close_error).clone() {
            return Err(ConsoleError::stream(message));
        }
        self.inner.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakeConnectorState {
    opened: Vec<(SessionId, String, FakeConnection)>,
}

/// Connector handing out [`FakeConnection`]s and remembering every open.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    next_id: Arc<AtomicU64>,
    state: Arc<Mutex<FakeConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opened.len()
    }

    pub fn opened(&self) -> Vec<FakeConnection> {
        lock(&self.state)
            .opened
            .iter()
            .map(|(_, _, connection)| connection.clone())
            .collect()
    }

    pub fn urls(&self) -> Vec<String> {
        lock(&self.state)
            .opened
            .iter()
            .map(|(_, url, _)| url.clone())
            .collect()
    }

    /// Connections opened for `session_id` that are still open.
    pub fn open_for(&self, session_id: SessionId) -> usize {
        lock(&self.state)
            .opened
            .iter()
            .filter(|(id, _, connection)| *id == session_id && connection.is_open())
            .count()
    }
}

impl Connector for FakeConnector {
    type Connection = FakeConnection;

    fn open(
        &self,
        url: &str,
        session_id: SessionId,
        run_id: &str,
    ) -> Result<FakeConnection, ConsoleError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let connection = FakeConnection::new(id, run_id);
        lock(&self.state)
            .opened
            .push((session_id, url.to_string(), connection.clone()));
        Ok(connection)
    }
}

#[derive(Debug, Default)]
struct BackendState {
    sessions: Vec<Session>,
    next_id: i64,
    calls: HashMap<&'static str, usize>,
    failing: HashSet<&'static str>,
    settings: HashMap<String, AgentSettings>,
    config_info: Option<ConfigInfo>,
}

impl BackendState {
    fn record(&mut self, operation: &'static str) -> Result<(), ConsoleError> {
        *self.calls.entry(operation).or_insert(0) += 1;
        if self.failing.contains(operation) {
            return Err(ConsoleError::Backend {
                status: Some(500),
                message: format!("{operation} failed"),
            });
        }
        Ok(())
    }
}

/// Backend keeping sessions and settings in memory. Operation names used
/// by [`InMemoryBackend::fail`] and [`InMemoryBackend::calls`] match the
/// trait method names.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with sessions named `names` for `user_id`, in order.
    pub fn with_sessions(user_id: &str, names: &[&str]) -> Self {
        let backend = Self::new();
        for name in names {
            backend.insert(user_id, Session::draft(*name));
        }
        backend
    }

    /// Appends a persisted copy of `session` and returns it.
    pub fn insert(&self, user_id: &str, mut session: Session) -> Session {
        let mut state = lock(&self.state);
        state.next_id += 1;
        session.id = Some(SessionId(state.next_id));
        session.user_id = Some(user_id.to_string());
        state.sessions.push(session.clone());
        session
    }

    pub fn fail(&self, operation: &'static str) {
        lock(&self.state).failing.insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        lock(&self.state).failing.remove(operation);
    }

    pub fn calls(&self, operation: &str) -> usize {
        lock(&self.state).calls.get(operation).copied().unwrap_or(0)
    }

    pub fn sessions(&self) -> Vec<Session> {
        lock(&self.state).sessions.clone()
    }

    pub fn set_config_info(&self, info: ConfigInfo) {
        lock(&self.state).config_info = Some(info);
    }
}

fn owned_by(session: &Session, user_id: &str) -> bool {
    session.user_id.as_deref() == Some(user_id)
}

#[async_trait]
impl SessionBackend for InMemoryBackend {
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, ConsoleError> {
        let mut state = lock(&self.state);
        state.record("list_sessions")?;
        Ok(state
            .sessions
            .iter()
            .filter(|session| owned_by(session, user_id))
            .cloned()
            .collect())
    }

    async fn get_session(
        &self,
        id: SessionId,
        user_id: &str,
    ) -> Result<Option<Session>, ConsoleError> {
        let mut state = lock(&self.state);
        state.record("get_session")?;
        Ok(state
            .sessions
            .iter()
            .find(|session| session.id == Some(id) && owned_by(session, user_id))
            .cloned())
    }

    async fn create_session(
        &self,
        session: &Session,
        user_id: &str,
    ) -> Result<Session, ConsoleError> {
        let mut state = lock(&self.state);
        state.record("create_session")?;
        state.next_id += 1;
        let mut created = session.clone();
        created.id = Some(SessionId(state.next_id));
        created.user_id = Some(user_id.to_string());
        state.sessions.insert(0, created.clone());
        Ok(created)
    }

    async fn update_session(
        &self,
        id: SessionId,
        session: &Session,
        user_id: &str,
    ) -> Result<Session, ConsoleError> {
        let mut state = lock(&self.state);
        state.record("update_session")?;
        let stored = state
            .sessions
            .iter_mut()
            .find(|candidate| candidate.id == Some(id) && owned_by(candidate, user_id))
            .ok_or(ConsoleError::SessionNotFound { session_id: id.0 })?;
        let mut updated = session.clone();
        updated.id = Some(id);
        updated.user_id = Some(user_id.to_string());
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_session(&self, id: SessionId, user_id: &str) -> Result<(), ConsoleError> {
        let mut state = lock(&self.state);
        state.record("delete_session")?;
        let before = state.sessions.len();
        state
            .sessions
            .retain(|session| !(session.id == Some(id) && owned_by(session, user_id)));
        if state.sessions.len() == before {
            return Err(ConsoleError::SessionNotFound { session_id: id.0 });
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsBackend for InMemoryBackend {
    async fn get_settings(&self, user_id: &str) -> Result<AgentSettings, ConsoleError> {
        let mut state = lock(&self.state);
        state.record("get_settings")?;
        Ok(state.settings.get(user_id).cloned().unwrap_or_default())
    }

    async fn update_settings(
        &self,
        user_id: &str,
        settings: &AgentSettings,
    ) -> Result<(), ConsoleError> {
        let mut state = lock(&self.state);
        state.record("update_settings")?;
        state
            .settings
            .insert(user_id.to_string(), settings.clone());
        Ok(())
    }

    async fn config_info(&self) -> Result<Option<ConfigInfo>, ConsoleError> {
        let mut state = lock(&self.state);
        state.record("config_info")?;
        Ok(state.config_info.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Success(String),
    Error(String),
}

/// Notifier that keeps every notification for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.notifications)
            .iter()
            .filter_map(|notification| match notification {
                Notification::Error(message) => Some(message.clone()),
                Notification::Success(_) => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        lock(&self.notifications).push(Notification::Success(message.to_string()));
    }

    fn error(&self, message: &str) {
        lock(&self.notifications).push(Notification::Error(message.to_string()));
    }
}
