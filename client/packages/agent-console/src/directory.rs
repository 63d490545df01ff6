use std::sync::Arc;

use agent_console_error::ConsoleError;
use tracing::{debug, info, warn};

use crate::backend::SessionBackend;
use crate::location::PageLocation;
use crate::notify::Notifier;
use crate::session::{default_session_name, Session, SessionId};

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    NoCurrentSession,
    Loading(SessionId),
    Current(Session),
}

/// The user's sessions, in backend order, and the single current session.
pub struct SessionDirectory<B: SessionBackend> {
    backend: B,
    notifier: Arc<dyn Notifier>,
    user_id: String,
    sessions: Vec<Session>,
    selection: SelectionState,
    location: PageLocation,
    loading: bool,
}

impl<B: SessionBackend> SessionDirectory<B> {
    pub fn new(
        backend: B,
        notifier: Arc<dyn Notifier>,
        user_id: impl Into<String>,
        location: PageLocation,
    ) -> Self {
        Self {
            backend,
            notifier,
            user_id: user_id.into(),
            sessions: Vec::new(),
            selection: SelectionState::NoCurrentSession,
            location,
            loading: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn current(&self) -> Option<&Session> {
        match &self.selection {
            SelectionState::Current(session) => Some(session),
            _ => None,
        }
    }

    pub fn current_id(&self) -> Option<SessionId> {
        match &self.selection {
            SelectionState::Current(session) => session.id,
            SelectionState::Loading(id) => Some(*id),
            SelectionState::NoCurrentSession => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading || matches!(self.selection, SelectionState::Loading(_))
    }

    pub fn location(&self) -> &PageLocation {
        &self.location
    }

    pub fn find(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|session| session.id == Some(id))
    }

    /// Fetches the session list and settles the current session: bootstraps a
    /// default session when there are none, follows a `sessionId` deep link,
    /// or falls back to the first session.
    pub async fn load(&mut self) -> Result<(), ConsoleError> {
        if self.user_id.is_empty() {
            return Ok(());
        }
        self.loading = true;
        let result = self.backend.list_sessions(&self.user_id).await;
        self.loading = false;

        let sessions = match result {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(user_id = %self.user_id, error = %err, "error fetching sessions");
                self.notifier.error("Error loading sessions");
                return Err(err);
            }
        };
        debug!(user_id = %self.user_id, count = sessions.len(), "loaded sessions");
        self.sessions = sessions;

        if self.sessions.is_empty() {
            let draft = Session::draft(default_session_name());
            self.insert_new(draft, "Error creating default session").await?;
            return Ok(());
        }
        if self.selection != SelectionState::NoCurrentSession {
            return Ok(());
        }
        match self.location.session_id() {
            Some(id) => self.select(id).await,
            None => {
                self.selection = SelectionState::Current(self.sessions[0].clone());
                Ok(())
            }
        }
    }

    /// Switches to another user identity and reloads.
    pub async fn set_user(&mut self, user_id: impl Into<String>) -> Result<(), ConsoleError> {
        let user_id = user_id.into();
        if user_id == self.user_id {
            return Ok(());
        }
        info!(user_id = %user_id, "switching user");
        self.user_id = user_id;
        self.sessions.clear();
        self.selection = SelectionState::NoCurrentSession;
        self.load().await
    }

    /// Makes `id` current. Unknown sessions and fetch failures both fall
    /// back to the first known session, or to no session.
    pub async fn select(&mut self, id: SessionId) -> Result<(), ConsoleError> {
        self.selection = SelectionState::Loading(id);
        match self.backend.get_session(id, &self.user_id).await {
            Ok(Some(session)) => {
                self.selection = SelectionState::Current(session);
                self.location.push_session(id);
                Ok(())
            }
            Ok(None) => {
                self.notifier.error("Session not found");
                self.fall_back();
                Err(ConsoleError::SessionNotFound { session_id: id.0 })
            }
            Err(err) => {
                warn!(session_id = %id, error = %err, "error loading session");
                self.notifier.error("Error loading session");
                self.fall_back();
                Err(err)
            }
        }
    }

    /// Persists a new session with a default name and makes it current.
    pub async fn create(&mut self) -> Result<&Session, ConsoleError> {
        let draft = Session::draft(default_session_name());
        self.insert_new(draft, "Error saving session").await
    }

    /// Updates an existing session, or creates one when `session` has no id.
    pub async fn save(&mut self, session: Session) -> Result<&Session, ConsoleError> {
        let Some(id) = session.id else {
            let draft = Session {
                name: default_session_name(),
                ..session
            };
            return self.insert_new(draft, "Error saving session").await;
        };

        self.loading = true;
        let result = self
            .backend
            .update_session(id, &session, &self.user_id)
            .await;
        self.loading = false;
        match result {
            Ok(updated) => Ok(self.replace(updated)),
            Err(err) => {
                warn!(session_id = %id, error = %err, "error saving session");
                self.notifier.error("Error saving session");
                Err(err)
            }
        }
    }

    /// Renames `id` to `name` only while it still carries a default name.
    /// Returns whether the backend was asked to rename it.
    pub async fn rename_if_default(
        &mut self,
        id: SessionId,
        name: &str,
    ) -> Result<bool, ConsoleError> {
        let Some(existing) = self.find(id) else {
            return Ok(false);
        };
        if !existing.has_default_name() {
            return Ok(false);
        }
        let renamed = Session {
            name: name.to_string(),
            ..existing.clone()
        };
        let result = self
            .backend
            .update_session(id, &renamed, &self.user_id)
            .await;
        match result {
            Ok(updated) => {
                self.replace(updated);
                Ok(true)
            }
            Err(err) => {
                warn!(session_id = %id, error = %err, "error updating session name");
                self.notifier.error("Error updating session name");
                Err(err)
            }
        }
    }

    /// Deletes `id` on the backend. The caller closes its stream connection first.
    pub async fn delete(&mut self, id: SessionId) -> Result<(), ConsoleError> {
        self.loading = true;
        let result = self.backend.delete_session(id, &self.user_id).await;
        self.loading = false;
        if let Err(err) = result {
            warn!(session_id = %id, error = %err, "error deleting session");
            self.notifier.error("Error deleting session");
            return Err(err);
        }

        let was_current = self.current_id() == Some(id);
        self.sessions.retain(|session| session.id != Some(id));
        if was_current || self.sessions.is_empty() {
            match self.sessions.first().cloned() {
                Some(next) => {
                    if let Some(next_id) = next.id {
                        self.location.push_session(next_id);
                    }
                    self.selection = SelectionState::Current(next);
                }
                None => {
                    self.selection = SelectionState::NoCurrentSession;
                    self.location.clear_session();
                }
            }
        }
        self.notifier.success("Session deleted");
        Ok(())
    }

    /// Browser style back navigation.
    pub fn back(&mut self) {
        if self.location.back() {
            self.on_history_change();
        }
    }

    /// Landing on an entry without `sessionId` leaves no session current.
    pub fn on_history_change(&mut self) {
        if self.location.session_id().is_none()
            && self.selection != SelectionState::NoCurrentSession
        {
            self.selection = SelectionState::NoCurrentSession;
        }
    }

    async fn insert_new(
        &mut self,
        draft: Session,
        failure_message: &str,
    ) -> Result<&Session, ConsoleError> {
        self.loading = true;
        let result = self.backend.create_session(&draft, &self.user_id).await;
        self.loading = false;
        let created = match result {
            Ok(created) => created,
            Err(err) => {
                warn!(error = %err, "error creating session");
                self.notifier.error(failure_message);
                return Err(err);
            }
        };
        info!(session_id = ?created.id, name = %created.name, "created session");
        if let Some(id) = created.id {
            self.location.push_session(id);
        }
        self.sessions.insert(0, created.clone());
        self.selection = SelectionState::Current(created);
        Ok(&self.sessions[0])
    }

    /// Swaps the stored copy of `updated` and refreshes the current pointer.
    fn replace(&mut self, updated: Session) -> &Session {
        if let SelectionState::Current(current) = &mut self.selection {
            if current.id == updated.id {
                *current = updated.clone();
            }
        }
        match self
            .sessions
            .iter()
            .position(|session| session.id == updated.id)
        {
            Some(index) => {
                self.sessions[index] = updated;
                &self.sessions[index]
            }
            None => {
                self.sessions.insert(0, updated);
                &self.sessions[0]
            }
        }
    }

    fn fall_back(&mut self) {
        self.location.clear_session();
        self.selection = match self.sessions.first() {
            Some(first) => SelectionState::Current(first.clone()),
            None => SelectionState::NoCurrentSession,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryBackend, RecordingNotifier};

    const USER: &str = "ada@example.com";

    fn directory(backend: &InMemoryBackend, page: &str) -> SessionDirectory<InMemoryBackend> {
        SessionDirectory::new(
            backend.clone(),
            Arc::new(RecordingNotifier::new()),
            USER,
            PageLocation::parse(page).expect("page url"),
        )
    }

    #[tokio::test]
    async fn first_session_becomes_current_without_deep_link() {
        let backend = InMemoryBackend::with_sessions(USER, &["one", "two"]);
        let mut directory = directory(&backend, "http://localhost/");
        directory.load().await.expect("load");
        assert_eq!(directory.current().map(|s| s.name.as_str()), Some("one"));
        assert_eq!(directory.location().session_id(), None);
    }

    #[tokio::test]
    async fn deep_link_selects_the_linked_session() {
        let backend = InMemoryBackend::with_sessions(USER, &["one", "two"]);
        let mut directory = directory(&backend, "http://localhost/?sessionId=2");
        directory.load().await.expect("load");
        assert_eq!(directory.current_id(), Some(SessionId(2)));
        assert_eq!(backend.calls("get_session"), 1);
    }

    #[tokio::test]
    async fn save_without_id_creates_a_default_named_session() {
        let backend = InMemoryBackend::with_sessions(USER, &["one"]);
        let mut directory = directory(&backend, "http://localhost/");
        directory.load().await.expect("load");

        let created = directory.save(Session::default()).await.expect("create").clone();
        assert!(created.has_default_name());
        assert_eq!(directory.sessions()[0], created);
        assert_eq!(directory.current_id(), created.id);
        assert_eq!(directory.location().session_id(), created.id);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_state() {
        let backend = InMemoryBackend::with_sessions(USER, &["one"]);
        let mut directory = directory(&backend, "http://localhost/");
        directory.load().await.expect("load");

        backend.fail("list_sessions");
        assert!(directory.load().await.is_err());
        assert_eq!(directory.sessions().len(), 1);
        assert_eq!(directory.current_id(), Some(SessionId(1)));
        assert!(!directory.is_loading());
    }

    #[tokio::test]
    async fn failed_bootstrap_is_reported_apart_from_failed_saves() {
        let backend = InMemoryBackend::new();
        backend.fail("create_session");
        let notifier = RecordingNotifier::new();
        let mut directory = SessionDirectory::new(
            backend.clone(),
            Arc::new(notifier.clone()),
            USER,
            PageLocation::parse("http://localhost/").expect("page url"),
        );

        assert!(directory.load().await.is_err());
        assert!(directory.create().await.is_err());
        assert_eq!(
            notifier.errors(),
            vec![
                "Error creating default session".to_string(),
                "Error saving session".to_string(),
            ]
        );
        assert_eq!(directory.selection(), &SelectionState::NoCurrentSession);
        assert!(directory.sessions().is_empty());
    }

    #[tokio::test]
    async fn back_to_an_entry_without_session_clears_current() {
        let backend = InMemoryBackend::with_sessions(USER, &["one", "two"]);
        let mut directory = directory(&backend, "http://localhost/");
        directory.load().await.expect("load");
        directory.select(SessionId(2)).await.expect("select");

        directory.back();
        assert_eq!(directory.selection(), &SelectionState::NoCurrentSession);
    }
}
