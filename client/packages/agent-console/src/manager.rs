use std::fmt;
use std::sync::Arc;

use agent_console_error::ConsoleError;
use tracing::{debug, info, warn};

use crate::backend::SessionBackend;
use crate::broker::AcquireMode;
use crate::connection::Connector;
use crate::context::ConsoleContext;
use crate::directory::SessionDirectory;
use crate::events::StreamEvent;
use crate::location::PageLocation;
use crate::notify::Notifier;
use crate::run_status::RunStatus;
use crate::session::{Session, SessionId};
use crate::view::{compose_views, ChatView};

/// Why every stream connection is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Unload,
    Offline,
    Unmount,
}

impl TeardownReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TeardownReason::Unload => "unload",
            TeardownReason::Offline => "offline",
            TeardownReason::Unmount => "unmount",
        }
    }
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ties the session directory to the per-session stream connections and
/// run statuses.
pub struct SessionManager<B: SessionBackend, K: Connector> {
    directory: SessionDirectory<B>,
    context: ConsoleContext<K>,
}

impl<B: SessionBackend, K: Connector> SessionManager<B, K> {
    pub fn new(
        backend: B,
        context: ConsoleContext<K>,
        notifier: Arc<dyn Notifier>,
        user_id: impl Into<String>,
        location: PageLocation,
    ) -> Self {
        Self {
            directory: SessionDirectory::new(backend, notifier, user_id, location),
            context,
        }
    }

    pub fn directory(&self) -> &SessionDirectory<B> {
        &self.directory
    }

    pub fn context(&self) -> &ConsoleContext<K> {
        &self.context
    }

    pub async fn start(&mut self) -> Result<(), ConsoleError> {
        self.directory.load().await
    }

    pub async fn set_user(&mut self, user_id: &str) -> Result<(), ConsoleError> {
        self.directory.set_user(user_id).await
    }

    pub async fn select(&mut self, id: SessionId) -> Result<(), ConsoleError> {
        self.directory.select(id).await
    }

    pub async fn create(&mut self) -> Result<&Session, ConsoleError> {
        self.directory.create().await
    }

    pub async fn save(&mut self, session: Session) -> Result<&Session, ConsoleError> {
        self.directory.save(session).await
    }

    pub async fn rename_if_default(
        &mut self,
        id: SessionId,
        name: &str,
    ) -> Result<bool, ConsoleError> {
        self.directory.rename_if_default(id, name).await
    }

    /// Closes the session's stream connection, then deletes it on the backend.
    /// The run status is kept when the backend delete fails.
    pub async fn delete(&mut self, id: SessionId) -> Result<(), ConsoleError> {
        if let Err(err) = self.context.broker.release(id) {
            warn!(session_id = %id, error = %err, "failed to close connection for deleted session");
        }
        self.directory.delete(id).await?;
        self.context.statuses.forget(id);
        Ok(())
    }

    pub fn back(&mut self) {
        self.directory.back();
    }

    pub fn acquire(
        &mut self,
        session_id: SessionId,
        run_id: &str,
        mode: AcquireMode,
    ) -> Result<Option<K::Connection>, ConsoleError> {
        self.context.broker.acquire(session_id, run_id, mode)
    }

    /// Applies the status carried by `event`. Events from a run that is no
    /// longer the session's cached run are ignored.
    pub fn apply_stream_event(&mut self, event: &StreamEvent) -> Option<RunStatus> {
        let cached = self.context.broker.cached_run_id(event.session_id);
        if cached != Some(event.run_id.as_str()) {
            debug!(
                session_id = %event.session_id,
                run_id = %event.run_id,
                "dropping event from replaced run"
            );
            return None;
        }
        let status = event.status_update()?;
        self.context.statuses.set_status(event.session_id, status);
        Some(status)
    }

    pub fn status(&self, session_id: SessionId) -> Option<RunStatus> {
        self.context.statuses.status(session_id)
    }

    pub fn views(&self) -> Vec<ChatView> {
        compose_views(
            self.directory.sessions(),
            self.directory.current_id(),
            &self.context.statuses,
            self.directory.is_loading(),
        )
    }

    /// Closes every stream connection. Close failures are returned after all
    /// connections have been attempted.
    pub fn teardown(&mut self, reason: TeardownReason) -> Vec<ConsoleError> {
        info!(reason = %reason, open = self.context.broker.cache().len(), "closing stream connections");
        self.context.broker.close_all()
    }
}
