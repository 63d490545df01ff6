use agent_console_error::ConsoleError;
use agent_console_settings::{AgentSettings, ConfigInfo};
use async_trait::async_trait;

use crate::session::{Session, SessionId};

/// Session CRUD offered by the backend.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, ConsoleError>;

    /// `Ok(None)` when the session does not exist for this user.
    async fn get_session(
        &self,
        id: SessionId,
        user_id: &str,
    ) -> Result<Option<Session>, ConsoleError>;

    async fn create_session(&self, session: &Session, user_id: &str)
        -> Result<Session, ConsoleError>;

    async fn update_session(
        &self,
        id: SessionId,
        session: &Session,
        user_id: &str,
    ) -> Result<Session, ConsoleError>;

    async fn delete_session(&self, id: SessionId, user_id: &str) -> Result<(), ConsoleError>;
}

#[async_trait]
pub trait SettingsBackend: Send + Sync {
    async fn get_settings(&self, user_id: &str) -> Result<AgentSettings, ConsoleError>;

    async fn update_settings(
        &self,
        user_id: &str,
        settings: &AgentSettings,
    ) -> Result<(), ConsoleError>;

    /// `Ok(None)` when the backend does not expose config file information.
    async fn config_info(&self) -> Result<Option<ConfigInfo>, ConsoleError>;
}
