use agent_console_error::ConsoleError;

use crate::session::SessionId;

/// Handle to one run stream. Clones share the same underlying connection.
pub trait StreamConnection: Clone + Send + Sync + 'static {
    fn run_id(&self) -> &str;

    /// True while the connection is usable or still being established.
    fn is_open(&self) -> bool;

    fn close(&self) -> Result<(), ConsoleError>;
}

/// Opens stream connections for `(session, run)` pairs.
pub trait Connector: Send + Sync {
    type Connection: StreamConnection;

    fn open(
        &self,
        url: &str,
        session_id: SessionId,
        run_id: &str,
    ) -> Result<Self::Connection, ConsoleError>;
}
