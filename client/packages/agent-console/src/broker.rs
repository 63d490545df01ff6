use agent_console_error::ConsoleError;
use tracing::{debug, info, warn};

use crate::cache::ConnectionCache;
use crate::connection::{Connector, StreamConnection};
use crate::endpoint::StreamEndpoint;
use crate::session::SessionId;

/// How [`ConnectionBroker::acquire`] treats an existing connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Reuse an open connection for the same run, otherwise open a new one.
    Reuse,
    /// Always replace the cached connection.
    Fresh,
    /// Only return an open connection for the same run; never open one.
    ExistingOnly,
}

impl AcquireMode {
    /// `force_fresh` wins over `existing_only`.
    pub fn from_flags(force_fresh: bool, existing_only: bool) -> Self {
        if force_fresh {
            AcquireMode::Fresh
        } else if existing_only {
            AcquireMode::ExistingOnly
        } else {
            AcquireMode::Reuse
        }
    }
}

pub struct ConnectionBroker<K: Connector> {
    connector: K,
    endpoint: StreamEndpoint,
    cache: ConnectionCache<K::Connection>,
}

impl<K: Connector> ConnectionBroker<K> {
    pub fn new(connector: K, endpoint: StreamEndpoint) -> Self {
        Self {
            connector,
            endpoint,
            cache: ConnectionCache::new(),
        }
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    pub fn cache(&self) -> &ConnectionCache<K::Connection> {
        &self.cache
    }

    /// Returns a connection for `(session_id, run_id)` according to `mode`.
    ///
    /// `Ok(None)` is only possible with [`AcquireMode::ExistingOnly`]. A
    /// malformed server URL fails before any cached connection is touched.
    pub fn acquire(
        &mut self,
        session_id: SessionId,
        run_id: &str,
        mode: AcquireMode,
    ) -> Result<Option<K::Connection>, ConsoleError> {
        if mode != AcquireMode::Fresh {
            if let Some(existing) = self.reusable(session_id, run_id) {
                debug!(session_id = %session_id, run_id, "reusing stream connection");
                return Ok(Some(existing));
            }
            if mode == AcquireMode::ExistingOnly {
                return Ok(None);
            }
        }
        self.open(session_id, run_id).map(Some)
    }

    /// Run id of the cached connection for `session_id`.
    pub fn cached_run_id(&self, session_id: SessionId) -> Option<&str> {
        self.cache.get(session_id).map(|entry| entry.run_id.as_str())
    }

    pub fn release(&mut self, session_id: SessionId) -> Result<bool, ConsoleError> {
        self.cache.remove(session_id)
    }

    pub fn close_all(&mut self) -> Vec<ConsoleError> {
        self.cache.close_all()
    }

    fn reusable(&self, session_id: SessionId, run_id: &str) -> Option<K::Connection> {
        self.cache
            .get(session_id)
            .filter(|entry| entry.run_id == run_id && entry.connection.is_open())
            .map(|entry| entry.connection.clone())
    }

    fn open(&mut self, session_id: SessionId, run_id: &str) -> Result<K::Connection, ConsoleError> {
        let url = self.endpoint.run_url(run_id)?;
        if let Err(err) = self.cache.remove(session_id) {
            warn!(session_id = %session_id, error = %err, "failed to close previous connection");
        }
        info!(session_id = %session_id, run_id, url = %url, "opening stream connection");
        let connection = self.connector.open(&url, session_id, run_id)?;
        self.cache.put(session_id, connection.clone(), run_id);
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_modes() {
        assert_eq!(AcquireMode::from_flags(true, true), AcquireMode::Fresh);
        assert_eq!(AcquireMode::from_flags(true, false), AcquireMode::Fresh);
        assert_eq!(AcquireMode::from_flags(false, true), AcquireMode::ExistingOnly);
        assert_eq!(AcquireMode::from_flags(false, false), AcquireMode::Reuse);
    }
}
