use std::collections::HashMap;

use agent_console_error::ConsoleError;
use tracing::{debug, warn};

use crate::connection::StreamConnection;
use crate::session::SessionId;

#[derive(Debug, Clone)]
pub struct CachedConnection<C> {
    pub connection: C,
    pub run_id: String,
}

/// At most one stream connection per session. Entries are always closed
/// before they leave the cache.
#[derive(Debug)]
pub struct ConnectionCache<C: StreamConnection> {
    entries: HashMap<SessionId, CachedConnection<C>>,
}

impl<C: StreamConnection> Default for ConnectionCache<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<C: StreamConnection> ConnectionCache<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: SessionId) -> Option<&CachedConnection<C>> {
        self.entries.get(&session_id)
    }

    /// Stores `connection` for the session, closing whatever was cached before.
    pub fn put(&mut self, session_id: SessionId, connection: C, run_id: impl Into<String>) {
        let run_id = run_id.into();
        debug!(session_id = %session_id, run_id = %run_id, "caching stream connection");
        let previous = self.entries.insert(
            session_id,
            CachedConnection { connection, run_id },
        );
        if let Some(previous) = previous {
            if let Err(err) = close_entry(session_id, &previous) {
                warn!(session_id = %session_id, error = %err, "failed to close replaced connection");
            }
        }
    }

    /// Closes and forgets the session's connection. The entry is removed even
    /// when closing fails.
    pub fn remove(&mut self, session_id: SessionId) -> Result<bool, ConsoleError> {
        match self.entries.remove(&session_id) {
            Some(entry) => close_entry(session_id, &entry).map(|()| true),
            None => Ok(false),
        }
    }

    /// Closes every cached connection. Failures are logged and returned but
    /// never stop the remaining closes.
    pub fn close_all(&mut self) -> Vec<ConsoleError> {
        let mut entries: Vec<_> = self.entries.drain().collect();
        entries.sort_by_key(|(session_id, _)| *session_id);
        let mut failures = Vec::new();
        for (session_id, entry) in entries {
            if let Err(err) = close_entry(session_id, &entry) {
                warn!(session_id = %session_id, error = %err, "error closing stream connection");
                failures.push(err);
            }
        }
        failures
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl<C: StreamConnection> Drop for ConnectionCache<C> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            self.close_all();
        }
    }
}

fn close_entry<C: StreamConnection>(
    session_id: SessionId,
    entry: &CachedConnection<C>,
) -> Result<(), ConsoleError> {
    entry
        .connection
        .close()
        .map_err(|err| ConsoleError::ConnectionClose {
            session_id: session_id.0,
            message: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnection;

    #[test]
    fn put_closes_the_replaced_connection() {
        let mut cache = ConnectionCache::new();
        let first = FakeConnection::new(1, "run-a");
        let second = FakeConnection::new(2, "run-b");

        cache.put(SessionId(1), first.clone(), "run-a");
        cache.put(SessionId(1), second.clone(), "run-b");

        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(SessionId(1)).map(|e| e.run_id.as_str()), Some("run-b"));
    }

    #[test]
    fn remove_drops_entry_even_if_close_fails() {
        let mut cache = ConnectionCache::new();
        let connection = FakeConnection::new(1, "run-a");
        connection.fail_close("socket already gone");
        cache.put(SessionId(5), connection, "run-a");

        let err = cache.remove(SessionId(5)).expect_err("close failure");
        assert!(matches!(err, ConsoleError::ConnectionClose { session_id: 5, .. }));
        assert!(cache.is_empty());
        assert_eq!(cache.remove(SessionId(5)).ok(), Some(false));
    }

    #[test]
    fn close_all_is_best_effort() {
        let mut cache = ConnectionCache::new();
        let broken = FakeConnection::new(1, "run-a");
        broken.fail_close("boom");
        let healthy = FakeConnection::new(2, "run-b");
        cache.put(SessionId(1), broken, "run-a");
        cache.put(SessionId(2), healthy.clone(), "run-b");

        let failures = cache.close_all();
        assert_eq!(failures.len(), 1);
        assert!(!healthy.is_open());
        assert!(cache.is_empty());
    }

    #[test]
    fn dropping_the_cache_closes_connections() {
        let connection = FakeConnection::new(1, "run-a");
        {
            let mut cache = ConnectionCache::new();
            cache.put(SessionId(1), connection.clone(), "run-a");
        }
        assert!(!connection.is_open());
    }
}
