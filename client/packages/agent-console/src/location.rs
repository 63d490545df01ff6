use agent_console_error::ConsoleError;
use url::Url;

use crate::session::SessionId;

pub const SESSION_QUERY_KEY: &str = "sessionId";

/// Page address with a navigation history, mirroring the current session
/// as the `sessionId` query parameter.
#[derive(Debug, Clone)]
pub struct PageLocation {
    entries: Vec<Url>,
    index: usize,
}

impl PageLocation {
    pub fn new(url: Url) -> Self {
        Self {
            entries: vec![url],
            index: 0,
        }
    }

    pub fn parse(url: &str) -> Result<Self, ConsoleError> {
        let url = Url::parse(url)
            .map_err(|err| ConsoleError::invalid_config(format!("invalid page URL {url}: {err}")))?;
        Ok(Self::new(url))
    }

    pub fn current(&self) -> &Url {
        &self.entries[self.index]
    }

    /// Session id from the query string; malformed values read as absent.
    pub fn session_id(&self) -> Option<SessionId> {
        self.current()
            .query_pairs()
            .find(|(key, _)| key == SESSION_QUERY_KEY)
            .and_then(|(_, value)| value.parse().ok())
    }

    /// Pushes `?sessionId=<id>` on the current path.
    pub fn push_session(&mut self, session_id: SessionId) {
        let mut url = self.current().clone();
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair(SESSION_QUERY_KEY, &session_id.to_string());
        self.push(url);
    }

    /// Pushes the current path without a query string.
    pub fn clear_session(&mut self) {
        let mut url = self.current().clone();
        url.set_query(None);
        self.push(url);
    }

    /// Moves one entry back. Returns false at the start of history.
    pub fn back(&mut self) -> bool {
        if self.index == 0 {
            return false;
        }
        self.index -= 1;
        true
    }

    pub fn forward(&mut self) -> bool {
        if self.index + 1 >= self.entries.len() {
            return false;
        }
        self.index += 1;
        true
    }

    fn push(&mut self, url: Url) {
        self.entries.truncate(self.index + 1);
        self.entries.push(url);
        self.index = self.entries.len() - 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushes_and_clears_session_query() {
        let mut location = PageLocation::parse("http://localhost:8081/?tab=chat").expect("url");
        assert_eq!(location.session_id(), None);

        location.push_session(SessionId(12));
        assert_eq!(location.current().as_str(), "http://localhost:8081/?sessionId=12");
        assert_eq!(location.session_id(), Some(SessionId(12)));

        location.clear_session();
        assert_eq!(location.current().as_str(), "http://localhost:8081/");
        assert_eq!(location.session_id(), None);
    }

    #[test]
    fn history_navigation_discards_forward_entries_on_push() {
        let mut location = PageLocation::parse("http://localhost/").expect("url");
        location.push_session(SessionId(1));
        location.push_session(SessionId(2));

        assert!(location.back());
        assert_eq!(location.session_id(), Some(SessionId(1)));
        assert!(location.back());
        assert_eq!(location.session_id(), None);
        assert!(!location.back());

        location.push_session(SessionId(3));
        assert!(!location.forward());
        assert_eq!(location.session_id(), Some(SessionId(3)));
    }

    #[test]
    fn malformed_session_ids_are_ignored() {
        let location = PageLocation::parse("http://localhost/?sessionId=abc").expect("url");
        assert_eq!(location.session_id(), None);
    }
}
