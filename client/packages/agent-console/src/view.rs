use serde::Serialize;

use crate::run_status::{RunStatus, RunStatusRegistry};
use crate::session::{Session, SessionId};

/// A mounted chat view. Sessions without a view are not mounted at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatView {
    pub session: Session,
    pub visible: bool,
    pub show_loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

/// The current session is mounted and visible; sessions with a live run
/// stay mounted but hidden so their streams keep flowing.
pub fn compose_views(
    sessions: &[Session],
    current: Option<SessionId>,
    statuses: &RunStatusRegistry,
    loading: bool,
) -> Vec<ChatView> {
    sessions
        .iter()
        .filter_map(|session| {
            let id = session.id?;
            let visible = current == Some(id);
            if !visible && !statuses.is_live(id) {
                return None;
            }
            Some(ChatView {
                session: session.clone(),
                visible,
                show_loading: visible && loading,
                status: statuses.status(id),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: i64) -> Session {
        Session {
            id: Some(SessionId(id)),
            ..Session::draft(format!("session {id}"))
        }
    }

    #[test]
    fn mounts_current_and_live_sessions_only() {
        let sessions = [session(1), session(2), session(3), session(4)];
        let mut statuses = RunStatusRegistry::new();
        statuses.set_status(SessionId(1), RunStatus::Paused);
        statuses.set_status(SessionId(3), RunStatus::Complete);

        let views = compose_views(&sessions, Some(SessionId(2)), &statuses, true);
        let mounted: Vec<_> = views
            .iter()
            .map(|view| (view.session.id, view.visible, view.show_loading))
            .collect();
        assert_eq!(
            mounted,
            vec![
                (Some(SessionId(1)), false, false),
                (Some(SessionId(2)), true, true),
            ]
        );
    }

    #[test]
    fn nothing_is_visible_without_a_current_session() {
        let sessions = [session(1)];
        let views = compose_views(&sessions, None, &RunStatusRegistry::new(), false);
        assert!(views.is_empty());
    }
}
