use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use agent_console_error::ConsoleError;
use serde::{Deserialize, Serialize};

use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Active,
    AwaitingInput,
    Pausing,
    Paused,
    Timeout,
    #[serde(alias = "completed")]
    Complete,
    Error,
    Stopped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Active => "active",
            RunStatus::AwaitingInput => "awaiting_input",
            RunStatus::Pausing => "pausing",
            RunStatus::Paused => "paused",
            RunStatus::Timeout => "timeout",
            RunStatus::Complete => "complete",
            RunStatus::Error => "error",
            RunStatus::Stopped => "stopped",
        }
    }

    /// Live runs keep their chat view mounted while hidden.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            RunStatus::Active | RunStatus::AwaitingInput | RunStatus::Pausing | RunStatus::Paused
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            RunStatus::Complete | RunStatus::Error | RunStatus::Stopped | RunStatus::Timeout
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ConsoleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(RunStatus::Created),
            "active" => Ok(RunStatus::Active),
            "awaiting_input" => Ok(RunStatus::AwaitingInput),
            "pausing" => Ok(RunStatus::Pausing),
            "paused" => Ok(RunStatus::Paused),
            "timeout" => Ok(RunStatus::Timeout),
            "complete" | "completed" => Ok(RunStatus::Complete),
            "error" => Ok(RunStatus::Error),
            "stopped" => Ok(RunStatus::Stopped),
            other => Err(ConsoleError::stream(format!("unknown run status: {other}"))),
        }
    }
}

/// Last known run status per session. Writes overwrite without checking
/// transitions; a missing entry means the status is unknown.
#[derive(Debug, Default)]
pub struct RunStatusRegistry {
    statuses: HashMap<SessionId, RunStatus>,
}

impl RunStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, session_id: SessionId, status: RunStatus) {
        self.statuses.insert(session_id, status);
    }

    pub fn status(&self, session_id: SessionId) -> Option<RunStatus> {
        self.statuses.get(&session_id).copied()
    }

    pub fn is_live(&self, session_id: SessionId) -> bool {
        self.status(session_id).is_some_and(RunStatus::is_live)
    }

    pub fn forget(&mut self, session_id: SessionId) -> Option<RunStatus> {
        self.statuses.remove(&session_id)
    }
}
