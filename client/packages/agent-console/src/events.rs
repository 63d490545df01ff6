use agent_console_error::ConsoleError;
use serde::Serialize;
use serde_json::Value;

use crate::run_status::RunStatus;
use crate::session::SessionId;

/// Decoded inbound message from a run stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// `system` message carrying a status.
    Status(RunStatus),
    InputRequest { payload: Value },
    /// Final `result` or `completion` message.
    Finished { status: RunStatus, payload: Value },
    Error { message: String },
    /// Anything without a status effect, relayed as-is.
    Message { payload: Value },
}

impl RunEvent {
    pub fn decode(text: &str) -> Result<Self, ConsoleError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| ConsoleError::stream(format!("invalid run message: {err}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ConsoleError> {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
        let status = value.get("status").and_then(Value::as_str);
        match kind {
            "system" => match status {
                Some(status) => Ok(RunEvent::Status(status.parse()?)),
                None => Ok(RunEvent::Message { payload: value }),
            },
            "input_request" => Ok(RunEvent::InputRequest { payload: value }),
            "result" | "completion" => {
                let status = match status {
                    Some("complete") | Some("completed") => RunStatus::Complete,
                    Some("error") => RunStatus::Error,
                    _ => RunStatus::Stopped,
                };
                Ok(RunEvent::Finished {
                    status,
                    payload: value,
                })
            }
            "error" => {
                let message = value
                    .get("error")
                    .or_else(|| value.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("run failed")
                    .to_string();
                Ok(RunEvent::Error { message })
            }
            _ => Ok(RunEvent::Message { payload: value }),
        }
    }

    /// Status implied by this event, if any.
    pub fn status_update(&self) -> Option<RunStatus> {
        match self {
            RunEvent::Status(status) => Some(*status),
            RunEvent::InputRequest { .. } => Some(RunStatus::AwaitingInput),
            RunEvent::Finished { status, .. } => Some(*status),
            RunEvent::Error { .. } => Some(RunStatus::Error),
            RunEvent::Message { .. } => None,
        }
    }
}

/// Outbound command sent over a run stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunCommand {
    Start {
        id: String,
        task: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        team_config: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        settings_config: Option<Value>,
    },
    InputResponse {
        response: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        accepted: Option<bool>,
    },
    Stop {
        reason: String,
    },
    Pause,
    Resume,
}

impl RunCommand {
    pub fn start(run_id: impl Into<String>, task: impl Into<String>) -> Self {
        RunCommand::Start {
            id: run_id.into(),
            task: task.into(),
            team_config: None,
            settings_config: None,
        }
    }

    pub fn encode(&self) -> Result<String, ConsoleError> {
        serde_json::to_string(self)
            .map_err(|err| ConsoleError::stream(format!("failed to encode command: {err}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventKind {
    Opened,
    Run(RunEvent),
    /// Connect, read or decode failure. The connection may still be open.
    Failed(String),
    Closed,
}

/// Event relayed from a stream connection to its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub session_id: SessionId,
    pub run_id: String,
    pub kind: StreamEventKind,
}

impl StreamEvent {
    pub fn new(session_id: SessionId, run_id: impl Into<String>, kind: StreamEventKind) -> Self {
        Self {
            session_id,
            run_id: run_id.into(),
            kind,
        }
    }

    pub fn status_update(&self) -> Option<RunStatus> {
        match &self.kind {
            StreamEventKind::Run(event) => event.status_update(),
            _ => None,
        }
    }
}
