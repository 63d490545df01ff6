use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidConfig,
    InvalidRequest,
    SessionNotFound,
    Backend,
    StreamError,
    ConnectionClose,
    Storage,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::InvalidConfig => "urn:agent-console:error:invalid_config",
            Self::InvalidRequest => "urn:agent-console:error:invalid_request",
            Self::SessionNotFound => "urn:agent-console:error:session_not_found",
            Self::Backend => "urn:agent-console:error:backend",
            Self::StreamError => "urn:agent-console:error:stream_error",
            Self::ConnectionClose => "urn:agent-console:error:connection_close",
            Self::Storage => "urn:agent-console:error:storage",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidConfig => "Invalid Configuration",
            Self::InvalidRequest => "Invalid Request",
            Self::SessionNotFound => "Session Not Found",
            Self::Backend => "Backend Error",
            Self::StreamError => "Stream Error",
            Self::ConnectionClose => "Connection Close Failed",
            Self::Storage => "Storage Error",
        }
    }

    /// Fatal errors are surfaced to the caller and never recovered locally.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidConfig)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: None,
            detail,
            instance: None,
            extensions: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConsoleError {
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: i64 },
    #[error("backend error: {message}")]
    Backend {
        status: Option<u16>,
        message: String,
    },
    #[error("stream error: {message}")]
    StreamError { message: String },
    #[error("failed to close connection for session {session_id}: {message}")]
    ConnectionClose { session_id: i64, message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl ConsoleError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            status: None,
            message: message.into(),
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::StreamError {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidConfig { .. } => ErrorType::InvalidConfig,
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::SessionNotFound { .. } => ErrorType::SessionNotFound,
            Self::Backend { .. } => ErrorType::Backend,
            Self::StreamError { .. } => ErrorType::StreamError,
            Self::ConnectionClose { .. } => ErrorType::ConnectionClose,
            Self::Storage { .. } => ErrorType::Storage,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.error_type().is_fatal()
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.to_string()));

        let mut extensions = Map::new();
        match self {
            Self::SessionNotFound { session_id } => {
                extensions.insert("sessionId".to_string(), Value::from(*session_id));
            }
            Self::ConnectionClose { session_id, .. } => {
                extensions.insert("sessionId".to_string(), Value::from(*session_id));
            }
            Self::Backend { status, .. } => {
                problem.status = *status;
            }
            _ => {}
        }
        problem.extensions = extensions;
        problem
    }
}

impl From<ConsoleError> for ProblemDetails {
    fn from(value: ConsoleError) -> Self {
        value.to_problem_details()
    }
}

impl From<&ConsoleError> for ProblemDetails {
    fn from(value: &ConsoleError) -> Self {
        value.to_problem_details()
    }
}

/// Extracts a human readable message from a backend error body.
///
/// Understands the `{"status": false, "message": ..}` envelope, FastAPI style
/// `{"detail": ..}` bodies and RFC 7807 problem details. Anything else is
/// returned trimmed as-is.
pub fn message_from_body(body: &str) -> String {
    let trimmed = body.trim();
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return trimmed.to_string();
    };
    for key in ["message", "detail", "title"] {
        match value.get(key) {
            Some(Value::String(text)) if !text.is_empty() => return text.clone(),
            Some(Value::Null) | None => {}
            Some(other) => return other.to_string(),
        }
    }
    trimmed.to_string()
}
