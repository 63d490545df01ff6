use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of automatically generated session names. Sessions still carrying
/// it are renamed once their first content is saved.
pub const DEFAULT_NAME_PREFIX: &str = "Default Session - ";

/// Server assigned session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.trim().parse().map(SessionId)
    }
}

impl From<i64> for SessionId {
    fn from(value: i64) -> Self {
        SessionId(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SessionId>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Session {
    /// Unsaved session with the given name.
    pub fn draft(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn has_default_name(&self) -> bool {
        self.name.starts_with(DEFAULT_NAME_PREFIX)
    }
}

pub fn default_session_name() -> String {
    format!(
        "{DEFAULT_NAME_PREFIX}{}",
        Local::now().format("%Y-%m-%d %I:%M %p")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_names_carry_prefix_and_timestamp() {
        let name = default_session_name();
        let stamp = name
            .strip_prefix(DEFAULT_NAME_PREFIX)
            .expect("default prefix");
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %I:%M %p").is_ok());
        assert!(Session::draft(name).has_default_name());
        assert!(!Session::draft("Trip planning").has_default_name());
    }

    #[test]
    fn unknown_fields_are_kept() {
        let value = json!({
            "id": 7,
            "name": "Research",
            "user_id": "ada@example.com",
            "created_at": "2025-01-01T10:00:00",
            "team_id": 3
        });
        let session: Session = serde_json::from_value(value.clone()).expect("decode");
        assert_eq!(session.id, Some(SessionId(7)));
        assert_eq!(session.metadata.get("team_id"), Some(&json!(3)));
        assert_eq!(serde_json::to_value(&session).expect("encode"), value);
    }

    #[test]
    fn session_ids_parse_from_query_values() {
        assert_eq!("42".parse::<SessionId>(), Ok(SessionId(42)));
        assert!("abc".parse::<SessionId>().is_err());
    }
}
