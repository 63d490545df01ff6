use std::fs;
use std::path::{Path, PathBuf};

use agent_console_error::ConsoleError;
use serde_json::{Map, Value};
use tracing::debug;

pub const NAV_EXPANDED_KEY: &str = "navExpanded";
pub const USER_EMAIL_KEY: &str = "user_email";
pub const LOCATION_KEY: &str = "location";

/// Identity used until a real user is known.
pub const DEFAULT_USER: &str = "default";

/// Local key/value preferences.
pub trait PreferenceStore: Send {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&mut self, key: &str, value: Value) -> Result<(), ConsoleError>;

    fn nav_expanded(&self) -> bool {
        self.get(NAV_EXPANDED_KEY)
            .and_then(|value| value.as_bool())
            .unwrap_or(true)
    }

    fn toggle_nav(&mut self) -> Result<bool, ConsoleError> {
        let expanded = !self.nav_expanded();
        self.set(NAV_EXPANDED_KEY, Value::Bool(expanded))?;
        Ok(expanded)
    }

    /// Stored user email. The placeholder identity is written back when
    /// nothing is stored yet.
    fn user_email(&mut self) -> Result<String, ConsoleError> {
        let stored = self
            .get(USER_EMAIL_KEY)
            .and_then(|value| value.as_str().map(str::to_string))
            .filter(|email| !email.is_empty());
        match stored {
            Some(email) => Ok(email),
            None => {
                self.set(USER_EMAIL_KEY, Value::from(DEFAULT_USER))?;
                Ok(DEFAULT_USER.to_string())
            }
        }
    }

    fn location(&self) -> Option<String> {
        self.get(LOCATION_KEY)
            .and_then(|value| value.as_str().map(str::to_string))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    values: Map<String, Value>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), ConsoleError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Preferences kept in a JSON object file, rewritten atomically on every set.
#[derive(Debug, Clone)]
pub struct FilePreferences {
    path: PathBuf,
    values: Map<String, Value>,
}

impl FilePreferences {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("agent-console").join("preferences.json"))
    }

    /// Loads `path`, starting empty when the file does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConsoleError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => Map::new(),
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(Value::Object(values)) => values,
                Ok(_) => {
                    return Err(ConsoleError::storage(format!(
                        "{} does not contain a JSON object",
                        path.display()
                    )))
                }
                Err(err) => {
                    return Err(ConsoleError::storage(format!(
                        "failed to parse {}: {err}",
                        path.display()
                    )))
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => {
                return Err(ConsoleError::storage(format!(
                    "failed to read {}: {err}",
                    path.display()
                )))
            }
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), ConsoleError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                ConsoleError::storage(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
        let contents = serde_json::to_vec_pretty(&self.values)
            .map_err(|err| ConsoleError::storage(err.to_string()))?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, contents).map_err(|err| {
            ConsoleError::storage(format!("failed to write {}: {err}", temp.display()))
        })?;
        fs::rename(&temp, &self.path).map_err(|err| {
            ConsoleError::storage(format!("failed to replace {}: {err}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), "saved preferences");
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), ConsoleError> {
        self.values.insert(key.to_string(), value);
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_and_user_is_written_back() {
        let mut prefs = MemoryPreferences::new();
        assert!(prefs.nav_expanded());
        assert_eq!(prefs.user_email().expect("email"), DEFAULT_USER);
        assert_eq!(prefs.get(USER_EMAIL_KEY), Some(Value::from(DEFAULT_USER)));

        assert!(!prefs.toggle_nav().expect("toggle"));
        assert!(!prefs.nav_expanded());
    }

    #[test]
    fn file_preferences_survive_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("preferences.json");

        let mut prefs = FilePreferences::load(&path).expect("load missing file");
        prefs
            .set(USER_EMAIL_KEY, Value::from("ada@example.com"))
            .expect("set email");
        prefs.toggle_nav().expect("toggle");

        let mut reloaded = FilePreferences::load(&path).expect("reload");
        assert_eq!(reloaded.user_email().expect("email"), "ada@example.com");
        assert!(!reloaded.nav_expanded());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn non_object_files_are_storage_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("preferences.json");
        fs::write(&path, "[1, 2]").expect("write");
        let err = FilePreferences::load(&path).expect_err("array file");
        assert!(matches!(err, ConsoleError::Storage { .. }));
    }
}
