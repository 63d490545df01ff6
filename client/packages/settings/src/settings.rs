use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::agents::AgentRole;
use crate::mcp::{AgentIssue, McpAgentConfig};
use crate::model::ModelConfig;

const UNSET_MODEL_LABEL: &str = "Default";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid MCP agent: {}", join_issues(.0))]
    InvalidAgent(Vec<AgentIssue>),
    #[error("MCP agent index {index} out of range ({len} configured)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("unknown model provider: {0}")]
    UnknownProvider(String),
    #[error("unknown preset {preset} for provider {provider}")]
    UnknownPreset { provider: String, preset: String },
    #[error("unknown agent role: {0}")]
    UnknownRole(String),
}

fn join_issues(issues: &[AgentIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-user agent configuration as stored by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentSettings {
    #[serde(default)]
    pub model_client_configs: BTreeMap<AgentRole, ModelConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<ModelConfig>,
    #[serde(default)]
    pub advanced_agent_settings: bool,
    #[serde(default)]
    pub mcp_agent_configs: Vec<McpAgentConfig>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl AgentSettings {
    /// The stored default model, else the model shared by every role.
    pub fn initial_default_model(&self) -> Option<ModelConfig> {
        if let Some(model) = &self.default_model {
            return Some(model.clone());
        }
        let mut roles = AgentRole::all().iter();
        let first = roles
            .next()
            .and_then(|role| self.model_client_configs.get(role))?;
        roles
            .all(|role| self.model_client_configs.get(role) == Some(first))
            .then(|| first.clone())
    }

    pub fn apply_default_model(&mut self, model: ModelConfig) {
        for role in AgentRole::all() {
            self.model_client_configs.insert(*role, model.clone());
        }
        self.default_model = Some(model);
    }

    pub fn set_role_model(&mut self, role: AgentRole, model: ModelConfig) {
        self.model_client_configs.insert(role, model);
    }

    pub fn set_advanced(&mut self, advanced: bool) {
        self.advanced_agent_settings = advanced;
    }

    /// The model configured for `role`, falling back to the role's built-in default.
    pub fn role_model(&self, role: AgentRole) -> ModelConfig {
        self.model_client_configs
            .get(&role)
            .cloned()
            .unwrap_or_else(|| role.default_model())
    }

    /// Number of roles per model name; roles without a config count as `Default`.
    pub fn model_usage_stats(&self) -> BTreeMap<String, usize> {
        let mut stats = BTreeMap::new();
        for role in AgentRole::all() {
            let name = self
                .model_client_configs
                .get(role)
                .map(ModelConfig::model)
                .filter(|model| !model.is_empty())
                .unwrap_or(UNSET_MODEL_LABEL);
            *stats.entry(name.to_string()).or_insert(0) += 1;
        }
        stats
    }

    /// Adds `agent`, or replaces the agent at `index` when given.
    pub fn save_mcp_agent(
        &mut self,
        agent: McpAgentConfig,
        index: Option<usize>,
    ) -> Result<(), SettingsError> {
        let issues = agent.validate();
        if !issues.is_empty() {
            return Err(SettingsError::InvalidAgent(issues));
        }
        match index {
            Some(index) => {
                let len = self.mcp_agent_configs.len();
                let slot = self
                    .mcp_agent_configs
                    .get_mut(index)
                    .ok_or(SettingsError::IndexOutOfRange { index, len })?;
                *slot = agent;
            }
            None => self.mcp_agent_configs.push(agent),
        }
        Ok(())
    }

    pub fn remove_mcp_agent(&mut self, index: usize) -> Result<McpAgentConfig, SettingsError> {
        let len = self.mcp_agent_configs.len();
        if index >= len {
            return Err(SettingsError::IndexOutOfRange { index, len });
        }
        Ok(self.mcp_agent_configs.remove(index))
    }

    pub fn json_schema() -> Value {
        let schema = schemars::schema_for!(AgentSettings);
        serde_json::to_value(schema).unwrap_or(Value::Null)
    }
}

/// Settings being edited, with a dirty flag cleared after a successful save.
#[derive(Debug, Clone, Default)]
pub struct SettingsDraft {
    settings: AgentSettings,
    has_changes: bool,
}

impl SettingsDraft {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            settings,
            has_changes: false,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn has_changes(&self) -> bool {
        self.has_changes
    }

    pub fn edit<T>(&mut self, change: impl FnOnce(&mut AgentSettings) -> T) -> T {
        self.has_changes = true;
        change(&mut self.settings)
    }

    pub fn mark_saved(&mut self) {
        self.has_changes = false;
    }

    pub fn into_settings(self) -> AgentSettings {
        self.settings
    }
}

/// Whether the backend was started with an LLM config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigInfo {
    #[serde(default)]
    pub has_config_file: bool,
    #[serde(default)]
    pub config_file_path: Option<String>,
    #[serde(default)]
    pub config_content: Option<Value>,
}

impl ConfigInfo {
    /// Model settings made here are ignored while a config file is loaded.
    pub fn overrides_models(&self) -> bool {
        self.has_config_file
    }
}
