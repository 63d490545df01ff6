use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{ModelConfig, ModelProvider};

const ACTION_GUARD_PRESET: &str = "gpt-4.1-nano-2025-04-14";

/// Built-in agents that each carry their own model client.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    WebSurfer,
    Coder,
    FileSurfer,
    ActionGuard,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "orchestrator",
            AgentRole::WebSurfer => "web_surfer",
            AgentRole::Coder => "coder",
            AgentRole::FileSurfer => "file_surfer",
            AgentRole::ActionGuard => "action_guard",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "Orchestrator",
            AgentRole::WebSurfer => "Web Surfer",
            AgentRole::Coder => "Coder",
            AgentRole::FileSurfer => "File Surfer",
            AgentRole::ActionGuard => "Action Guard",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AgentRole::Orchestrator => "Coordinates and manages all other agents",
            AgentRole::WebSurfer => "Browses and interacts with web content",
            AgentRole::Coder => "Writes and analyzes code",
            AgentRole::FileSurfer => "Manages and analyzes files",
            AgentRole::ActionGuard => "Validates and approves actions",
        }
    }

    pub fn default_model(self) -> ModelConfig {
        match self {
            AgentRole::ActionGuard => ModelProvider::OpenAi
                .preset(ACTION_GUARD_PRESET)
                .unwrap_or_else(|| ModelProvider::OpenAi.default_config()),
            _ => ModelProvider::OpenAi.default_config(),
        }
    }

    pub fn all() -> &'static [AgentRole] {
        &[
            AgentRole::Orchestrator,
            AgentRole::WebSurfer,
            AgentRole::Coder,
            AgentRole::FileSurfer,
            AgentRole::ActionGuard,
        ]
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "orchestrator" => Some(AgentRole::Orchestrator),
            "web_surfer" => Some(AgentRole::WebSurfer),
            "coder" => Some(AgentRole::Coder),
            "file_surfer" => Some(AgentRole::FileSurfer),
            "action_guard" => Some(AgentRole::ActionGuard),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_guard_uses_nano_preset() {
        assert_eq!(
            AgentRole::ActionGuard.default_model().model(),
            ACTION_GUARD_PRESET
        );
        assert_eq!(
            AgentRole::Coder.default_model(),
            ModelProvider::OpenAi.default_config()
        );
    }

    #[test]
    fn parse_matches_wire_names() {
        for role in AgentRole::all() {
            assert_eq!(AgentRole::parse(role.as_str()), Some(*role));
            let wire = serde_json::to_value(role).expect("encode");
            assert_eq!(wire, serde_json::Value::from(role.as_str()));
        }
        assert_eq!(AgentRole::parse("planner"), None);
    }
}
