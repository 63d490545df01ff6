//! Agent model and MCP agent configuration.

pub mod agents;
pub mod mcp;
pub mod model;
pub mod settings;

pub use agents::AgentRole;
pub use mcp::{AgentIssue, McpAgentConfig, McpServerConfig, McpServerParams};
pub use model::{ModelConfig, ModelIssue, ModelProvider};
pub use settings::{AgentSettings, ConfigInfo, SettingsDraft, SettingsError};
