use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ModelConfig, ModelIssue};

pub const DEFAULT_TOOL_CALL_SUMMARY_FORMAT: &str = "{tool_name}({arguments}): {result}";

/// How an MCP server is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum McpServerParams {
    #[serde(rename = "StdioServerParams")]
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        read_timeout_seconds: Option<f64>,
    },
    #[serde(rename = "SseServerParams")]
    Sse {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sse_read_timeout: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct McpServerConfig {
    pub server_name: String,
    pub server_params: McpServerParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct McpAgentConfig {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub system_message: String,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_context_token_limit: Option<u64>,
    #[serde(default = "default_tool_call_summary_format")]
    pub tool_call_summary_format: String,
    #[serde(default)]
    pub model_client: ModelConfig,
}

fn default_tool_call_summary_format() -> String {
    DEFAULT_TOOL_CALL_SUMMARY_FORMAT.to_string()
}

impl McpAgentConfig {
    /// Empty agent ready for editing. `default_model` replaces the OpenAI
    /// default when advanced settings are on and a shared model is set.
    pub fn draft(default_model: Option<&ModelConfig>) -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            system_message: String::new(),
            mcp_servers: Vec::new(),
            model_context_token_limit: None,
            tool_call_summary_format: default_tool_call_summary_format(),
            model_client: default_model.cloned().unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Vec<AgentIssue> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push(AgentIssue::MissingName);
        }
        if self.description.trim().is_empty() {
            issues.push(AgentIssue::MissingDescription);
        }
        if self.mcp_servers.is_empty() {
            issues.push(AgentIssue::NoServers);
        }
        issues.extend(
            self.model_client
                .validate()
                .into_iter()
                .map(AgentIssue::Model),
        );
        issues
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentIssue {
    #[error("name is required")]
    MissingName,
    #[error("description is required")]
    MissingDescription,
    #[error("at least one MCP server is required")]
    NoServers,
    #[error("model client: {0}")]
    Model(ModelIssue),
}
