use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

const OPENAI_PROVIDER: &str = "OpenAIChatCompletionClient";
const AZURE_PROVIDER: &str = "AzureOpenAIChatCompletionClient";
const OLLAMA_PROVIDER: &str = "autogen_ext.models.ollama.OllamaChatCompletionClient";

const OPENAI_DEFAULT_MODEL: &str = "gpt-4.1-2025-04-14";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENROUTER_PRESET: &str = "OpenRouter";

const OPENAI_PRESET_MODELS: [&str; 8] = [
    "o3-2025-04-16",
    "o3-mini-2025-01-31",
    "o4-mini-2025-04-16",
    "gpt-4.1-2025-04-14",
    "gpt-4.1-mini-2025-04-14",
    "gpt-4.1-nano-2025-04-14",
    "gpt-4o-2024-08-06",
    "gpt-4o-mini-2024-07-18",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelProvider {
    OpenAi,
    Azure,
    Ollama,
}

impl ModelProvider {
    /// Wire identifier stored in the `provider` field.
    pub fn as_str(self) -> &'static str {
        match self {
            ModelProvider::OpenAi => OPENAI_PROVIDER,
            ModelProvider::Azure => AZURE_PROVIDER,
            ModelProvider::Ollama => OLLAMA_PROVIDER,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "OpenAI",
            ModelProvider::Azure => "Azure AI Foundry",
            ModelProvider::Ollama => "Ollama",
        }
    }

    /// Accepts either the wire identifier or the short names used on the command line.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" | OPENAI_PROVIDER => Some(ModelProvider::OpenAi),
            "azure" | AZURE_PROVIDER => Some(ModelProvider::Azure),
            "ollama" | OLLAMA_PROVIDER => Some(ModelProvider::Ollama),
            _ => None,
        }
    }

    pub fn all() -> &'static [ModelProvider] {
        &[
            ModelProvider::OpenAi,
            ModelProvider::Azure,
            ModelProvider::Ollama,
        ]
    }

    pub fn default_config(self) -> ModelConfig {
        match self {
            ModelProvider::OpenAi => ModelConfig::OpenAi(OpenAiConfig {
                model: OPENAI_DEFAULT_MODEL.to_string(),
                api_key: None,
                base_url: None,
                max_retries: Some(10),
                extra: Map::new(),
            }),
            ModelProvider::Azure => ModelConfig::Azure(AzureConfig {
                model: "gpt-4o".to_string(),
                azure_endpoint: "https://{your-custom-endpoint}.openai.azure.com/".to_string(),
                azure_deployment: "{your-azure-deployment}".to_string(),
                api_version: "2024-10-21".to_string(),
                api_key: None,
                max_retries: Some(10),
                extra: Map::new(),
            }),
            ModelProvider::Ollama => ModelConfig::Ollama(OllamaConfig {
                model: "qwen2.5vl:32b".to_string(),
                host: "http://localhost:11434".to_string(),
                max_retries: Some(5),
                extra: Map::new(),
            }),
        }
    }

    /// Named presets in display order. Preset detection takes the first match.
    pub fn presets(self) -> Vec<(String, ModelConfig)> {
        let default = self.default_config();
        match default {
            ModelConfig::OpenAi(base) => {
                let mut presets = Vec::with_capacity(OPENAI_PRESET_MODELS.len() + 1);
                presets.push((
                    OPENROUTER_PRESET.to_string(),
                    ModelConfig::OpenAi(OpenAiConfig {
                        base_url: Some(OPENROUTER_BASE_URL.to_string()),
                        ..base.clone()
                    }),
                ));
                for model in OPENAI_PRESET_MODELS {
                    presets.push((
                        model.to_string(),
                        ModelConfig::OpenAi(OpenAiConfig {
                            model: model.to_string(),
                            ..base.clone()
                        }),
                    ));
                }
                presets
            }
            other => vec![(other.model().to_string(), other)],
        }
    }

    pub fn preset(self, name: &str) -> Option<ModelConfig> {
        self.presets()
            .into_iter()
            .find(|(preset, _)| preset == name)
            .map(|(_, config)| config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OpenAiConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AzureConfig {
    pub model: String,
    pub azure_endpoint: String,
    pub azure_deployment: String,
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OllamaConfig {
    pub model: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Model client configuration, one variant per provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "provider", content = "config")]
pub enum ModelConfig {
    #[serde(rename = "OpenAIChatCompletionClient")]
    OpenAi(OpenAiConfig),
    #[serde(rename = "AzureOpenAIChatCompletionClient")]
    Azure(AzureConfig),
    #[serde(rename = "autogen_ext.models.ollama.OllamaChatCompletionClient")]
    Ollama(OllamaConfig),
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelProvider::OpenAi.default_config()
    }
}

impl ModelConfig {
    pub fn provider(&self) -> ModelProvider {
        match self {
            ModelConfig::OpenAi(_) => ModelProvider::OpenAi,
            ModelConfig::Azure(_) => ModelProvider::Azure,
            ModelConfig::Ollama(_) => ModelProvider::Ollama,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ModelConfig::OpenAi(config) => &config.model,
            ModelConfig::Azure(config) => &config.model,
            ModelConfig::Ollama(config) => &config.model,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        match &mut self {
            ModelConfig::OpenAi(config) => config.model = model,
            ModelConfig::Azure(config) => config.model = model,
            ModelConfig::Ollama(config) => config.model = model,
        }
        self
    }

    /// Name of the first preset this config satisfies, falling back to the model name.
    pub fn detect_preset(&self) -> String {
        let config = self.config_value();
        self.provider()
            .presets()
            .into_iter()
            .find(|(_, preset)| is_subset(&preset.config_value(), &config))
            .map(|(name, _)| name)
            .unwrap_or_else(|| self.model().to_string())
    }

    /// Recognized OpenAI presets (other than OpenRouter) need no advanced options.
    pub fn hides_advanced_options(&self) -> bool {
        if self.provider() != ModelProvider::OpenAi {
            return false;
        }
        let preset = self.detect_preset();
        preset != OPENROUTER_PRESET
            && self
                .provider()
                .presets()
                .iter()
                .any(|(name, _)| *name == preset)
    }

    pub fn validate(&self) -> Vec<ModelIssue> {
        let mut issues = Vec::new();
        if self.model().trim().is_empty() {
            issues.push(ModelIssue::MissingField { field: "model" });
        }
        match self {
            ModelConfig::OpenAi(config) => {
                if let Some(base_url) = config.base_url.as_deref() {
                    check_url(&mut issues, "base_url", base_url);
                }
            }
            ModelConfig::Azure(config) => {
                if config.azure_deployment.trim().is_empty() {
                    issues.push(ModelIssue::MissingField {
                        field: "azure_deployment",
                    });
                }
                if config.api_version.trim().is_empty() {
                    issues.push(ModelIssue::MissingField {
                        field: "api_version",
                    });
                }
                check_url(&mut issues, "azure_endpoint", &config.azure_endpoint);
            }
            ModelConfig::Ollama(config) => {
                check_url(&mut issues, "host", &config.host);
            }
        }
        issues
    }

    fn config_value(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut value| value.get_mut("config").map(Value::take))
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelIssue {
    #[error("{field} is required")]
    MissingField { field: &'static str },
    #[error("{field} is not a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
}

fn check_url(issues: &mut Vec<ModelIssue>, field: &'static str, value: &str) {
    if value.trim().is_empty() {
        issues.push(ModelIssue::MissingField { field });
    } else if Url::parse(value).is_err() {
        issues.push(ModelIssue::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
}

/// True when every key of `preset` is present in `config` with an equal value,
/// recursing into nested objects.
fn is_subset(preset: &Value, config: &Value) -> bool {
    match (preset, config) {
        (Value::Object(preset), Value::Object(config)) => preset.iter().all(|(key, value)| {
            config
                .get(key)
                .map(|candidate| is_subset(value, candidate))
                .unwrap_or(false)
        }),
        (Value::Object(_), _) => false,
        (preset, config) => preset == config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_tag_round_trips_on_the_wire() {
        let value = json!({
            "provider": "OpenAIChatCompletionClient",
            "config": {"model": "gpt-4o-2024-08-06", "max_retries": 10, "timeout": 30}
        });
        let config: ModelConfig = serde_json::from_value(value.clone()).expect("decode");
        assert_eq!(config.provider(), ModelProvider::OpenAi);
        assert_eq!(config.model(), "gpt-4o-2024-08-06");
        assert_eq!(serde_json::to_value(&config).expect("encode"), value);
    }

    #[test]
    fn detects_first_matching_preset() {
        let config = ModelProvider::OpenAi.default_config();
        assert_eq!(config.detect_preset(), OPENAI_DEFAULT_MODEL);

        let openrouter = ModelProvider::OpenAi
            .preset(OPENROUTER_PRESET)
            .expect("openrouter preset");
        assert_eq!(openrouter.detect_preset(), OPENROUTER_PRESET);
        assert!(!openrouter.hides_advanced_options());
    }

    #[test]
    fn extra_keys_do_not_break_preset_detection() {
        let config = ModelConfig::OpenAi(OpenAiConfig {
            api_key: Some("sk-test".to_string()),
            ..match ModelProvider::OpenAi.preset("o3-2025-04-16") {
                Some(ModelConfig::OpenAi(config)) => config,
                _ => panic!("o3 preset"),
            }
        });
        assert_eq!(config.detect_preset(), "o3-2025-04-16");
        assert!(config.hides_advanced_options());
    }

    #[test]
    fn unknown_models_fall_back_to_model_name() {
        let config = ModelProvider::OpenAi
            .default_config()
            .with_model("my-finetune");
        assert_eq!(config.detect_preset(), "my-finetune");
        assert!(!config.hides_advanced_options());
    }

    #[test]
    fn validation_reports_missing_and_invalid_fields() {
        assert!(ModelProvider::OpenAi.default_config().validate().is_empty());
        assert!(ModelProvider::Ollama.default_config().validate().is_empty());

        let issues = ModelProvider::Ollama
            .default_config()
            .with_model(" ")
            .validate();
        assert_eq!(issues, vec![ModelIssue::MissingField { field: "model" }]);

        let azure = ModelConfig::Azure(AzureConfig {
            model: "gpt-4o".to_string(),
            azure_endpoint: "not a url".to_string(),
            azure_deployment: String::new(),
            api_version: "2024-10-21".to_string(),
            api_key: None,
            max_retries: None,
            extra: Map::new(),
        });
        let issues = azure.validate();
        assert!(issues.contains(&ModelIssue::MissingField {
            field: "azure_deployment"
        }));
        assert!(issues
            .iter()
            .any(|issue| matches!(issue, ModelIssue::InvalidUrl { field: "azure_endpoint", .. })));
    }

    #[test]
    fn parses_short_and_wire_provider_names() {
        assert_eq!(ModelProvider::parse("azure"), Some(ModelProvider::Azure));
        assert_eq!(
            ModelProvider::parse(OLLAMA_PROVIDER),
            Some(ModelProvider::Ollama)
        );
        assert_eq!(ModelProvider::parse("anthropic"), None);
    }
}
