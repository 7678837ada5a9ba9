use serde::{Deserialize, Serialize};

pub const DEFAULT_API_ADDR: &str = "127.0.0.1:3000";
pub const PREFERRED_MODEL: &str = "gpt-4.1-mini";
pub const SUGGESTED_BASE_URLS: [&str; 3] = [
    "https://api.openai.com/v1",
    "https://openrouter.ai/api/v1",
    "https://api.anthropic.com/v1",
];

/// Connection details for an OpenAI-compatible chat completions endpoint.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub models: Vec<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("models", &self.models)
            .finish()
    }
}

impl ProviderConfig {
    /// `None` unless both a base URL and an API key are set.
    pub fn from_env() -> Option<Self> {
        let base_url = non_empty_env("PROMPTSCENE_LLM_BASE_URL")?;
        let api_key = non_empty_env("PROMPTSCENE_LLM_API_KEY")?;
        let models = non_empty_env("PROMPTSCENE_LLM_MODELS")
            .map(|v| parse_model_list(&v))
            .unwrap_or_else(|| vec![PREFERRED_MODEL.to_string()]);
        Some(Self {
            base_url,
            api_key,
            models,
        })
    }

    /// The model whose last path segment is the preferred one, else the first.
    pub fn default_model(&self) -> Option<String> {
        self.models
            .iter()
            .find(|id| id.rsplit('/').next() == Some(PREFERRED_MODEL))
            .or_else(|| self.models.first())
            .cloned()
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

pub fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

/// Everything the host thread reads from the environment at startup.
#[derive(Clone, Debug)]
pub struct HostSettings {
    pub api_addr: String,
    pub provider: Option<ProviderConfig>,
    pub model_override: Option<String>,
}

impl HostSettings {
    pub fn from_env() -> Self {
        Self {
            api_addr: non_empty_env("PROMPTSCENE_API_ADDR")
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            provider: ProviderConfig::from_env(),
            model_override: non_empty_env("PROMPTSCENE_LLM_MODEL"),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
