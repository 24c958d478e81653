use std::time::Duration;

use crate::errors::GenerationError;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Configuration for the OpenAI chat completions client.
#[derive(Clone, Debug)]
pub struct OpenAiClientConfig {
    /// API key used for bearer auth.
    pub api_key: String,
    /// Base URL for the OpenAI-compatible endpoint.
    ///
    /// Useful for proxies or local test servers.
    pub base_url: String,
    pub model: String,
    /// Sampling temperature, `0.0..=1.0`.
    pub temperature: f32,
    /// Default HTTP timeout for requests.
    pub timeout: Duration,
}

impl OpenAiClientConfig {
    /// Creates a config with sensible defaults and a provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from `OPENAI_API_KEY`, `OPENAI_MODEL` and
    /// `OPENAI_TEMPERATURE`.
    pub fn from_env() -> Result<Self, GenerationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GenerationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(GenerationError::Validation(
                "OPENAI_API_KEY environment variable is required but not set".into(),
            ));
        }
        let mut config = Self::new(api_key);
        if let Some(model) = lookup("OPENAI_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model = model.trim().to_string();
        }
        if let Some(raw) = lookup("OPENAI_TEMPERATURE") {
            config.temperature = raw.trim().parse().map_err(|_| {
                GenerationError::Validation(format!("invalid OPENAI_TEMPERATURE {raw:?}"))
            })?;
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL").filter(|u| !u.trim().is_empty()) {
            config.base_url = base_url;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the API base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Overrides the default HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.api_key.trim().is_empty() {
            return Err(GenerationError::Validation(
                "OpenAI api_key must not be empty".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(GenerationError::Validation(
                "Model name must be a non-empty string".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(GenerationError::Validation(
                "Temperature must be a number between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}
