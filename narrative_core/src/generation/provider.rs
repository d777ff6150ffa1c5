//! HTTP text generation backends.
//!
//! Request shaping and reply parsing are plain functions over `serde_json::Value`, so
//! they can be checked without a network. [`ProviderClient`] only adds the transport.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{finish_reply, GenerationError, GenerationRequest, TextGenerator};
use crate::config::{GeneratorConfig, ProviderKind};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai";
pub const DEFAULT_KOBOLDCPP_URL: &str = "http://localhost:5001";
pub const DEFAULT_LMSTUDIO_URL: &str = "http://localhost:1234";

/// A configured backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    Gemini { api_key: String, model: String },
    OpenRouter { api_key: String, model: String },
    KoboldCpp { base_url: String },
    LmStudio { base_url: String },
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Gemini { .. } => "gemini",
            Provider::OpenRouter { .. } => "openrouter",
            Provider::KoboldCpp { .. } => "koboldcpp",
            Provider::LmStudio { .. } => "lmstudio",
        }
    }

    /// Build a provider from configuration, reading API keys through `lookup_env`.
    pub fn from_config(
        config: &GeneratorConfig,
        lookup_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, GenerationError> {
        let api_key = || {
            let var = config.api_key_env().unwrap_or_default();
            lookup_env(var)
                .filter(|key| !key.is_empty())
                .ok_or_else(|| GenerationError::MissingApiKey(var.to_string()))
        };
        let base_url = |default: &str| {
            config
                .base_url
                .as_deref()
                .unwrap_or(default)
                .trim_end_matches('/')
                .to_string()
        };

        Ok(match config.provider {
            ProviderKind::Gemini => {
                let model = config
                    .model
                    .as_deref()
                    .unwrap_or(DEFAULT_GEMINI_MODEL)
                    .trim_start_matches("models/")
                    .to_string();
                Provider::Gemini {
                    api_key: api_key()?,
                    model,
                }
            }
            ProviderKind::OpenRouter => {
                let model = config
                    .model
                    .clone()
                    .filter(|m| !m.is_empty())
                    .ok_or_else(|| GenerationError::MissingModel("openrouter".to_string()))?;
                Provider::OpenRouter {
                    api_key: api_key()?,
                    model,
                }
            }
            ProviderKind::KoboldCpp => Provider::KoboldCpp {
                base_url: base_url(DEFAULT_KOBOLDCPP_URL),
            },
            ProviderKind::LmStudio => Provider::LmStudio {
                base_url: base_url(DEFAULT_LMSTUDIO_URL),
            },
        })
    }

    /// Endpoint for a generation call.
    pub fn request_url(&self) -> String {
        match self {
            Provider::Gemini { api_key, model } => format!(
                "{GEMINI_BASE_URL}/v1beta/models/{model}:generateContent?key={api_key}"
            ),
            Provider::OpenRouter { .. } => format!("{OPENROUTER_BASE_URL}/api/v1/chat/completions"),
            Provider::KoboldCpp { base_url } => format!("{base_url}/api/v1/generate"),
            Provider::LmStudio { base_url } => format!("{base_url}/v1/chat/completions"),
        }
    }

    /// Endpoint that stops an in-flight generation, for backends that keep going after
    /// the client disconnects.
    pub fn stop_url(&self) -> Option<String> {
        match self {
            Provider::KoboldCpp { base_url } => Some(format!("{base_url}/api/v1/generate/stop")),
            _ => None,
        }
    }

    /// Bearer token for providers that authenticate by header.
    pub fn bearer_token(&self) -> Option<&str> {
        match self {
            Provider::OpenRouter { api_key, .. } => Some(api_key),
            _ => None,
        }
    }

    /// JSON body for a prompt.
    pub fn request_body(&self, prompt: &str) -> Value {
        match self {
            Provider::Gemini { .. } => json!({
                "contents": [{ "parts": [{ "text": prompt }] }]
            }),
            Provider::OpenRouter { model, .. } => json!({
                "model": model,
                "messages": [{ "role": "user", "content": prompt }]
            }),
            Provider::KoboldCpp { .. } => json!({
                "prompt": prompt,
                "use_story": false,
                "use_memory": false,
                "use_authors_note": false,
                "use_world_info": false,
                "max_context_length": 16384,
                "max_length": 512,
                "quiet": true,
                "temperature": 1.0,
                "min_p": 0.1,
                "top_p": 1.0,
                "top_k": 0,
                "tfs": 1,
                "typical": 1,
                "rep_pen": 1.0,
                "rep_pen_range": 2048,
                "rep_pen_slope": 0.7,
                "mirostat": 0,
                "mirostat_tau": 4,
                "mirostat_eta": 0.1,
                "dry_multiplier": 0.25,
                "dry_base": 1.75,
                "dry_allowed_length": 2,
                "dry_penalty_last_n": -1,
                "sampler_order": [6, 0, 1, 2, 3, 4, 5]
            }),
            Provider::LmStudio { .. } => json!({
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": 0.7,
                "stream": false
            }),
        }
    }

    /// Extract the generated text from a provider response.
    pub fn parse_reply(&self, body: &Value) -> Result<String, GenerationError> {
        let text = match self {
            Provider::Gemini { .. } => body
                .pointer("/candidates/0/content/parts/0/text")
                .and_then(Value::as_str)
                .map(str::to_string),
            Provider::OpenRouter { .. } | Provider::LmStudio { .. } => body
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(str::to_string),
            Provider::KoboldCpp { .. } => body
                .pointer("/results/0/text")
                .and_then(Value::as_str)
                .map(|t| t.trim().to_string()),
        };

        text.ok_or_else(|| {
            GenerationError::InvalidResponse(format!("{} reply has no text", self.name()))
        })
    }
}

/// A [`TextGenerator`] backed by one HTTP provider.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: Client,
    provider: Provider,
}

impl ProviderClient {
    pub fn new(provider: Provider, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, provider }
    }

    /// Create a client from configuration, reading API keys from the environment.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let provider = Provider::from_config(config, |name| std::env::var(name).ok())?;
        Ok(Self::new(provider, config.timeout_secs))
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }
}

#[async_trait]
impl TextGenerator for ProviderClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let mut call = self
            .client
            .post(self.provider.request_url())
            .json(&self.provider.request_body(&request.prompt));
        if let Some(token) = self.provider.bearer_token() {
            call = call.bearer_auth(token);
        }

        let response = call.send().await.map_err(|e| {
            tracing::warn!(provider = self.provider.name(), error = %e, "Generation request failed");
            GenerationError::RequestFailed(e.without_url().to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(provider = self.provider.name(), %status, "Generation provider returned an error");
            return Err(GenerationError::RequestFailed(format!(
                "{} API error: {status} - {error_text}",
                self.provider.name()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        let text = self.provider.parse_reply(&body)?;
        finish_reply(&request, &text)
    }

    async fn abort(&self) {
        let Some(url) = self.provider.stop_url() else {
            return;
        };
        match self.client.post(&url).send().await {
            Ok(_) => tracing::debug!(provider = self.provider.name(), "Generation stopped"),
            Err(e) => {
                tracing::warn!(provider = self.provider.name(), error = %e, "Failed to stop generation")
            }
        }
    }
}
