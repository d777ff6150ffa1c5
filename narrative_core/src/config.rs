//! Engine configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! context_messages = 30
//! speaker_window = 5
//! rewind_policy = "roll_back_derived_state"
//! dispatch_seed = 42
//! analysis_enabled = true
//!
//! [generator]
//! provider = "open_router"
//! model = "mistralai/mistral-7b-instruct"
//! api_key_env = "OPENROUTER_API_KEY"
//! timeout_secs = 120
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::dispatch::ScoringConfig;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// What happens to lore and navigation state when the timeline is rewound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewindPolicy {
    /// Lore triggers and navigation return to their state at the rewind point.
    #[default]
    RollBackDerivedState,

    /// Once revealed, stays revealed: only messages are removed.
    KeepDerivedState,
}

/// Which text generation backend to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gemini,
    OpenRouter,
    #[default]
    KoboldCpp,
    LmStudio,
}

/// The `[generator]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub provider: ProviderKind,

    /// Model name, required by hosted providers.
    pub model: Option<String>,

    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,

    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,

    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            base_url: None,
            api_key_env: None,
            timeout_secs: 120,
        }
    }
}

impl GeneratorConfig {
    /// The configured key variable, or the provider's conventional one.
    pub fn api_key_env(&self) -> Option<&str> {
        match (&self.api_key_env, self.provider) {
            (Some(name), _) => Some(name.as_str()),
            (None, ProviderKind::Gemini) => Some("GEMINI_API_KEY"),
            (None, ProviderKind::OpenRouter) => Some("OPENROUTER_API_KEY"),
            (None, _) => None,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of recent visible messages included in prompts.
    pub context_messages: usize,

    /// Number of recent messages that count against a character who just spoke.
    pub speaker_window: usize,

    pub rewind_policy: RewindPolicy,

    /// Fixed seed for turn dispatch. Random when absent.
    pub dispatch_seed: Option<u64>,

    /// Tag replies with an emotion and follow moves named in the user's text.
    pub analysis_enabled: bool,

    pub generator: GeneratorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_messages: 30,
            speaker_window: 5,
            rewind_policy: RewindPolicy::default(),
            dispatch_seed: None,
            analysis_enabled: true,
            generator: GeneratorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Speaker scoring parameters derived from this configuration.
    pub fn scoring(&self) -> ScoringConfig {
        ScoringConfig {
            recency_window: self.speaker_window,
            ..ScoringConfig::default()
        }
    }
}
