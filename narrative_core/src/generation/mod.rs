//! The AI collaborator boundary.
//!
//! The engine only knows [`TextGenerator`]; concrete backends live in [`provider`].
//! Every call can be cancelled through a [`CancellationToken`], and a cancelled call is
//! reported as [`GenerationError::Cancelled`] rather than as a failure. Backends that keep
//! generating server-side after the request is dropped are told to stop through
//! [`TextGenerator::abort`].

mod provider;

pub use provider::*;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from text generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation was cancelled")]
    Cancelled,

    #[error("API key missing: set {0}")]
    MissingApiKey(String),

    #[error("no model configured for {0}")]
    MissingModel(String),

    #[error("generation request failed: {0}")]
    RequestFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A single prompt for the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,

    /// The reply must contain a JSON object; only that object is returned.
    pub expect_json: bool,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            expect_json: false,
        }
    }

    pub fn json(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            expect_json: true,
        }
    }
}

/// Provider-agnostic text generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;

    /// Ask the backend to stop a generation whose request was abandoned.
    async fn abort(&self) {}
}

/// Run a generation, giving up as soon as `cancel` fires.
pub async fn generate_cancellable<G>(
    generator: &G,
    request: GenerationRequest,
    cancel: &CancellationToken,
) -> Result<String, GenerationError>
where
    G: TextGenerator + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(GenerationError::Cancelled);
    }

    let reply = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        reply = generator.generate(request) => Some(reply),
    };

    match reply {
        Some(reply) => reply,
        None => {
            generator.abort().await;
            Err(GenerationError::Cancelled)
        }
    }
}

/// Shape a raw reply for `request`: trimmed text, or just the JSON object when one is
/// expected.
pub fn finish_reply(request: &GenerationRequest, reply: &str) -> Result<String, GenerationError> {
    if !request.expect_json {
        return Ok(reply.trim().to_string());
    }
    json_object(reply)
        .map(str::to_string)
        .ok_or_else(|| GenerationError::InvalidResponse("no JSON object in reply".to_string()))
}

/// Pull a JSON object out of a reply that wraps it in prose or code fences.
///
/// Takes the text between the first `{` and the last `}` and parses it.
pub fn extract_json(reply: &str) -> Result<serde_json::Value, GenerationError> {
    let candidate = json_object(reply)
        .ok_or_else(|| GenerationError::InvalidResponse("no JSON object in reply".to_string()))?;
    serde_json::from_str(candidate).map_err(|e| GenerationError::InvalidResponse(e.to_string()))
}

fn json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (start < end).then(|| &reply[start..=end])
}
