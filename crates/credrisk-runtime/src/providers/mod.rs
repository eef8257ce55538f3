//! Model service backends.
//!
//! A backend performs exactly one physical chat completion per call. It never
//! retries or waits on its own: admission, pacing and retry belong to the
//! dispatcher, so a backend only has to map each failure onto the
//! [`ProviderError`] variant the dispatcher classifies.
//!
//! API keys are held as [`secrets::ApiKey`] and never appear in `Debug` output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod azure_openai;
mod factory;
pub mod secrets;

pub use azure_openai::{AzureOpenAiBackend, AzureOpenAiProvider, AzureSettings};
pub use factory::{ProviderBackend, ProviderRegistry};
pub use secrets::{ApiKey, KeyOrigin};

/// Failure of one completion call.
///
/// The variants are the dispatcher's classification input: 429s and
/// `RateLimited` back off, 5xx/timeouts/transport errors retry, everything
/// else is fatal for the call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    HttpError(String),

    #[error("model service throttled the call (429), retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("model service returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("unreadable completion body: {0}")]
    ParseError(String),

    #[error("authentication rejected by the model service")]
    AuthError,

    #[error("no completion within {0:?}")]
    Timeout(Duration),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Parameters of one completion call, resolved from a model tier.
#[derive(Debug, Clone, PartialEq)]
pub struct CallParams {
    /// Deployment serving the requested tier.
    pub deployment: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per-call budget; the dispatcher enforces it too.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    /// Deployment or model the service reports having used.
    pub deployment: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// A chat-completion backend.
///
/// Only the dispatcher calls this; phase executors go through
/// [`ModelDispatcher::invoke`](crate::dispatcher::ModelDispatcher::invoke).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CallParams,
    ) -> Result<Completion, ProviderError>;

    /// Cheap reachability check; must not spend tokens.
    async fn health_check(&self) -> bool;

    fn name(&self) -> &str;
}
