//! Rate-limited model dispatcher.
//!
//! Every model call in the pipeline goes through [`ModelDispatcher::invoke`],
//! which layers the following around one [`LlmProvider`]:
//!
//! 1. **Admission control**: a sliding window of physical calls. When the
//!    window is at `admission_threshold` of its cap, the caller sleeps until
//!    the oldest entry expires.
//! 2. **Adaptive pacing**: a short sleep scaled by the recent success ratio.
//! 3. **Classified retry**: rate limits and transient failures are retried on
//!    separate capped exponential schedules; fatal failures are not retried.
//!
//! Retries are sequential, so one logical invoke never has more than one
//! physical call in flight. Window, pacer and counters share one mutex that
//! is never held across an await.

mod backoff;
mod classify;
mod pacing;
mod stats;
mod window;

pub use backoff::RetrySchedule;
pub use classify::{classify, classify_message, retry_after_hint, FailureClass};
pub use pacing::AdaptivePacer;
pub use stats::DispatcherStats;
pub use window::RateWindow;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{DispatcherConfig, ModelTiers};
use crate::providers::{CallParams, ChatMessage, LlmProvider, ProviderError};
use stats::DispatchCounters;

/// Model capability tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Capable,
}

/// One logical model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Evaluation id the call belongs to.
    pub correlation_id: String,
    pub agent_id: String,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tier: ModelTier,
}

impl ModelRequest {
    pub fn new(
        correlation_id: impl Into<String>,
        agent_id: impl Into<String>,
        tier: ModelTier,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            agent_id: agent_id.into(),
            system: String::new(),
            prompt: String::new(),
            max_tokens: 500,
            temperature: 0.0,
            tier,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Successful dispatcher result.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub tokens_used: u32,
    /// Time from invoke to response, including waits and retries.
    pub elapsed: Duration,
    /// Physical attempts made.
    pub attempts: u32,
    pub model: String,
}

/// Classified dispatcher failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("rate limited after {attempts} attempts: {message}")]
    RateLimited { attempts: u32, message: String },

    #[error("transient failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    #[error("fatal model error: {message}")]
    Fatal { attempts: u32, message: String },
}

impl DispatchError {
    fn new(class: FailureClass, attempts: u32, message: String) -> Self {
        match class {
            FailureClass::RateLimited => Self::RateLimited { attempts, message },
            FailureClass::Transient => Self::Transient { attempts, message },
            FailureClass::Fatal => Self::Fatal { attempts, message },
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::RateLimited { .. } => FailureClass::RateLimited,
            Self::Transient { .. } => FailureClass::Transient,
            Self::Fatal { .. } => FailureClass::Fatal,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::RateLimited { attempts, .. }
            | Self::Transient { attempts, .. }
            | Self::Fatal { attempts, .. } => *attempts,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::RateLimited { message, .. }
            | Self::Transient { message, .. }
            | Self::Fatal { message, .. } => message,
        }
    }
}

#[derive(Debug)]
struct DispatchState {
    window: RateWindow,
    pacer: AdaptivePacer,
    counters: DispatchCounters,
}

/// Shared, rate-limited entry point to the model service.
pub struct ModelDispatcher {
    provider: Arc<dyn LlmProvider>,
    config: DispatcherConfig,
    tiers: ModelTiers,
    state: Mutex<DispatchState>,
}

impl std::fmt::Debug for ModelDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDispatcher")
            .field("provider", &self.provider.name())
            .field("tiers", &self.tiers)
            .finish()
    }
}

impl ModelDispatcher {
    pub fn new(provider: Arc<dyn LlmProvider>, config: DispatcherConfig, tiers: ModelTiers) -> Self {
        let state = DispatchState {
            window: RateWindow::new(
                config.window,
                config.max_requests_per_window,
                config.admission_threshold,
            ),
            pacer: AdaptivePacer::new(config.pacing.clone()),
            counters: DispatchCounters::default(),
        };

        Self {
            provider,
            config,
            tiers,
            state: Mutex::new(state),
        }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Perform one logical model call with admission, pacing and retry.
    pub async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, DispatchError> {
        let started = Instant::now();
        self.state.lock().counters.total_requests += 1;

        let params = CallParams {
            deployment: self.tiers.deployment(request.tier).to_string(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            timeout: self.config.call_timeout,
        };
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage::system(request.system.as_str()));
        }
        messages.push(ChatMessage::user(request.prompt.as_str()));

        let mut rate_limit_schedule = RetrySchedule::new(&self.config.rate_limit_retry);
        let mut transient_schedule = RetrySchedule::new(&self.config.transient_retry);
        let mut attempts = 0u32;

        loop {
            self.admit(&request).await;
            self.pace().await;
            attempts += 1;

            let outcome = match tokio::time::timeout(
                self.config.call_timeout,
                self.provider.complete(&messages, &params),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.config.call_timeout)),
            };

            let error = match outcome {
                Ok(response) => {
                    let elapsed = started.elapsed();
                    let tokens = response.usage.total();
                    {
                        let mut state = self.state.lock();
                        state.pacer.record(true);
                        state.counters.record_success(tokens, elapsed);
                    }
                    tracing::debug!(
                        evaluation_id = %request.correlation_id,
                        agent = %request.agent_id,
                        attempts,
                        tokens,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Model call succeeded"
                    );
                    return Ok(ModelResponse {
                        text: response.text,
                        tokens_used: tokens,
                        elapsed,
                        attempts,
                        model: response.deployment,
                    });
                }
                Err(error) => error,
            };

            let class = classify(&error);
            {
                let mut state = self.state.lock();
                state.pacer.record(false);
                if class == FailureClass::RateLimited {
                    state.counters.rate_limited_requests += 1;
                }
            }

            let hint = retry_after_hint(&error);
            let next = match class {
                FailureClass::RateLimited => rate_limit_schedule.next_delay(hint),
                FailureClass::Transient => transient_schedule.next_delay(hint),
                FailureClass::Fatal => None,
            };

            match next {
                Some(delay) => {
                    self.state.lock().counters.retried_requests += 1;
                    tracing::warn!(
                        evaluation_id = %request.correlation_id,
                        agent = %request.agent_id,
                        class = ?class,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Model call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    self.state.lock().counters.failed_requests += 1;
                    tracing::error!(
                        evaluation_id = %request.correlation_id,
                        agent = %request.agent_id,
                        class = ?class,
                        attempts,
                        error = %error,
                        "Model call failed"
                    );
                    return Err(DispatchError::new(class, attempts, error.to_string()));
                }
            }
        }
    }

    /// Wait for room in the admission window, then claim a slot.
    async fn admit(&self, request: &ModelRequest) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                match state.window.admission_wait(now) {
                    None => {
                        state.window.record(now);
                        return;
                    }
                    Some(wait) => wait,
                }
            };
            tracing::info!(
                evaluation_id = %request.correlation_id,
                agent = %request.agent_id,
                wait_ms = wait.as_millis() as u64,
                "Admission window full, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn pace(&self) {
        let delay = self.state.lock().pacer.next_delay();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        let mut state = self.state.lock();
        let occupancy = state.window.occupancy(Instant::now());
        let cap = state.window.cap();
        let factor = state.pacer.factor();
        state.counters.snapshot(occupancy, cap, factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacingConfig;
    use crate::testing::ScriptedProvider;

    fn quiet_config() -> DispatcherConfig {
        DispatcherConfig {
            pacing: PacingConfig {
                base_delay: Duration::ZERO,
                ..PacingConfig::default()
            },
            ..DispatcherConfig::default()
        }
    }

    fn request() -> ModelRequest {
        ModelRequest::new("eval_test", "test_agent", ModelTier::Fast).prompt("hello")
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_success() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error(ProviderError::RateLimited { retry_after: None });
        provider.push_error(ProviderError::RateLimited { retry_after: None });
        provider.push_ok("done", 42);

        let dispatcher = ModelDispatcher::new(provider.clone(), quiet_config(), ModelTiers::default());
        let response = dispatcher.invoke(request()).await.unwrap();

        assert_eq!(response.text, "done");
        assert_eq!(response.attempts, 3);
        assert_eq!(provider.calls(), 3);

        let stats = dispatcher.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.rate_limited_requests, 2);
        assert_eq!(stats.retried_requests, 2);
        assert_eq!(stats.total_tokens_used, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion() {
        let provider = Arc::new(ScriptedProvider::new());
        for _ in 0..10 {
            provider.push_error(ProviderError::ApiError {
                status: 503,
                message: "Service Unavailable".into(),
            });
        }

        let dispatcher = ModelDispatcher::new(provider.clone(), quiet_config(), ModelTiers::default());
        let err = dispatcher.invoke(request()).await.unwrap_err();

        assert_eq!(err.class(), FailureClass::Transient);
        assert_eq!(err.attempts(), 4);
        assert_eq!(provider.calls(), 4);
        assert_eq!(dispatcher.stats().failed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error(ProviderError::AuthError);

        let dispatcher = ModelDispatcher::new(provider.clone(), quiet_config(), ModelTiers::default());
        let err = dispatcher.invoke(request()).await.unwrap_err();

        assert!(matches!(err, DispatchError::Fatal { attempts: 1, .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_honoured() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error(ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(20)),
        });
        provider.push_ok("ok", 1);

        let dispatcher = ModelDispatcher::new(provider, quiet_config(), ModelTiers::default());
        let started = Instant::now();
        dispatcher.invoke(request()).await.unwrap();
        let waited = started.elapsed();

        assert!(waited >= Duration::from_secs(18), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(22), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out_as_transient() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_delayed_ok("late", 1, Duration::from_secs(600));
        provider.push_ok("fast", 1);

        let config = DispatcherConfig {
            call_timeout: Duration::from_secs(5),
            ..quiet_config()
        };
        let dispatcher = ModelDispatcher::new(provider, config, ModelTiers::default());
        let response = dispatcher.invoke(request()).await.unwrap();

        assert_eq!(response.text, "fast");
        assert_eq!(response.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tier_selects_deployment() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok("a", 1);
        provider.push_ok("b", 1);

        let dispatcher = ModelDispatcher::new(provider.clone(), quiet_config(), ModelTiers::default());
        dispatcher.invoke(request()).await.unwrap();
        dispatcher
            .invoke(ModelRequest::new("eval_test", "x", ModelTier::Capable).prompt("p"))
            .await
            .unwrap();

        assert_eq!(provider.models(), vec!["o3-mini".to_string(), "gpt-4o".to_string()]);
    }
}
