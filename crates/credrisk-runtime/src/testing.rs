//! Scripted provider for tests and offline runs.
//!
//! Replies are queued either globally or on a route. A route matches when its
//! marker appears in the system message, so each pipeline stage can be
//! scripted independently by the prompt it sends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::providers::{
    CallParams, ChatMessage, Completion, LlmProvider, ProviderError, Role, TokenUsage,
};

/// One scripted provider outcome.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply {
        text: String,
        tokens: u32,
        delay: Duration,
    },
    Fail(ProviderError),
}

impl Scripted {
    pub fn reply(text: impl Into<String>, tokens: u32) -> Self {
        Self::Reply {
            text: text.into(),
            tokens,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct Route {
    marker: String,
    queue: VecDeque<Scripted>,
    otherwise: Option<Scripted>,
}

/// A provider that plays back scripted outcomes.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Scripted>>,
    routes: Mutex<Vec<Route>>,
    calls: AtomicUsize,
    models: Mutex<Vec<String>>,
    systems: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, text: impl Into<String>, tokens: u32) {
        self.queue.lock().push_back(Scripted::reply(text, tokens));
    }

    pub fn push_delayed_ok(&self, text: impl Into<String>, tokens: u32, delay: Duration) {
        self.queue.lock().push_back(Scripted::Reply {
            text: text.into(),
            tokens,
            delay,
        });
    }

    pub fn push_error(&self, error: ProviderError) {
        self.queue.lock().push_back(Scripted::Fail(error));
    }

    /// Queue outcomes for calls whose system message contains `marker`.
    pub fn route(&self, marker: &str, outcomes: impl IntoIterator<Item = Scripted>) {
        self.route_entry(marker, |route| route.queue.extend(outcomes));
    }

    /// Outcome used for `marker` once its queue is empty.
    pub fn route_always(&self, marker: &str, outcome: Scripted) {
        self.route_entry(marker, |route| route.otherwise = Some(outcome));
    }

    fn route_entry(&self, marker: &str, apply: impl FnOnce(&mut Route)) {
        let mut routes = self.routes.lock();
        if let Some(route) = routes.iter_mut().find(|r| r.marker == marker) {
            apply(route);
            return;
        }
        let mut route = Route {
            marker: marker.to_string(),
            queue: VecDeque::new(),
            otherwise: None,
        };
        apply(&mut route);
        routes.push(route);
    }

    /// Physical calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Deployment names requested, in call order.
    pub fn models(&self) -> Vec<String> {
        self.models.lock().clone()
    }

    /// Calls whose system message contained `marker`.
    pub fn calls_matching(&self, marker: &str) -> usize {
        self.systems
            .lock()
            .iter()
            .filter(|s| s.contains(marker))
            .count()
    }

    fn next_outcome(&self, system: &str) -> Option<Scripted> {
        {
            let mut routes = self.routes.lock();
            if let Some(route) = routes.iter_mut().find(|r| system.contains(&r.marker)) {
                if let Some(next) = route.queue.pop_front() {
                    return Some(next);
                }
                if let Some(always) = &route.otherwise {
                    return Some(always.clone());
                }
            }
        }
        self.queue.lock().pop_front()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CallParams,
    ) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models.lock().push(params.deployment.clone());

        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.systems.lock().push(system.clone());

        match self.next_outcome(&system) {
            Some(Scripted::Reply { text, tokens, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(Completion {
                    text,
                    usage: TokenUsage {
                        prompt_tokens: 0,
                        completion_tokens: tokens,
                    },
                    deployment: params.deployment.clone(),
                    finish_reason: Some("stop".to_string()),
                })
            }
            Some(Scripted::Fail(error)) => Err(error),
            None => Err(ProviderError::ApiError {
                status: 400,
                message: "no scripted reply".to_string(),
            }),
        }
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Dispatcher over `provider` with default limits and no pacing sleep.
pub fn unpaced_dispatcher(provider: std::sync::Arc<ScriptedProvider>) -> crate::dispatcher::ModelDispatcher {
    let config = crate::config::DispatcherConfig {
        pacing: crate::config::PacingConfig {
            base_delay: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    };
    crate::dispatcher::ModelDispatcher::new(provider, config, crate::config::ModelTiers::default())
}
