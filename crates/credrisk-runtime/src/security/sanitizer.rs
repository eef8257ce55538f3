//! Output sanitization.
//!
//! Every generated text passes through [`OutputSanitizer::sanitize`] before it
//! is stored in the result. Safe text is returned unchanged. Unsafe text is
//! replaced with the model's redaction. When the check itself cannot be
//! trusted the text is replaced by a fixed placeholder, except for
//! recognisably financial content whose verdict was merely unparseable.

use serde::Deserialize;

use credrisk_core::{extract, patterns, SanitizationNote, SanitizationTarget};

use crate::cache::{CachedVerdict, SanitizationCache};
use crate::dispatcher::{ModelDispatcher, ModelRequest, ModelTier};
use crate::prompts;

pub const SANITIZER_AGENT_ID: &str = "output_sanitizer";

/// Replacement for content whose verdict could not be read.
pub const PRECAUTION_PLACEHOLDER: &str = "[CONTENIDO SANITIZADO POR PRECAUCIÓN]";

/// Replacement for content whose check failed outright.
pub const BLOCKED_PLACEHOLDER: &str = "[CONTENIDO BLOQUEADO POR ERROR DE SEGURIDAD]";

/// Justification used when a sanitized final report no longer decodes.
pub const REPORT_PLACEHOLDER: &str = "[CONTENIDO SANITIZADO POR SEGURIDAD]";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SanitizerPayload {
    #[serde(alias = "es_seguro")]
    is_safe: bool,
    #[serde(alias = "texto_sanitizado")]
    sanitized_text: String,
    #[serde(alias = "detalles")]
    details: String,
}

/// Result of one sanitization pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizationOutcome {
    pub is_safe: bool,
    pub text: String,
    pub details: String,
    /// Whether `text` differs from the input.
    pub applied: bool,
    pub tokens_used: u32,
}

impl SanitizationOutcome {
    pub fn note(&self, target: SanitizationTarget) -> SanitizationNote {
        SanitizationNote {
            target,
            is_safe: self.is_safe,
            sanitization_applied: self.applied,
            details: self.details.clone(),
        }
    }
}

/// Fast-tier sanitizer with a verdict cache.
pub struct OutputSanitizer {
    cache: SanitizationCache,
}

impl OutputSanitizer {
    pub fn new(cache: SanitizationCache) -> Self {
        Self { cache }
    }

    pub async fn sanitize(
        &self,
        dispatcher: &ModelDispatcher,
        evaluation_id: &str,
        target: SanitizationTarget,
        text: &str,
    ) -> SanitizationOutcome {
        if text.trim().is_empty() {
            return pass_through(text, "Nothing to sanitize", 0);
        }

        if let Some(cached) = self.cache.get(text).await {
            tracing::debug!(evaluation_id, target = ?target, "Sanitization cache hit");
            return SanitizationOutcome {
                applied: cached.text != text,
                is_safe: cached.is_safe,
                text: cached.text,
                details: cached.details,
                tokens_used: 0,
            };
        }

        let call = ModelRequest::new(evaluation_id, SANITIZER_AGENT_ID, ModelTier::Fast)
            .system(prompts::SANITIZER_SYSTEM_PROMPT)
            .prompt(prompts::sanitizer_prompt(text))
            .max_tokens(1000)
            .temperature(0.0);

        let response = match dispatcher.invoke(call).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(evaluation_id, target = ?target, error = %e, "Sanitization call failed, blocking content");
                self.cache
                    .insert_safe(BLOCKED_PLACEHOLDER, "Placeholder")
                    .await;
                return replaced(BLOCKED_PLACEHOLDER, format!("Error en sanitización: {e}"), 0);
            }
        };
        let tokens = response.tokens_used;

        let payload = match extract::decode::<SanitizerPayload>(&response.text) {
            Ok(payload) => payload,
            Err(e) if patterns::contains_financial_vocabulary(text) => {
                tracing::warn!(evaluation_id, target = ?target, error = %e, "Sanitizer output unparseable, passing financial content");
                return pass_through(
                    text,
                    "Sanitizer output unparseable - financial analysis passed through",
                    tokens,
                );
            }
            Err(e) => {
                tracing::warn!(evaluation_id, target = ?target, error = %e, "Sanitizer output unparseable, replacing content");
                self.cache
                    .insert_safe(PRECAUTION_PLACEHOLDER, "Placeholder")
                    .await;
                return replaced(
                    PRECAUTION_PLACEHOLDER,
                    "Sanitizer output unparseable - content replaced".to_string(),
                    tokens,
                );
            }
        };

        let outcome = if payload.is_safe {
            pass_through(text, &payload.details, tokens)
        } else {
            let redacted = if payload.sanitized_text.trim().is_empty() {
                PRECAUTION_PLACEHOLDER.to_string()
            } else {
                payload.sanitized_text
            };
            tracing::warn!(evaluation_id, target = ?target, "Generated content redacted");
            replaced(&redacted, payload.details, tokens)
        };
        self.remember(text, &outcome).await;
        outcome
    }

    /// Cache a model verdict for `input`, and a redacted output as already safe.
    async fn remember(&self, input: &str, outcome: &SanitizationOutcome) {
        self.cache
            .insert(
                input,
                CachedVerdict {
                    is_safe: outcome.is_safe,
                    text: outcome.text.clone(),
                    details: outcome.details.clone(),
                },
            )
            .await;
        if outcome.applied {
            self.cache
                .insert_safe(&outcome.text, "Previously sanitized output")
                .await;
        }
    }
}

impl Default for OutputSanitizer {
    fn default() -> Self {
        Self::new(SanitizationCache::default())
    }
}

fn pass_through(text: &str, details: &str, tokens_used: u32) -> SanitizationOutcome {
    SanitizationOutcome {
        is_safe: true,
        text: text.to_string(),
        details: details.to_string(),
        applied: false,
        tokens_used,
    }
}

fn replaced(text: &str, details: String, tokens_used: u32) -> SanitizationOutcome {
    SanitizationOutcome {
        is_safe: false,
        text: text.to_string(),
        details,
        applied: true,
        tokens_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::providers::ProviderError;
    use crate::testing::{unpaced_dispatcher, Scripted, ScriptedProvider};

    const TARGET: SanitizationTarget = SanitizationTarget::FinalReport;

    #[tokio::test(start_paused = true)]
    async fn test_safe_text_is_unchanged_and_cached() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.route(
            prompts::SANITIZER_SYSTEM_PROMPT,
            [Scripted::reply(r#"{"is_safe": true, "sanitized_text": "ignored", "details": "clean"}"#, 20)],
        );
        let dispatcher = unpaced_dispatcher(provider.clone());
        let sanitizer = OutputSanitizer::default();

        let first = sanitizer.sanitize(&dispatcher, "e", TARGET, "Empresa con buena reputación").await;
        assert!(first.is_safe);
        assert!(!first.applied);
        assert_eq!(first.text, "Empresa con buena reputación");

        let second = sanitizer.sanitize(&dispatcher, "e", TARGET, &first.text).await;
        assert_eq!(second.text, first.text);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redaction_is_idempotent() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.route(
            prompts::SANITIZER_SYSTEM_PROMPT,
            [Scripted::reply(
                r#"{"is_safe": false, "sanitized_text": "Contacto: [REDACTADO]", "details": "email removed"}"#,
                20,
            )],
        );
        let dispatcher = unpaced_dispatcher(provider.clone());
        let sanitizer = OutputSanitizer::default();

        let once = sanitizer.sanitize(&dispatcher, "e", TARGET, "Contacto: ceo@example.com").await;
        assert!(once.applied);
        assert_eq!(once.text, "Contacto: [REDACTADO]");

        let twice = sanitizer.sanitize(&dispatcher, "e", TARGET, &once.text).await;
        assert_eq!(twice.text, once.text);
        assert!(!twice.applied);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_verdicts() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.route_always(prompts::SANITIZER_SYSTEM_PROMPT, Scripted::reply("looks fine", 5));
        let dispatcher = unpaced_dispatcher(provider);
        let sanitizer = OutputSanitizer::default();

        let financial = sanitizer
            .sanitize(&dispatcher, "e", TARGET, "La liquidez es adecuada")
            .await;
        assert_eq!(financial.text, "La liquidez es adecuada");

        let other = sanitizer.sanitize(&dispatcher, "e", TARGET, "Texto libre").await;
        assert_eq!(other.text, PRECAUTION_PLACEHOLDER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_failure_blocks() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.route(
            prompts::SANITIZER_SYSTEM_PROMPT,
            [Scripted::Fail(ProviderError::AuthError)],
        );
        let dispatcher = unpaced_dispatcher(provider);

        let outcome = OutputSanitizer::default()
            .sanitize(&dispatcher, "e", TARGET, "Solvencia alta")
            .await;
        assert_eq!(outcome.text, BLOCKED_PLACEHOLDER);
        assert!(!outcome.is_safe);
    }
}
