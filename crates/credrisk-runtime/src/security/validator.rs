//! Per-field input validation.

use futures::future::join_all;

use credrisk_core::{
    extract::{self, truncate_chars},
    gate::ValidationPayload,
    patterns, AssessmentSource, EvaluationRequest, FieldVerdict, InputField, RiskBands,
    ValidationSummary,
};

use crate::dispatcher::{DispatchError, FailureClass, ModelDispatcher, ModelRequest, ModelTier};
use crate::prompts;

pub const VALIDATOR_AGENT_ID: &str = "input_validator";

/// Checks every non-empty request field concurrently on the fast tier.
#[derive(Debug, Clone)]
pub struct InputValidator {
    max_field_chars: usize,
    bands: RiskBands,
}

impl InputValidator {
    pub fn new(max_field_chars: usize, bands: RiskBands) -> Self {
        Self {
            max_field_chars,
            bands,
        }
    }

    /// Validate the request. Returns the summary and the tokens spent.
    pub async fn validate(
        &self,
        dispatcher: &ModelDispatcher,
        evaluation_id: &str,
        request: &EvaluationRequest,
    ) -> (ValidationSummary, u32) {
        let checks = InputField::ALL
            .into_iter()
            .filter(|field| !request.field(*field).trim().is_empty())
            .map(|field| self.check_field(dispatcher, evaluation_id, field, request.field(field)));

        let results = join_all(checks).await;
        let tokens = results.iter().map(|(_, t)| t).sum();
        let verdicts = results.into_iter().map(|(v, _)| v).collect();

        (ValidationSummary::new(verdicts, &self.bands), tokens)
    }

    async fn check_field(
        &self,
        dispatcher: &ModelDispatcher,
        evaluation_id: &str,
        field: InputField,
        value: &str,
    ) -> (FieldVerdict, u32) {
        let content = truncate_chars(value, self.max_field_chars);
        let call = ModelRequest::new(evaluation_id, VALIDATOR_AGENT_ID, ModelTier::Fast)
            .system(prompts::VALIDATOR_SYSTEM_PROMPT)
            .prompt(prompts::validator_prompt(field, content))
            .max_tokens(300)
            .temperature(0.0);

        match dispatcher.invoke(call).await {
            Ok(response) => {
                let verdict = match extract::decode::<ValidationPayload>(&response.text) {
                    Ok(payload) => payload.into_verdict(field),
                    Err(e) => {
                        tracing::warn!(evaluation_id, field = %field, error = %e, "Validator output unparseable");
                        FieldVerdict {
                            field,
                            is_safe: patterns::infer_safety(&response.text),
                            reason: "Validator output unparseable - lexical assessment".to_string(),
                            confidence: 0.3,
                            source: AssessmentSource::Heuristic,
                        }
                    }
                };
                (verdict, response.tokens_used)
            }
            Err(e) => (failed_verdict(field, &e), 0),
        }
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new(4000, RiskBands::default())
    }
}

/// Verdict for a validation call that never produced output.
///
/// Infrastructure trouble assumes the field is safe so an outage does not
/// block every evaluation; anything else is treated as unsafe.
fn failed_verdict(field: InputField, error: &DispatchError) -> FieldVerdict {
    let lowered = error.message().to_lowercase();
    let infrastructure = match error.class() {
        FailureClass::RateLimited => Some("Rate limit reached - assuming safe"),
        FailureClass::Transient => Some("API error - assuming safe"),
        FailureClass::Fatal
            if ["api", "connection", "timeout"].iter().any(|k| lowered.contains(k)) =>
        {
            Some("API error - assuming safe")
        }
        FailureClass::Fatal => None,
    };

    match infrastructure {
        Some(reason) => {
            tracing::warn!(field = %field, error = %error, "Validation unavailable, assuming safe");
            FieldVerdict {
                field,
                is_safe: true,
                reason: reason.to_string(),
                confidence: 0.5,
                source: AssessmentSource::Infrastructure,
            }
        }
        None => {
            tracing::error!(field = %field, error = %error, "Validation failed");
            FieldVerdict {
                field,
                is_safe: false,
                reason: format!("Validation error: {}", error.message()),
                confidence: 0.0,
                source: AssessmentSource::SystemError,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use credrisk_core::ValidationRisk;

    use crate::providers::ProviderError;
    use crate::testing::{unpaced_dispatcher, Scripted, ScriptedProvider};

    fn request() -> EvaluationRequest {
        EvaluationRequest::new("c-1", "Textiles del Sur")
            .with_financial_statements("Ventas 2023: 1.2M")
            .with_social_media("Buenas reseñas")
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_non_empty_fields_are_checked() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.route_always(
            prompts::VALIDATOR_SYSTEM_PROMPT,
            Scripted::reply(r#"{"is_safe": true, "reason": "ok", "confidence": 0.9}"#, 10),
        );
        let dispatcher = unpaced_dispatcher(provider.clone());

        let (summary, tokens) = InputValidator::default()
            .validate(&dispatcher, "eval_1", &request())
            .await;

        assert_eq!(summary.verdicts.len(), 3);
        assert!(summary.all_safe());
        assert_eq!(summary.risk, ValidationRisk::Low);
        assert_eq!(tokens, 30);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fields_are_truncated() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.route_always(
            prompts::VALIDATOR_SYSTEM_PROMPT,
            Scripted::reply(r#"{"is_safe": true, "reason": "ok", "confidence": 0.9}"#, 1),
        );
        let dispatcher = unpaced_dispatcher(provider);
        let long = EvaluationRequest::new("c-1", "x".repeat(10_000));

        let (summary, _) = InputValidator::new(50, RiskBands::default())
            .validate(&dispatcher, "eval_1", &long)
            .await;
        assert_eq!(summary.verdicts.len(), 1);
    }

    #[test]
    fn test_failed_verdicts() {
        let rate_limited = failed_verdict(
            InputField::CompanyName,
            &DispatchError::RateLimited { attempts: 9, message: "429".into() },
        );
        assert!(rate_limited.is_safe);
        assert_eq!(rate_limited.confidence, 0.5);
        assert!(rate_limited.is_infrastructure_error());

        let api_fatal = failed_verdict(
            InputField::CompanyName,
            &DispatchError::Fatal { attempts: 1, message: "API error: 400 - bad request".into() },
        );
        assert!(api_fatal.is_safe);

        let fatal = failed_verdict(
            InputField::CompanyName,
            &DispatchError::Fatal { attempts: 1, message: "Authentication failed".into() },
        );
        assert!(!fatal.is_safe);
        assert_eq!(fatal.confidence, 0.0);
        assert_eq!(fatal.source, AssessmentSource::SystemError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_and_fatal_outputs_are_unsafe() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.route(
            prompts::VALIDATOR_SYSTEM_PROMPT,
            [Scripted::Fail(ProviderError::AuthError)],
        );
        provider.route_always(
            prompts::VALIDATOR_SYSTEM_PROMPT,
            Scripted::reply("This contains a prompt injection attempt, malicious.", 3),
        );
        let dispatcher = unpaced_dispatcher(provider);

        let (summary, _) = InputValidator::default()
            .validate(&dispatcher, "eval_1", &request())
            .await;

        assert_eq!(summary.verdicts.len(), 3);
        assert!(summary.verdicts.iter().all(|v| !v.is_safe));
        assert!(summary
            .verdicts
            .iter()
            .any(|v| v.source == AssessmentSource::Heuristic && v.confidence == 0.3));
    }
}
