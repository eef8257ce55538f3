//! Audit-history supervision.

use credrisk_core::{extract, gate::SupervisionPayload, SupervisionReport};

use crate::audit_log::AuditLog;
use crate::dispatcher::{ModelDispatcher, ModelRequest, ModelTier};
use crate::prompts;

pub const SUPERVISOR_AGENT_ID: &str = "security_supervisor";

/// Reviews recent audit events for anomalies on the capable tier.
#[derive(Debug, Clone)]
pub struct SecuritySupervisor {
    history_window: usize,
}

impl SecuritySupervisor {
    pub fn new(history_window: usize) -> Self {
        Self { history_window }
    }

    /// Assess recent history. Returns the report and the tokens spent.
    ///
    /// With no history there is nothing to analyse and no call is made.
    pub async fn supervise(
        &self,
        dispatcher: &ModelDispatcher,
        audit: &AuditLog,
        evaluation_id: &str,
    ) -> (SupervisionReport, u32) {
        let history = audit.recent(self.history_window);
        if history.is_empty() {
            return (SupervisionReport::empty_history(), 0);
        }

        let call = ModelRequest::new(evaluation_id, SUPERVISOR_AGENT_ID, ModelTier::Capable)
            .system(prompts::SUPERVISOR_SYSTEM_PROMPT)
            .prompt(prompts::supervisor_prompt(&history))
            .max_tokens(500)
            .temperature(0.0);

        match dispatcher.invoke(call).await {
            Ok(response) => {
                let report = match extract::decode::<SupervisionPayload>(&response.text) {
                    Ok(payload) => payload.into(),
                    Err(e) => {
                        tracing::warn!(evaluation_id, error = %e, "Supervision output unparseable");
                        SupervisionReport::unparseable()
                    }
                };
                (report, response.tokens_used)
            }
            Err(e) => {
                tracing::error!(evaluation_id, error = %e, "Supervision call failed");
                (SupervisionReport::call_failed(&e.to_string()), 0)
            }
        }
    }
}

impl Default for SecuritySupervisor {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use credrisk_core::{AssessmentSource, AuditEvent, AuditEventType, RecommendedAction};

    use crate::providers::ProviderError;
    use crate::testing::{unpaced_dispatcher, Scripted, ScriptedProvider};

    fn seeded_log() -> AuditLog {
        let log = AuditLog::in_memory();
        log.append(AuditEvent::new("old", AuditEventType::EvaluationCompleted, "orchestrator", true));
        log
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_history_skips_call() {
        let provider = Arc::new(ScriptedProvider::new());
        let dispatcher = unpaced_dispatcher(provider.clone());

        let (report, tokens) = SecuritySupervisor::default()
            .supervise(&dispatcher, &AuditLog::in_memory(), "eval_1")
            .await;

        assert!(!report.anomaly_detected);
        assert_eq!(report.source, AssessmentSource::Skipped);
        assert_eq!(tokens, 0);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_report() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.route(
            prompts::SUPERVISOR_SYSTEM_PROMPT,
            [Scripted::reply(
                r#"{"anomaly_detected": true, "confidence_score": 0.95, "summary": "burst of alerts", "recommended_action": "Alerta de Seguridad Crítica"}"#,
                60,
            )],
        );
        let dispatcher = unpaced_dispatcher(provider);

        let (report, tokens) = SecuritySupervisor::default()
            .supervise(&dispatcher, &seeded_log(), "eval_1")
            .await;

        assert!(report.critical_alert);
        assert_eq!(report.recommended_action, RecommendedAction::CriticalAlert);
        assert_eq!(tokens, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_and_failed_calls() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.route(
            prompts::SUPERVISOR_SYSTEM_PROMPT,
            [
                Scripted::reply("all looks fine to me", 5),
                Scripted::Fail(ProviderError::AuthError),
            ],
        );
        let dispatcher = unpaced_dispatcher(provider);
        let supervisor = SecuritySupervisor::default();
        let log = seeded_log();

        let (unparsed, _) = supervisor.supervise(&dispatcher, &log, "eval_1").await;
        assert_eq!(unparsed.confidence, 0.5);
        assert!(!unparsed.critical_alert);

        let (failed, _) = supervisor.supervise(&dispatcher, &log, "eval_1").await;
        assert_eq!(failed.confidence, 0.8);
        assert!(failed.critical_alert);
    }
}
