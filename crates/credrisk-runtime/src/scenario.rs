//! What-if scenario simulation.
//!
//! Re-scores a finished consolidated report under a hypothetical scenario
//! with one capable-tier call. The new score is clamped and its risk level
//! recomputed locally; unusable model output keeps the base score.

use credrisk_core::{extract, ConsolidatedReport, ScenarioOutcome, ScenarioPayload, ScoreSource, ScoringPolicy};

use crate::dispatcher::{ModelDispatcher, ModelRequest, ModelTier};
use crate::prompts;

pub const SCENARIO_AGENT_ID: &str = "scenario_simulator";

#[derive(Debug, Clone, Default)]
pub struct ScenarioSimulator {
    policy: ScoringPolicy,
}

impl ScenarioSimulator {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    /// Simulate `scenario` against `base`. Returns the outcome and the
    /// tokens spent.
    pub async fn simulate(
        &self,
        dispatcher: &ModelDispatcher,
        evaluation_id: &str,
        company_name: &str,
        base: &ConsolidatedReport,
        scenario: &str,
    ) -> (ScenarioOutcome, u32) {
        let report = serde_json::to_string_pretty(base).unwrap_or_else(|_| base.justification.clone());
        let call = ModelRequest::new(evaluation_id, SCENARIO_AGENT_ID, ModelTier::Capable)
            .system(prompts::SCENARIO_SYSTEM_PROMPT)
            .prompt(prompts::scenario_prompt(company_name, &report, base.final_score, scenario))
            .max_tokens(1200)
            .temperature(0.0);

        match dispatcher.invoke(call).await {
            Ok(response) => {
                let outcome = match extract::decode::<ScenarioPayload>(&response.text) {
                    Ok(payload) => payload.into_outcome(scenario, base, &self.policy),
                    Err(e) => {
                        tracing::warn!(evaluation_id, error = %e, "Scenario output unparseable, keeping base score");
                        ScenarioOutcome::unchanged(
                            scenario,
                            base,
                            ScoreSource::BaselineParseFallback,
                            Some(e.to_string()),
                        )
                    }
                };
                (outcome, response.tokens_used)
            }
            Err(e) => {
                tracing::error!(evaluation_id, error = %e, "Scenario call failed, keeping base score");
                let outcome = ScenarioOutcome::unchanged(
                    scenario,
                    base,
                    ScoreSource::BaselineDispatchFallback,
                    Some(e.to_string()),
                );
                (outcome, 0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use credrisk_core::{Baseline, RiskLevel};

    use crate::providers::ProviderError;
    use crate::testing::{unpaced_dispatcher, Scripted, ScriptedProvider};

    fn base_report() -> ConsolidatedReport {
        ConsolidatedReport::from_baseline(
            &Baseline { score: 560, signals: vec![] },
            &ScoringPolicy::default(),
            ScoreSource::BaselineParseFallback,
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_score_is_clamped_and_relabelled() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.route(
            prompts::SCENARIO_SYSTEM_PROMPT,
            [Scripted::reply(
                r#"```json
{"new_score": 812, "new_recommendation": "approve", "analysis": "less debt"}
```"#,
                90,
            )],
        );
        let dispatcher = unpaced_dispatcher(provider.clone());

        let (outcome, tokens) = ScenarioSimulator::default()
            .simulate(&dispatcher, "eval_1", "Acme", &base_report(), "reduce debt by 10k")
            .await;

        assert_eq!(outcome.base_score, 560);
        assert_eq!(outcome.new_score, 812);
        assert_eq!(outcome.score_change, 252);
        assert_eq!(outcome.risk_level, RiskLevel::Low);
        assert_eq!(outcome.risk_label, "BAJO");
        assert_eq!(outcome.new_recommendation, "approve");
        assert_eq!(outcome.source, ScoreSource::Model);
        assert_eq!(outcome.scenario, "reduce debt by 10k");
        assert_eq!(tokens, 90);
        assert_eq!(provider.models(), vec!["gpt-4o".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_output_keeps_base_score() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.route(
            prompts::SCENARIO_SYSTEM_PROMPT,
            [
                Scripted::reply("the score would rise a little", 40),
                Scripted::Fail(ProviderError::AuthError),
            ],
        );
        let dispatcher = unpaced_dispatcher(provider);
        let simulator = ScenarioSimulator::default();
        let base = base_report();

        let (parsed, tokens) = simulator.simulate(&dispatcher, "e", "Acme", &base, "hire staff").await;
        assert_eq!(parsed.new_score, 560);
        assert_eq!(parsed.score_change, 0);
        assert_eq!(parsed.risk_level, RiskLevel::Medium);
        assert_eq!(parsed.source, ScoreSource::BaselineParseFallback);
        assert!(parsed.error.is_some());
        assert_eq!(tokens, 40);

        let (failed, tokens) = simulator.simulate(&dispatcher, "e", "Acme", &base, "hire staff").await;
        assert_eq!(failed.new_score, 560);
        assert_eq!(failed.source, ScoreSource::BaselineDispatchFallback);
        assert_eq!(tokens, 0);
    }
}
