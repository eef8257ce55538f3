//! Score consolidation.
//!
//! The deterministic baseline is always computed first. The capable-tier
//! model may refine it; when the model output is unusable the baseline is
//! returned with a reduced confidence, so a final score always exists.

use credrisk_core::{
    baseline_score, extract, BaselineInputs, BranchOutcome, BranchReport, ConsolidatedReport,
    ScoreRefinement, ScoreSource, ScoringPolicy,
};

use crate::dispatcher::{ModelDispatcher, ModelRequest, ModelTier};
use crate::prompts;

pub const CONSOLIDATION_AGENT_ID: &str = "scoring_agent";

#[derive(Debug, Clone, Default)]
pub struct ScoringConsolidator {
    policy: ScoringPolicy,
}

impl ScoringConsolidator {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Consolidate branch outcomes into one report. Returns the report and
    /// the tokens spent.
    pub async fn consolidate(
        &self,
        dispatcher: &ModelDispatcher,
        evaluation_id: &str,
        company_name: &str,
        inputs: BaselineInputs<'_>,
    ) -> (ConsolidatedReport, u32) {
        let baseline = baseline_score(&inputs);
        tracing::debug!(
            evaluation_id,
            baseline = baseline.score,
            signals = ?baseline.signals,
            "Computed baseline score"
        );

        let call = ModelRequest::new(evaluation_id, CONSOLIDATION_AGENT_ID, ModelTier::Capable)
            .system(prompts::CONSOLIDATION_SYSTEM_PROMPT)
            .prompt(prompts::consolidation_prompt(
                company_name,
                &describe(inputs.financial),
                &describe(inputs.reputational),
                &describe(inputs.behavioral),
                baseline.score,
            ))
            .max_tokens(1500)
            .temperature(0.1);

        match dispatcher.invoke(call).await {
            Ok(response) => {
                let report = match extract::decode::<ScoreRefinement>(&response.text) {
                    Ok(refinement) => refinement.into_report(&baseline, &self.policy),
                    Err(e) => {
                        tracing::warn!(evaluation_id, error = %e, "Consolidation output unparseable, using baseline");
                        ConsolidatedReport::from_baseline(
                            &baseline,
                            &self.policy,
                            ScoreSource::BaselineParseFallback,
                            None,
                        )
                    }
                };
                (report, response.tokens_used)
            }
            Err(e) => {
                tracing::error!(evaluation_id, error = %e, "Consolidation call failed, using baseline");
                let report = ConsolidatedReport::from_baseline(
                    &baseline,
                    &self.policy,
                    ScoreSource::BaselineDispatchFallback,
                    Some(e.to_string()),
                );
                (report, 0)
            }
        }
    }
}

/// Render a branch outcome for the consolidation prompt.
fn describe<T: BranchReport>(outcome: Option<&BranchOutcome<T>>) -> String {
    match outcome {
        None => "Sin datos".to_string(),
        Some(outcome) => {
            let report = serde_json::to_string_pretty(outcome.report())
                .unwrap_or_else(|_| outcome.report().summary().to_string());
            match outcome.error() {
                Some(error) => format!("(analysis failed: {error})\n{report}"),
                None => report,
            }
        }
    }
}
