//! Branch agent trait.

use async_trait::async_trait;
use credrisk_core::{extract, BranchOutcome, BranchReport, EvaluationRequest, Extraction};

use crate::dispatcher::{ModelDispatcher, ModelRequest, ModelTier};

/// One business-analysis branch.
///
/// # Isolation Contract
/// - A branch sees only its own slice of the request
/// - A branch never fails the pipeline: every path ends in a [`BranchOutcome`]
/// - Sibling branches are never cancelled by this one
#[async_trait]
pub trait BranchAgent: Send + Sync {
    type Report: BranchReport;

    /// The branch's input text. Empty input short-circuits to a no-data failure.
    fn input(&self, request: &EvaluationRequest) -> String;

    fn system_prompt(&self) -> &'static str;

    fn user_prompt(&self, request: &EvaluationRequest, input: &str) -> String;

    fn tier(&self) -> ModelTier {
        ModelTier::Fast
    }

    fn token_budget(&self) -> u32 {
        600
    }

    fn temperature(&self) -> f32 {
        0.0
    }

    /// Run the branch: one dispatcher call, then a tolerant parse.
    async fn analyze(
        &self,
        dispatcher: &ModelDispatcher,
        evaluation_id: &str,
        request: &EvaluationRequest,
    ) -> BranchOutcome<Self::Report> {
        let kind = <Self::Report as BranchReport>::KIND;
        let input = self.input(request);
        if input.trim().is_empty() {
            tracing::warn!(evaluation_id, branch = %kind, "No input for branch");
            return BranchOutcome::no_data();
        }

        let call = ModelRequest::new(evaluation_id, kind.agent_id(), self.tier())
            .system(self.system_prompt())
            .prompt(self.user_prompt(request, &input))
            .max_tokens(self.token_budget())
            .temperature(self.temperature());

        let response = match dispatcher.invoke(call).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(evaluation_id, branch = %kind, error = %e, "Branch model call failed");
                return BranchOutcome::failure(e.to_string());
            }
        };

        match extract::decode::<Self::Report>(&response.text) {
            Ok(report) => BranchOutcome::Success {
                report,
                tokens_used: response.tokens_used,
                extraction: Extraction::Structured,
            },
            Err(parse_error) => match Self::Report::from_unstructured(&response.text) {
                Some(report) => {
                    tracing::warn!(
                        evaluation_id,
                        branch = %kind,
                        error = %parse_error,
                        "Branch output not structured, using lexical fallback"
                    );
                    BranchOutcome::Success {
                        report,
                        tokens_used: response.tokens_used,
                        extraction: Extraction::Heuristic,
                    }
                }
                None => {
                    tracing::warn!(
                        evaluation_id,
                        branch = %kind,
                        error = %parse_error,
                        "Branch output unusable"
                    );
                    BranchOutcome::failure(format!("unparseable model output: {parse_error}"))
                }
            },
        }
    }
}
