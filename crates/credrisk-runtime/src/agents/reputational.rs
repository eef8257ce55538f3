use credrisk_core::{EvaluationRequest, ReputationalAnalysis};

use super::BranchAgent;
use crate::prompts;

/// Reads social-media text on the fast tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReputationalAgent;

impl BranchAgent for ReputationalAgent {
    type Report = ReputationalAnalysis;

    fn input(&self, request: &EvaluationRequest) -> String {
        request.social_media_text.clone()
    }

    fn system_prompt(&self) -> &'static str {
        prompts::REPUTATIONAL_SYSTEM_PROMPT
    }

    fn user_prompt(&self, request: &EvaluationRequest, input: &str) -> String {
        prompts::reputational_prompt(&request.company_name, input)
    }
}
