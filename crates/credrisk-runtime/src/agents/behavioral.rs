use credrisk_core::{BehavioralAnalysis, EvaluationRequest};

use super::BranchAgent;
use crate::prompts;

/// Reads commercial references and payment history on the fast tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct BehavioralAgent;

impl BranchAgent for BehavioralAgent {
    type Report = BehavioralAnalysis;

    fn input(&self, request: &EvaluationRequest) -> String {
        request.behavioral_input()
    }

    fn system_prompt(&self) -> &'static str {
        prompts::BEHAVIORAL_SYSTEM_PROMPT
    }

    fn user_prompt(&self, request: &EvaluationRequest, input: &str) -> String {
        prompts::behavioral_prompt(&request.company_name, input)
    }
}
