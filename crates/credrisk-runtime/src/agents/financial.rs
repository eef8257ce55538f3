use credrisk_core::{EvaluationRequest, FinancialAnalysis};

use super::BranchAgent;
use crate::dispatcher::ModelTier;
use crate::prompts;

/// Reads the financial statements on the capable tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinancialAgent;

impl BranchAgent for FinancialAgent {
    type Report = FinancialAnalysis;

    fn input(&self, request: &EvaluationRequest) -> String {
        request.financial_statements.clone()
    }

    fn system_prompt(&self) -> &'static str {
        prompts::FINANCIAL_SYSTEM_PROMPT
    }

    fn user_prompt(&self, request: &EvaluationRequest, input: &str) -> String {
        prompts::financial_prompt(&request.company_name, input)
    }

    fn tier(&self) -> ModelTier {
        ModelTier::Capable
    }

    fn token_budget(&self) -> u32 {
        800
    }

    fn temperature(&self) -> f32 {
        0.1
    }
}
