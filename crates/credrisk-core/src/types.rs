//! Evaluation request, record and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::analysis::{
    BehavioralAnalysis, BranchKind, BranchOutcome, FinancialAnalysis, ReputationalAnalysis,
};
use crate::gate::{GateDecision, InputField, SupervisionReport, ValidationSummary};
use crate::scoring::{baseline_score, BaselineInputs, ConsolidatedReport, RiskLevel, ScoringPolicy};
use crate::CoreError;

/// Immutable input of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub company_id: String,
    pub company_name: String,
    #[serde(default)]
    pub financial_statements: String,
    #[serde(default, alias = "social_media_data")]
    pub social_media_text: String,
    #[serde(default)]
    pub commercial_references: String,
    #[serde(default)]
    pub payment_history: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, JsonValue>,
}

impl EvaluationRequest {
    pub fn new(company_id: impl Into<String>, company_name: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            company_name: company_name.into(),
            ..Default::default()
        }
    }

    pub fn with_financial_statements(mut self, text: impl Into<String>) -> Self {
        self.financial_statements = text.into();
        self
    }

    pub fn with_social_media(mut self, text: impl Into<String>) -> Self {
        self.social_media_text = text.into();
        self
    }

    pub fn with_commercial_references(mut self, text: impl Into<String>) -> Self {
        self.commercial_references = text.into();
        self
    }

    pub fn with_payment_history(mut self, text: impl Into<String>) -> Self {
        self.payment_history = text.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Text of one validated input field.
    pub fn field(&self, field: InputField) -> &str {
        match field {
            InputField::CompanyName => &self.company_name,
            InputField::FinancialStatements => &self.financial_statements,
            InputField::SocialMediaData => &self.social_media_text,
            InputField::CommercialReferences => &self.commercial_references,
            InputField::PaymentHistory => &self.payment_history,
        }
    }

    /// Input of the behavioral branch: references and payment history.
    pub fn behavioral_input(&self) -> String {
        let references = self.commercial_references.trim();
        let payments = self.payment_history.trim();
        match (references.is_empty(), payments.is_empty()) {
            (true, true) => String::new(),
            (false, true) => references.to_string(),
            (true, false) => payments.to_string(),
            (false, false) => format!("{references}\n{payments}"),
        }
    }

    /// Reject requests that cannot identify the company.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.company_id.trim().is_empty() {
            return Err(CoreError::InvalidRequest("company_id is empty".to_string()));
        }
        if self.company_name.trim().is_empty() {
            return Err(CoreError::InvalidRequest("company_name is empty".to_string()));
        }
        Ok(())
    }
}

/// Stage of the evaluation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Pending,
    SecurityValidation,
    BusinessAnalysis,
    ScoringConsolidation,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Phases advance strictly in order; `Failed` is reachable from any
    /// non-terminal phase.
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Pending, SecurityValidation)
                | (SecurityValidation, BusinessAnalysis)
                | (BusinessAnalysis, ScoringConsolidation)
                | (ScoringConsolidation, Completed)
        ) || (!self.is_terminal() && next == Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::SecurityValidation => "SECURITY_VALIDATION",
            Self::BusinessAnalysis => "BUSINESS_ANALYSIS",
            Self::ScoringConsolidation => "SCORING_CONSOLIDATION",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an evaluation ended in `FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    SecurityBlocked,
    ValidationFailed,
    Timeout,
    InvalidRequest,
    Internal,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecurityBlocked => "SECURITY_BLOCKED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a sanitization pass was applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizationTarget {
    Financial,
    Reputational,
    Behavioral,
    FinalReport,
}

impl From<BranchKind> for SanitizationTarget {
    fn from(kind: BranchKind) -> Self {
        match kind {
            BranchKind::Financial => Self::Financial,
            BranchKind::Reputational => Self::Reputational,
            BranchKind::Behavioral => Self::Behavioral,
        }
    }
}

/// Outcome of one sanitization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizationNote {
    pub target: SanitizationTarget,
    pub is_safe: bool,
    /// True whenever the content was altered.
    pub sanitization_applied: bool,
    pub details: String,
}

/// Mutable state of one evaluation, owned by the pipeline task running it.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRecord {
    pub evaluation_id: String,
    pub request: EvaluationRequest,
    phase: Phase,
    pub started_at: DateTime<Utc>,
    pub supervision: Option<SupervisionReport>,
    pub validation: Option<ValidationSummary>,
    pub gate: Option<GateDecision>,
    pub financial: Option<BranchOutcome<FinancialAnalysis>>,
    pub reputational: Option<BranchOutcome<ReputationalAnalysis>>,
    pub behavioral: Option<BranchOutcome<BehavioralAnalysis>>,
    pub sanitized_financial: Option<BranchOutcome<FinancialAnalysis>>,
    pub sanitized_reputational: Option<BranchOutcome<ReputationalAnalysis>>,
    pub sanitized_behavioral: Option<BranchOutcome<BehavioralAnalysis>>,
    pub sanitization: Vec<SanitizationNote>,
    /// Report as produced by consolidation.
    pub consolidated: Option<ConsolidatedReport>,
    /// Report after the final sanitization pass.
    pub final_report: Option<ConsolidatedReport>,
    pub failure: Option<FailureReason>,
    pub errors: Vec<String>,
    tokens_used: u64,
}

impl EvaluationRecord {
    pub fn new(evaluation_id: impl Into<String>, request: EvaluationRequest) -> Self {
        Self {
            evaluation_id: evaluation_id.into(),
            request,
            phase: Phase::Pending,
            started_at: Utc::now(),
            supervision: None,
            validation: None,
            gate: None,
            financial: None,
            reputational: None,
            behavioral: None,
            sanitized_financial: None,
            sanitized_reputational: None,
            sanitized_behavioral: None,
            sanitization: Vec::new(),
            consolidated: None,
            final_report: None,
            failure: None,
            errors: Vec::new(),
            tokens_used: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    /// Add to the token counter. The counter never decreases.
    pub fn add_tokens(&mut self, tokens: u64) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Move to the next phase, rejecting out-of-order transitions.
    pub fn advance(&mut self, next: Phase) -> Result<(), CoreError> {
        if !self.phase.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Move to `FAILED` with a reason and human-readable detail.
    pub fn fail(&mut self, reason: FailureReason, detail: impl Into<String>) -> Result<(), CoreError> {
        self.advance(Phase::Failed)?;
        self.failure = Some(reason);
        self.errors.push(format!("{reason}: {}", detail.into()));
        Ok(())
    }

    /// Freeze the record into the caller-facing result.
    ///
    /// A completed record without a consolidated report falls back to the
    /// deterministic baseline, so the score is always set.
    pub fn into_result(self, policy: &ScoringPolicy, processing_time: Duration) -> EvaluationResult {
        let report = self.final_report.clone().or_else(|| self.consolidated.clone());

        let final_score = match (self.phase, &report) {
            (Phase::Failed, _) => 0,
            (_, Some(report)) => report.final_score,
            (_, None) => {
                baseline_score(&BaselineInputs {
                    financial: self.sanitized_financial.as_ref().or(self.financial.as_ref()),
                    reputational: self
                        .sanitized_reputational
                        .as_ref()
                        .or(self.reputational.as_ref()),
                    behavioral: self.sanitized_behavioral.as_ref().or(self.behavioral.as_ref()),
                })
                .score
            }
        };
        let risk_level = policy.risk_level(final_score);

        EvaluationResult {
            success: self.phase == Phase::Completed && self.errors.is_empty(),
            phase: self.phase,
            failure_reason: self.failure,
            final_score,
            risk_level,
            risk_label: policy.label(risk_level).to_string(),
            financial_analysis: self.sanitized_financial.or(self.financial),
            reputational_analysis: self.sanitized_reputational.or(self.reputational),
            behavioral_analysis: self.sanitized_behavioral.or(self.behavioral),
            consolidated_report: report,
            supervision: self.supervision,
            validation: self.validation,
            sanitization: self.sanitization,
            processing_time_ms: processing_time.as_millis() as u64,
            tokens_used: self.tokens_used,
            errors: self.errors,
            evaluation_id: self.evaluation_id,
            company_id: self.request.company_id,
            company_name: self.request.company_name,
            started_at: self.started_at,
            completed_at: Utc::now(),
        }
    }
}

/// Immutable snapshot handed to the caller once an evaluation terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub evaluation_id: String,
    pub company_id: String,
    pub company_name: String,
    /// True only for a completed evaluation with no recorded errors.
    pub success: bool,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    pub final_score: u16,
    pub risk_level: RiskLevel,
    pub risk_label: String,
    pub financial_analysis: Option<BranchOutcome<FinancialAnalysis>>,
    pub reputational_analysis: Option<BranchOutcome<ReputationalAnalysis>>,
    pub behavioral_analysis: Option<BranchOutcome<BehavioralAnalysis>>,
    pub consolidated_report: Option<ConsolidatedReport>,
    pub supervision: Option<SupervisionReport>,
    pub validation: Option<ValidationSummary>,
    pub sanitization: Vec<SanitizationNote>,
    pub processing_time_ms: u64,
    pub tokens_used: u64,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        use Phase::*;
        assert!(Pending.can_transition_to(SecurityValidation));
        assert!(SecurityValidation.can_transition_to(BusinessAnalysis));
        assert!(BusinessAnalysis.can_transition_to(ScoringConsolidation));
        assert!(ScoringConsolidation.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(BusinessAnalysis));
        assert!(!BusinessAnalysis.can_transition_to(SecurityValidation));
        for phase in [Pending, SecurityValidation, BusinessAnalysis, ScoringConsolidation] {
            assert!(phase.can_transition_to(Failed));
        }
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_record_rejects_skipped_phase() {
        let mut record = EvaluationRecord::new("e1", EvaluationRequest::new("c1", "Acme"));
        let err = record.advance(Phase::ScoringConsolidation).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidTransition {
                from: Phase::Pending,
                to: Phase::ScoringConsolidation
            }
        );
        assert_eq!(record.phase(), Phase::Pending);
    }

    #[test]
    fn test_failed_record_result() {
        let mut record = EvaluationRecord::new("e1", EvaluationRequest::new("c1", "Acme"));
        record.advance(Phase::SecurityValidation).unwrap();
        record.add_tokens(30);
        record
            .fail(FailureReason::SecurityBlocked, "critical alert")
            .unwrap();

        let result = record.into_result(&ScoringPolicy::default(), Duration::from_millis(5));
        assert!(!result.success);
        assert_eq!(result.phase, Phase::Failed);
        assert_eq!(result.failure_reason, Some(FailureReason::SecurityBlocked));
        assert_eq!(result.final_score, 0);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert_eq!(result.tokens_used, 30);
        assert!(result.errors[0].starts_with("SECURITY_BLOCKED"));
    }

    #[test]
    fn test_completed_record_without_report_uses_baseline() {
        let mut record = EvaluationRecord::new("e1", EvaluationRequest::new("c1", "Acme"));
        for phase in [
            Phase::SecurityValidation,
            Phase::BusinessAnalysis,
            Phase::ScoringConsolidation,
            Phase::Completed,
        ] {
            record.advance(phase).unwrap();
        }
        let result = record.into_result(&ScoringPolicy::default(), Duration::ZERO);
        assert!(result.success);
        assert_eq!(result.final_score, 550);
        assert_eq!(result.risk_label, "MEDIO");
    }

    #[test]
    fn test_behavioral_input_joins_fields() {
        let request = EvaluationRequest::new("c1", "Acme")
            .with_commercial_references("Proveedor A")
            .with_payment_history("Paga puntual");
        assert_eq!(request.behavioral_input(), "Proveedor A\nPaga puntual");
        assert_eq!(EvaluationRequest::new("c1", "Acme").behavioral_input(), "");
    }

    #[test]
    fn test_request_validation_and_alias() {
        assert!(EvaluationRequest::new("", "Acme").validate().is_err());
        assert!(EvaluationRequest::new("c1", "  ").validate().is_err());

        let request: EvaluationRequest = serde_json::from_str(
            r#"{"company_id": "c1", "company_name": "Acme", "social_media_data": "likes"}"#,
        )
        .unwrap();
        assert_eq!(request.social_media_text, "likes");
        assert!(request.validate().is_ok());
    }
}
