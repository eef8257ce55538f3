//! # credrisk-core
//!
//! Deterministic building blocks for SME credit-risk evaluation.
//!
//! This crate holds everything in the evaluation pipeline that does not need
//! a model or any I/O:
//! - The request, record and result types and the phase state machine
//! - Branch report schemas with tolerant JSON extraction and lexical fallbacks
//! - The baseline scoring function and risk-level mapping
//! - The security gating policy
//! - The audit event model
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same branch outcomes always produce the same baseline
//! 2. **No LLM calls**: model access lives in `credrisk-runtime`
//! 3. **Bounded**: every score is clamped to `[0, 1000]`
//! 4. **Ordered**: phases can only advance in sequence, or fail
//!
//! ## Example
//!
//! ```rust
//! use credrisk_core::{baseline_score, BaselineInputs, ScoringPolicy};
//!
//! let baseline = baseline_score(&BaselineInputs::default());
//! let policy = ScoringPolicy::default();
//! assert_eq!(policy.label(policy.risk_level(baseline.score)), "MEDIO");
//! ```

pub mod analysis;
pub mod audit;
pub mod extract;
pub mod gate;
pub mod patterns;
pub mod scoring;
pub mod types;

// Re-export main types at crate root
pub use analysis::{
    BehavioralAnalysis, BranchKind, BranchOutcome, BranchReport, Extraction, FinancialAnalysis,
    ReputationalAnalysis,
};
pub use audit::{AuditEvent, AuditEventType};
pub use extract::ExtractError;
pub use gate::{
    AssessmentSource, FieldVerdict, GateDecision, GatePolicy, InputField, RecommendedAction,
    RiskBands, SupervisionReport, ValidationRisk, ValidationSummary,
};
pub use scoring::{
    baseline_score, Baseline, BaselineInputs, ConsolidatedReport, RiskLabels, RiskLevel,
    ScenarioOutcome, ScenarioPayload, ScoreRefinement, ScoreSource, ScoringPolicy, Signal,
};
pub use types::{
    EvaluationRecord, EvaluationRequest, EvaluationResult, FailureReason, Phase,
    SanitizationNote, SanitizationTarget,
};

use thiserror::Error;

/// Errors raised by the deterministic core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
}
