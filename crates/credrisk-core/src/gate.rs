//! Security gating policy.
//!
//! The security gate runs two model-backed checks (audit-history supervision
//! and per-field input validation). This module holds their result types and
//! the pure policy that decides whether an evaluation may proceed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::lenient;

/// How an assessment was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentSource {
    /// Decoded from a structured model response.
    Model,
    /// Inferred lexically from an unparseable model response.
    Heuristic,
    /// The model call failed for infrastructure reasons (throttling, network).
    Infrastructure,
    /// The model call failed for any other reason.
    SystemError,
    /// No model call was needed.
    Skipped,
}

/// Action recommended by the security supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    None,
    ManualReview,
    CriticalAlert,
}

impl RecommendedAction {
    /// Parse the free-text action returned by the model.
    ///
    /// Unknown wording maps to manual review.
    pub fn parse(text: &str) -> Self {
        let lowered = text.trim().to_lowercase();
        if lowered.contains("crítica") || lowered.contains("critica") || lowered.contains("critical") {
            Self::CriticalAlert
        } else if lowered == "ninguna" || lowered == "none" || lowered.is_empty() {
            Self::None
        } else {
            Self::ManualReview
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "Ninguna",
            Self::ManualReview => "Revisión Manual Requerida",
            Self::CriticalAlert => "Alerta de Seguridad Crítica",
        }
    }
}

/// Result of audit-history supervision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisionReport {
    pub anomaly_detected: bool,
    pub confidence: f64,
    pub summary: String,
    pub recommended_action: RecommendedAction,
    pub critical_alert: bool,
    pub source: AssessmentSource,
}

impl SupervisionReport {
    /// Report used when there is no audit history to inspect.
    pub fn empty_history() -> Self {
        Self {
            anomaly_detected: false,
            confidence: 0.0,
            summary: "El historial de auditoría está vacío. No hay nada que analizar.".to_string(),
            recommended_action: RecommendedAction::None,
            critical_alert: false,
            source: AssessmentSource::Skipped,
        }
    }

    /// Report used when the supervisor response could not be decoded.
    pub fn unparseable() -> Self {
        Self {
            anomaly_detected: true,
            confidence: 0.5,
            summary: "Error parsing security supervision result - flagged for manual review"
                .to_string(),
            recommended_action: RecommendedAction::ManualReview,
            critical_alert: false,
            source: AssessmentSource::Heuristic,
        }
    }

    /// Report used when the supervision call failed.
    pub fn call_failed(error: &str) -> Self {
        Self {
            anomaly_detected: true,
            confidence: 0.8,
            summary: format!("Security supervision error: {error} - flagged for immediate review"),
            recommended_action: RecommendedAction::CriticalAlert,
            critical_alert: true,
            source: AssessmentSource::SystemError,
        }
    }
}

/// Payload the supervision model returns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SupervisionPayload {
    #[serde(alias = "anomalia_detectada")]
    pub anomaly_detected: bool,
    #[serde(alias = "confidence", alias = "confianza", deserialize_with = "lenient::optional_number")]
    pub confidence_score: Option<f64>,
    #[serde(alias = "resumen", deserialize_with = "lenient::string")]
    pub summary: String,
    #[serde(alias = "accion_recomendada", deserialize_with = "lenient::string")]
    pub recommended_action: String,
}

impl From<SupervisionPayload> for SupervisionReport {
    fn from(payload: SupervisionPayload) -> Self {
        let action = if payload.recommended_action.trim().is_empty() {
            RecommendedAction::ManualReview
        } else {
            RecommendedAction::parse(&payload.recommended_action)
        };
        Self {
            anomaly_detected: payload.anomaly_detected,
            confidence: payload.confidence_score.unwrap_or(0.0).clamp(0.0, 1.0),
            summary: if payload.summary.is_empty() {
                "Error parsing supervision result".to_string()
            } else {
                payload.summary
            },
            recommended_action: action,
            critical_alert: action == RecommendedAction::CriticalAlert,
            source: AssessmentSource::Model,
        }
    }
}

/// Input fields checked by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputField {
    CompanyName,
    FinancialStatements,
    SocialMediaData,
    CommercialReferences,
    PaymentHistory,
}

impl InputField {
    pub const ALL: [InputField; 5] = [
        Self::CompanyName,
        Self::FinancialStatements,
        Self::SocialMediaData,
        Self::CommercialReferences,
        Self::PaymentHistory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompanyName => "company_name",
            Self::FinancialStatements => "financial_statements",
            Self::SocialMediaData => "social_media_data",
            Self::CommercialReferences => "commercial_references",
            Self::PaymentHistory => "payment_history",
        }
    }
}

impl fmt::Display for InputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Safety verdict for one input field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldVerdict {
    pub field: InputField,
    pub is_safe: bool,
    pub reason: String,
    pub confidence: f64,
    pub source: AssessmentSource,
}

impl FieldVerdict {
    /// Whether the verdict stems from an infrastructure problem rather than
    /// the content itself.
    pub fn is_infrastructure_error(&self) -> bool {
        if self.source == AssessmentSource::Infrastructure {
            return true;
        }
        let reason = self.reason.to_lowercase();
        reason.contains("rate limit") || reason.contains("api error")
    }
}

/// Payload the validation model returns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ValidationPayload {
    #[serde(alias = "es_seguro")]
    pub is_safe: bool,
    #[serde(alias = "razon", deserialize_with = "lenient::string")]
    pub reason: String,
    #[serde(alias = "confianza", deserialize_with = "lenient::optional_number")]
    pub confidence: Option<f64>,
}

impl ValidationPayload {
    pub fn into_verdict(self, field: InputField) -> FieldVerdict {
        FieldVerdict {
            field,
            is_safe: self.is_safe,
            reason: if self.reason.is_empty() {
                "Error parsing validation result".to_string()
            } else {
                self.reason
            },
            confidence: self.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
            source: AssessmentSource::Model,
        }
    }
}

/// Risk band derived from the number of unsafe fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationRisk {
    Low,
    Medium,
    High,
    Critical,
}

/// Upper bounds (inclusive) on unsafe-field counts for each band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskBands {
    pub low_max: usize,
    pub medium_max: usize,
    pub high_max: usize,
}

impl Default for RiskBands {
    fn default() -> Self {
        Self {
            low_max: 0,
            medium_max: 2,
            high_max: 4,
        }
    }
}

impl RiskBands {
    pub fn classify(&self, unsafe_fields: usize) -> ValidationRisk {
        if unsafe_fields <= self.low_max {
            ValidationRisk::Low
        } else if unsafe_fields <= self.medium_max {
            ValidationRisk::Medium
        } else if unsafe_fields <= self.high_max {
            ValidationRisk::High
        } else {
            ValidationRisk::Critical
        }
    }
}

/// Aggregate of all field verdicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub verdicts: Vec<FieldVerdict>,
    pub unsafe_fields: Vec<InputField>,
    pub risk: ValidationRisk,
}

impl ValidationSummary {
    pub fn new(verdicts: Vec<FieldVerdict>, bands: &RiskBands) -> Self {
        let unsafe_fields: Vec<InputField> = verdicts
            .iter()
            .filter(|v| !v.is_safe)
            .map(|v| v.field)
            .collect();
        let risk = bands.classify(unsafe_fields.len());
        Self {
            verdicts,
            unsafe_fields,
            risk,
        }
    }

    pub fn all_safe(&self) -> bool {
        self.unsafe_fields.is_empty()
    }
}

/// Thresholds that decide whether a check halts the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    /// Supervision blocks only above this confidence.
    pub supervision_block_confidence: f64,
    /// A field verdict blocks only above this confidence.
    pub validation_block_confidence: f64,
    pub risk_bands: RiskBands,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            supervision_block_confidence: 0.9,
            validation_block_confidence: 0.8,
            risk_bands: RiskBands::default(),
        }
    }
}

/// Decision of the security gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Pass {
        /// Low-confidence or infrastructure flags that did not block.
        warnings: Vec<String>,
    },
    SecurityBlocked {
        reason: String,
    },
    ValidationFailed {
        reason: String,
        fields: Vec<InputField>,
    },
}

impl GateDecision {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }
}

impl GatePolicy {
    /// Whether the supervision report halts the pipeline.
    pub fn supervision_blocks(&self, report: &SupervisionReport) -> bool {
        report.critical_alert && report.confidence > self.supervision_block_confidence
    }

    /// Whether a single field verdict halts the pipeline.
    pub fn verdict_blocks(&self, verdict: &FieldVerdict) -> bool {
        !verdict.is_safe
            && verdict.confidence > self.validation_block_confidence
            && !verdict.is_infrastructure_error()
    }

    /// Gate on supervision alone.
    pub fn decide_supervision(&self, report: &SupervisionReport) -> Option<GateDecision> {
        self.supervision_blocks(report)
            .then(|| GateDecision::SecurityBlocked {
                reason: format!("Alerta de seguridad crítica: {}", report.summary),
            })
    }

    /// Gate on field validation.
    pub fn decide_validation(&self, summary: &ValidationSummary) -> GateDecision {
        let blocking: Vec<&FieldVerdict> = summary
            .verdicts
            .iter()
            .filter(|v| self.verdict_blocks(v))
            .collect();

        if !blocking.is_empty() {
            let reason = blocking
                .iter()
                .map(|v| format!("{}: {}", v.field, v.reason))
                .collect::<Vec<_>>()
                .join("; ");
            return GateDecision::ValidationFailed {
                reason: format!("Contenido malicioso detectado en: {reason}"),
                fields: blocking.iter().map(|v| v.field).collect(),
            };
        }

        let warnings = summary
            .verdicts
            .iter()
            .filter(|v| !v.is_safe)
            .map(|v| {
                format!(
                    "{} flagged with confidence {:.2}: {}",
                    v.field, v.confidence, v.reason
                )
            })
            .collect();
        GateDecision::Pass { warnings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::decode;

    fn verdict(is_safe: bool, confidence: f64, reason: &str, source: AssessmentSource) -> FieldVerdict {
        FieldVerdict {
            field: InputField::FinancialStatements,
            is_safe,
            reason: reason.to_string(),
            confidence,
            source,
        }
    }

    #[test]
    fn test_recommended_action_parse() {
        assert_eq!(RecommendedAction::parse("Ninguna"), RecommendedAction::None);
        assert_eq!(
            RecommendedAction::parse("Revisión Manual Requerida"),
            RecommendedAction::ManualReview
        );
        assert_eq!(
            RecommendedAction::parse("Alerta de Seguridad Crítica"),
            RecommendedAction::CriticalAlert
        );
        assert_eq!(RecommendedAction::parse("Critical alert"), RecommendedAction::CriticalAlert);
        assert_eq!(RecommendedAction::parse("something else"), RecommendedAction::ManualReview);
    }

    #[test]
    fn test_supervision_payload_sets_critical_from_action() {
        let payload: SupervisionPayload = decode(
            r#"{"anomaly_detected": true, "confidence_score": 0.95,
                "summary": "bot", "recommended_action": "Alerta de Seguridad Crítica"}"#,
        )
        .unwrap();
        let report = SupervisionReport::from(payload);
        assert!(report.critical_alert);
        assert!(GatePolicy::default().supervision_blocks(&report));
    }

    #[test]
    fn test_supervision_blocks_only_above_threshold() {
        let policy = GatePolicy::default();
        // Call failures are critical but below the block threshold.
        assert!(!policy.supervision_blocks(&SupervisionReport::call_failed("boom")));
        assert!(!policy.supervision_blocks(&SupervisionReport::unparseable()));
        assert!(!policy.supervision_blocks(&SupervisionReport::empty_history()));

        let mut report = SupervisionReport::call_failed("boom");
        report.confidence = 0.9;
        assert!(!policy.supervision_blocks(&report));
        report.confidence = 0.91;
        assert!(policy.supervision_blocks(&report));
    }

    #[test]
    fn test_verdict_blocking_rules() {
        let policy = GatePolicy::default();
        assert!(policy.verdict_blocks(&verdict(false, 0.95, "SQL injection", AssessmentSource::Model)));
        assert!(!policy.verdict_blocks(&verdict(false, 0.8, "SQL injection", AssessmentSource::Model)));
        assert!(!policy.verdict_blocks(&verdict(true, 0.99, "clean", AssessmentSource::Model)));
        assert!(!policy.verdict_blocks(&verdict(
            false,
            0.95,
            "Rate limit reached",
            AssessmentSource::Model
        )));
        assert!(!policy.verdict_blocks(&verdict(false, 0.95, "x", AssessmentSource::Infrastructure)));
    }

    #[test]
    fn test_low_confidence_flags_become_warnings() {
        let policy = GatePolicy::default();
        let summary = ValidationSummary::new(
            vec![verdict(false, 0.3, "inferred", AssessmentSource::Heuristic)],
            &policy.risk_bands,
        );
        match policy.decide_validation(&summary) {
            GateDecision::Pass { warnings } => assert_eq!(warnings.len(), 1),
            other => panic!("expected pass, got {other:?}"),
        }
        assert_eq!(summary.risk, ValidationRisk::Medium);
    }

    #[test]
    fn test_validation_failure_names_fields() {
        let policy = GatePolicy::default();
        let summary = ValidationSummary::new(
            vec![verdict(false, 0.99, "prompt injection", AssessmentSource::Model)],
            &policy.risk_bands,
        );
        match policy.decide_validation(&summary) {
            GateDecision::ValidationFailed { fields, reason } => {
                assert_eq!(fields, vec![InputField::FinancialStatements]);
                assert!(reason.contains("prompt injection"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_risk_bands() {
        let bands = RiskBands::default();
        assert_eq!(bands.classify(0), ValidationRisk::Low);
        assert_eq!(bands.classify(2), ValidationRisk::Medium);
        assert_eq!(bands.classify(3), ValidationRisk::High);
        assert_eq!(bands.classify(5), ValidationRisk::Critical);

        let strict = RiskBands { low_max: 0, medium_max: 0, high_max: 1 };
        assert_eq!(strict.classify(2), ValidationRisk::Critical);
    }

    #[test]
    fn test_validation_payload_defaults() {
        let payload: ValidationPayload = decode(r#"{"is_safe": true}"#).unwrap();
        let v = payload.into_verdict(InputField::CompanyName);
        assert!(v.is_safe);
        assert_eq!(v.confidence, 0.0);
        assert_eq!(v.source, AssessmentSource::Model);
    }
}
