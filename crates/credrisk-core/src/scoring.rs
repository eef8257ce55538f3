//! Deterministic baseline scoring and the consolidated report.
//!
//! The baseline is a pure function from lexical signals in the branch
//! reports to a score in `[0, 1000]`. It never calls a model, so it is always
//! available as the fallback when consolidation fails.

use serde::{Deserialize, Serialize};

use crate::analysis::{
    lenient, BehavioralAnalysis, BranchOutcome, FinancialAnalysis, ReputationalAnalysis,
};
use crate::patterns::{
    LIQUIDITY_NEGATIVE, LIQUIDITY_POSITIVE, PAYMENT_LATE, PAYMENT_ON_TIME, RELIABILITY_HIGH,
    RELIABILITY_LOW, SOLVENCY_NEGATIVE, SOLVENCY_POSITIVE,
};

/// Score every baseline starts from.
pub const BASELINE_START: i32 = 600;

/// Highest possible score.
pub const MAX_SCORE: u16 = 1000;

/// Credit risk band derived from a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Display labels for each risk level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLabels {
    pub low: String,
    pub medium: String,
    pub high: String,
}

impl Default for RiskLabels {
    fn default() -> Self {
        Self {
            low: "BAJO".to_string(),
            medium: "MEDIO".to_string(),
            high: "ALTO".to_string(),
        }
    }
}

impl RiskLabels {
    /// English label set.
    pub fn english() -> Self {
        Self {
            low: "LOW".to_string(),
            medium: "MEDIUM".to_string(),
            high: "HIGH".to_string(),
        }
    }

    pub fn label(&self, level: RiskLevel) -> &str {
        match level {
            RiskLevel::Low => &self.low,
            RiskLevel::Medium => &self.medium,
            RiskLevel::High => &self.high,
        }
    }
}

/// Thresholds, labels and fallback confidences for consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    /// Scores at or above this are low risk.
    pub low_risk_min: u16,
    /// Scores at or above this (and below `low_risk_min`) are medium risk.
    pub medium_risk_min: u16,
    pub labels: RiskLabels,
    /// Confidence when the model answered but its payload did not decode.
    pub parse_fallback_confidence: f64,
    /// Confidence when the consolidation call itself failed.
    pub dispatch_fallback_confidence: f64,
    /// Confidence assumed when the model omits one.
    pub default_model_confidence: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            low_risk_min: 750,
            medium_risk_min: 500,
            labels: RiskLabels::default(),
            parse_fallback_confidence: 0.7,
            dispatch_fallback_confidence: 0.6,
            default_model_confidence: 0.8,
        }
    }
}

impl ScoringPolicy {
    pub fn risk_level(&self, score: u16) -> RiskLevel {
        if score >= self.low_risk_min {
            RiskLevel::Low
        } else if score >= self.medium_risk_min {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    pub fn label(&self, level: RiskLevel) -> &str {
        self.labels.label(level)
    }
}

/// A lexical signal detected in a branch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    SolvencyStrong,
    SolvencyWeak,
    LiquidityStrong,
    LiquidityWeak,
    FinancialUnavailable,
    SentimentPositive,
    SentimentNegative,
    PaymentsLate,
    PaymentsOnTime,
    ReferencesReliable,
    ReferencesUnreliable,
}

impl Signal {
    /// Score adjustment contributed by this signal.
    pub fn delta(self) -> i32 {
        match self {
            Self::SolvencyStrong => 100,
            Self::SolvencyWeak => -150,
            Self::LiquidityStrong => 50,
            Self::LiquidityWeak => -100,
            Self::FinancialUnavailable => -50,
            Self::SentimentPositive => 75,
            Self::SentimentNegative => -75,
            Self::PaymentsLate => -100,
            Self::PaymentsOnTime => 50,
            Self::ReferencesReliable => 25,
            Self::ReferencesUnreliable => -50,
        }
    }
}

/// Branch outcomes the baseline reads from. Missing branches count as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineInputs<'a> {
    pub financial: Option<&'a BranchOutcome<FinancialAnalysis>>,
    pub reputational: Option<&'a BranchOutcome<ReputationalAnalysis>>,
    pub behavioral: Option<&'a BranchOutcome<BehavioralAnalysis>>,
}

/// Baseline score together with the signals that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub score: u16,
    pub signals: Vec<Signal>,
}

/// Detect every lexical signal in the branch outcomes.
pub fn detect_signals(inputs: &BaselineInputs<'_>) -> Vec<Signal> {
    let mut signals = Vec::new();

    match inputs.financial {
        Some(outcome) if outcome.is_success() => {
            let report = outcome.report();
            if SOLVENCY_POSITIVE.is_match(&report.solvency) {
                signals.push(Signal::SolvencyStrong);
            } else if SOLVENCY_NEGATIVE.is_match(&report.solvency) {
                signals.push(Signal::SolvencyWeak);
            }
            if LIQUIDITY_POSITIVE.is_match(&report.liquidity) {
                signals.push(Signal::LiquidityStrong);
            } else if LIQUIDITY_NEGATIVE.is_match(&report.liquidity) {
                signals.push(Signal::LiquidityWeak);
            }
        }
        _ => signals.push(Signal::FinancialUnavailable),
    }

    if let Some(outcome) = inputs.reputational.filter(|o| o.is_success()) {
        let score = outcome.report().sentiment_score;
        if score > 0.3 {
            signals.push(Signal::SentimentPositive);
        } else if score < -0.3 {
            signals.push(Signal::SentimentNegative);
        }
    }

    if let Some(outcome) = inputs.behavioral.filter(|o| o.is_success()) {
        let report = outcome.report();
        if PAYMENT_LATE.is_match(&report.payment_pattern) {
            signals.push(Signal::PaymentsLate);
        } else if PAYMENT_ON_TIME.is_match(&report.payment_pattern) {
            signals.push(Signal::PaymentsOnTime);
        }
        if RELIABILITY_HIGH.is_match(&report.reference_reliability) {
            signals.push(Signal::ReferencesReliable);
        } else if RELIABILITY_LOW.is_match(&report.reference_reliability) {
            signals.push(Signal::ReferencesUnreliable);
        }
    }

    signals
}

/// Apply signal deltas to the starting score and clamp to `[0, 1000]`.
pub fn score_from_signals(signals: &[Signal]) -> u16 {
    let total = signals
        .iter()
        .fold(BASELINE_START, |acc, signal| acc + signal.delta());
    total.clamp(0, MAX_SCORE as i32) as u16
}

/// Compute the deterministic baseline for a set of branch outcomes.
pub fn baseline_score(inputs: &BaselineInputs<'_>) -> Baseline {
    let signals = detect_signals(inputs);
    Baseline {
        score: score_from_signals(&signals),
        signals,
    }
}

/// Where the final score of a consolidated report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    /// The model refined the baseline.
    Model,
    /// The model answered but its payload could not be decoded.
    BaselineParseFallback,
    /// The consolidation call failed outright.
    BaselineDispatchFallback,
}

/// Final consolidated credit report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedReport {
    pub final_score: u16,
    pub risk_level: RiskLevel,
    pub risk_label: String,
    pub baseline_score: u16,
    pub justification: String,
    pub contributing_factors: Vec<String>,
    pub credit_recommendation: String,
    pub confidence: f64,
    pub source: ScoreSource,
    pub signals: Vec<Signal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConsolidatedReport {
    /// Report built from the baseline alone.
    pub fn from_baseline(
        baseline: &Baseline,
        policy: &ScoringPolicy,
        source: ScoreSource,
        error: Option<String>,
    ) -> Self {
        let level = policy.risk_level(baseline.score);
        let confidence = match source {
            ScoreSource::BaselineDispatchFallback => policy.dispatch_fallback_confidence,
            _ => policy.parse_fallback_confidence,
        };
        let justification = match source {
            ScoreSource::BaselineDispatchFallback => {
                "Puntaje calculado con el modelo base tras un error en la consolidación"
            }
            _ => "Puntaje calculado con el modelo base a partir de los análisis de negocio",
        };
        Self {
            final_score: baseline.score,
            risk_level: level,
            risk_label: policy.label(level).to_string(),
            baseline_score: baseline.score,
            justification: justification.to_string(),
            contributing_factors: baseline.signals.iter().map(|s| describe(*s)).collect(),
            credit_recommendation: recommendation(level).to_string(),
            confidence,
            source,
            signals: baseline.signals.clone(),
            error,
        }
    }

    /// Overwrite score and risk fields from another report.
    pub fn with_score_of(mut self, other: &ConsolidatedReport) -> Self {
        self.final_score = other.final_score;
        self.risk_level = other.risk_level;
        self.risk_label = other.risk_label.clone();
        self.baseline_score = other.baseline_score;
        self.source = other.source;
        self.signals = other.signals.clone();
        self
    }
}

/// Payload the consolidation model returns.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoreRefinement {
    #[serde(alias = "puntaje_final", deserialize_with = "lenient::optional_number")]
    pub final_score: Option<f64>,
    #[serde(alias = "justificacion", deserialize_with = "lenient::string")]
    pub justification: String,
    #[serde(alias = "factores_contribuyentes", deserialize_with = "lenient::string_list")]
    pub contributing_factors: Vec<String>,
    #[serde(alias = "recomendacion_credito", deserialize_with = "lenient::string")]
    pub credit_recommendation: String,
    #[serde(alias = "confianza", deserialize_with = "lenient::optional_number")]
    pub confidence: Option<f64>,
}

impl ScoreRefinement {
    /// Merge the model payload with the baseline.
    ///
    /// The score is clamped and the risk level is always recomputed from it.
    /// Missing fields fall back to baseline-derived values.
    pub fn into_report(self, baseline: &Baseline, policy: &ScoringPolicy) -> ConsolidatedReport {
        let score = self
            .final_score
            .map(|s| s.round().clamp(0.0, MAX_SCORE as f64) as u16)
            .unwrap_or(baseline.score);
        let level = policy.risk_level(score);
        let contributing_factors = if self.contributing_factors.is_empty() {
            baseline.signals.iter().map(|s| describe(*s)).collect()
        } else {
            self.contributing_factors
        };

        ConsolidatedReport {
            final_score: score,
            risk_level: level,
            risk_label: policy.label(level).to_string(),
            baseline_score: baseline.score,
            justification: non_empty(
                self.justification,
                "Puntaje basado en el análisis consolidado",
            ),
            contributing_factors,
            credit_recommendation: non_empty(self.credit_recommendation, recommendation(level)),
            confidence: self
                .confidence
                .unwrap_or(policy.default_model_confidence)
                .clamp(0.0, 1.0),
            source: ScoreSource::Model,
            signals: baseline.signals.clone(),
            error: None,
        }
    }
}

/// Payload the scenario model returns.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScenarioPayload {
    #[serde(alias = "nuevo_puntaje", deserialize_with = "lenient::optional_number")]
    pub new_score: Option<f64>,
    #[serde(alias = "nueva_recomendacion", deserialize_with = "lenient::string")]
    pub new_recommendation: String,
    #[serde(alias = "analisis", deserialize_with = "lenient::string")]
    pub analysis: String,
}

/// Result of re-scoring a consolidated report under a hypothetical scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub base_score: u16,
    pub new_score: u16,
    /// `new_score - base_score`.
    pub score_change: i32,
    pub risk_level: RiskLevel,
    pub risk_label: String,
    pub new_recommendation: String,
    pub analysis: String,
    /// `Model`, or a fallback that kept the base score.
    pub source: ScoreSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScenarioOutcome {
    /// Outcome that keeps the base report's score.
    pub fn unchanged(
        scenario: impl Into<String>,
        base: &ConsolidatedReport,
        source: ScoreSource,
        error: Option<String>,
    ) -> Self {
        let analysis = match source {
            ScoreSource::BaselineDispatchFallback => "No se pudo simular el escenario",
            _ => "La simulación no devolvió un resultado utilizable",
        };
        Self {
            scenario: scenario.into(),
            base_score: base.final_score,
            new_score: base.final_score,
            score_change: 0,
            risk_level: base.risk_level,
            risk_label: base.risk_label.clone(),
            new_recommendation: base.credit_recommendation.clone(),
            analysis: analysis.to_string(),
            source,
            error,
        }
    }
}

impl ScenarioPayload {
    /// Clamp the new score and recompute the risk level from it.
    ///
    /// A payload without a score keeps the base score.
    pub fn into_outcome(
        self,
        scenario: impl Into<String>,
        base: &ConsolidatedReport,
        policy: &ScoringPolicy,
    ) -> ScenarioOutcome {
        let score = self
            .new_score
            .map(|s| s.round().clamp(0.0, MAX_SCORE as f64) as u16)
            .unwrap_or(base.final_score);
        let level = policy.risk_level(score);

        ScenarioOutcome {
            scenario: scenario.into(),
            base_score: base.final_score,
            new_score: score,
            score_change: score as i32 - base.final_score as i32,
            risk_level: level,
            risk_label: policy.label(level).to_string(),
            new_recommendation: non_empty(self.new_recommendation, recommendation(level)),
            analysis: non_empty(self.analysis, "Sin análisis del escenario"),
            source: ScoreSource::Model,
            error: None,
        }
    }
}

fn non_empty(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

fn recommendation(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => "Aprobar crédito en condiciones estándar",
        RiskLevel::Medium => "Aprobar con condiciones y seguimiento",
        RiskLevel::High => "Rechazar o requerir garantías adicionales",
    }
}

fn describe(signal: Signal) -> String {
    let text = match signal {
        Signal::SolvencyStrong => "Solvencia favorable",
        Signal::SolvencyWeak => "Solvencia débil",
        Signal::LiquidityStrong => "Liquidez suficiente",
        Signal::LiquidityWeak => "Liquidez insuficiente",
        Signal::FinancialUnavailable => "Análisis financiero no disponible",
        Signal::SentimentPositive => "Reputación positiva",
        Signal::SentimentNegative => "Reputación negativa",
        Signal::PaymentsLate => "Historial de pagos con retrasos",
        Signal::PaymentsOnTime => "Pagos puntuales",
        Signal::ReferencesReliable => "Referencias comerciales fiables",
        Signal::ReferencesUnreliable => "Referencias comerciales poco fiables",
    };
    text.to_string()
}
