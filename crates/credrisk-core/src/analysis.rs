//! Business-analysis branch reports and outcomes.
//!
//! Each of the three branches (financial, reputational, behavioral) decodes
//! the model response into a fixed schema. When the response is not valid
//! JSON, a branch-specific heuristic recovers what it can from the raw text.
//! Field names accept the Spanish keys of the original schema as aliases.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::extract::truncate_chars;
use crate::patterns::{self, PAYMENT_LATE, PAYMENT_ON_TIME};

/// Placeholder used when a branch has nothing to report.
pub const NO_DATA: &str = "Sin datos";

/// Summary used when the financial branch receives no statements.
pub const NO_FINANCIAL_DATA: &str = "No hay datos financieros para analizar";

/// The three independent business-analysis branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    Financial,
    Reputational,
    Behavioral,
}

impl BranchKind {
    /// All branches in evaluation order.
    pub const ALL: [BranchKind; 3] = [Self::Financial, Self::Reputational, Self::Behavioral];

    /// Agent identifier used in audit events and model requests.
    pub fn agent_id(&self) -> &'static str {
        match self {
            Self::Financial => "financial_agent",
            Self::Reputational => "reputational_agent",
            Self::Behavioral => "behavioral_agent",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::Reputational => "reputational",
            Self::Behavioral => "behavioral",
        }
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a successful report was obtained from the model response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extraction {
    /// Decoded from a JSON object.
    Structured,
    /// Recovered by lexical heuristics from unstructured text.
    Heuristic,
}

/// Common behaviour of branch report schemas.
pub trait BranchReport:
    Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Which branch this schema belongs to.
    const KIND: BranchKind;

    /// Record returned when the branch input is empty.
    fn no_data() -> Self;

    /// Best-effort record from a response that did not decode.
    fn from_unstructured(raw: &str) -> Option<Self>;

    /// Fallback record describing a failed analysis.
    fn failed(error: &str) -> Self;

    /// Copy of this record with every free-text field replaced by `text`.
    fn redacted(&self, text: &str) -> Self;

    /// Executive summary of the analysis.
    fn summary(&self) -> &str;
}

/// Outcome of one branch: its parsed report, or a fallback plus the error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BranchOutcome<T> {
    Success {
        report: T,
        tokens_used: u32,
        extraction: Extraction,
    },
    Failure {
        report: T,
        error: String,
    },
}

impl<T: BranchReport> BranchOutcome<T> {
    /// Failure outcome for a branch that had no input.
    pub fn no_data() -> Self {
        Self::Failure {
            report: T::no_data(),
            error: "no data provided".to_string(),
        }
    }

    /// Failure outcome carrying the error text.
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::Failure {
            report: T::failed(&error),
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn report(&self) -> &T {
        match self {
            Self::Success { report, .. } | Self::Failure { report, .. } => report,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    pub fn tokens_used(&self) -> u32 {
        match self {
            Self::Success { tokens_used, .. } => *tokens_used,
            Self::Failure { .. } => 0,
        }
    }

    /// Same outcome with the report swapped, keeping status and metadata.
    pub fn with_report(self, report: T) -> Self {
        match self {
            Self::Success {
                tokens_used,
                extraction,
                ..
            } => Self::Success {
                report,
                tokens_used,
                extraction,
            },
            Self::Failure { error, .. } => Self::Failure { report, error },
        }
    }
}

/// Financial statement analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinancialAnalysis {
    #[serde(alias = "solvencia", deserialize_with = "lenient::string")]
    pub solvency: String,
    #[serde(alias = "liquidez", deserialize_with = "lenient::string")]
    pub liquidity: String,
    #[serde(alias = "rentabilidad", deserialize_with = "lenient::string")]
    pub profitability: String,
    #[serde(alias = "tendencia_ventas", deserialize_with = "lenient::string")]
    pub sales_trend: String,
    #[serde(alias = "resumen_ejecutivo", deserialize_with = "lenient::string")]
    pub executive_summary: String,
}

impl BranchReport for FinancialAnalysis {
    const KIND: BranchKind = BranchKind::Financial;

    fn no_data() -> Self {
        Self {
            solvency: NO_DATA.to_string(),
            liquidity: NO_DATA.to_string(),
            profitability: NO_DATA.to_string(),
            sales_trend: NO_DATA.to_string(),
            executive_summary: NO_FINANCIAL_DATA.to_string(),
        }
    }

    fn from_unstructured(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if !patterns::contains_financial_vocabulary(raw) {
            return None;
        }
        let field = truncate_chars(raw, 200).to_string();
        Some(Self {
            solvency: field.clone(),
            liquidity: field.clone(),
            profitability: field.clone(),
            sales_trend: field,
            executive_summary: truncate_chars(raw, 300).to_string(),
        })
    }

    fn failed(error: &str) -> Self {
        Self {
            solvency: NO_DATA.to_string(),
            liquidity: NO_DATA.to_string(),
            profitability: NO_DATA.to_string(),
            sales_trend: NO_DATA.to_string(),
            executive_summary: format!("Error en análisis financiero: {error}"),
        }
    }

    fn redacted(&self, text: &str) -> Self {
        Self {
            solvency: text.to_string(),
            liquidity: text.to_string(),
            profitability: text.to_string(),
            sales_trend: text.to_string(),
            executive_summary: text.to_string(),
        }
    }

    fn summary(&self) -> &str {
        &self.executive_summary
    }
}

/// Social-media reputation analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationalAnalysis {
    #[serde(alias = "sentimiento_general", deserialize_with = "lenient::string")]
    pub overall_sentiment: String,
    /// Polarity in `[-1.0, 1.0]`.
    #[serde(alias = "puntaje_sentimiento", deserialize_with = "lenient::polarity")]
    pub sentiment_score: f64,
    #[serde(alias = "temas_positivos", deserialize_with = "lenient::string_list")]
    pub positive_themes: Vec<String>,
    #[serde(alias = "temas_negativos", deserialize_with = "lenient::string_list")]
    pub negative_themes: Vec<String>,
    #[serde(alias = "resumen_ejecutivo", deserialize_with = "lenient::string")]
    pub executive_summary: String,
}

impl BranchReport for ReputationalAnalysis {
    const KIND: BranchKind = BranchKind::Reputational;

    fn no_data() -> Self {
        Self {
            overall_sentiment: "Neutral".to_string(),
            sentiment_score: 0.0,
            positive_themes: Vec::new(),
            negative_themes: Vec::new(),
            executive_summary: "No hay datos de redes sociales para analizar".to_string(),
        }
    }

    fn from_unstructured(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let (positive, negative) = patterns::sentiment_counts(raw);
        let (sentiment, score) = if positive > negative {
            ("Positivo", 0.6)
        } else if negative > positive {
            ("Negativo", -0.4)
        } else {
            ("Neutral", 0.0)
        };
        Some(Self {
            overall_sentiment: sentiment.to_string(),
            sentiment_score: score,
            positive_themes: Vec::new(),
            negative_themes: Vec::new(),
            executive_summary: truncate_chars(raw, 300).to_string(),
        })
    }

    fn failed(error: &str) -> Self {
        Self {
            executive_summary: format!("Error en análisis reputacional: {error}"),
            ..Self::no_data()
        }
    }

    fn redacted(&self, text: &str) -> Self {
        Self {
            overall_sentiment: text.to_string(),
            sentiment_score: self.sentiment_score,
            positive_themes: Vec::new(),
            negative_themes: Vec::new(),
            executive_summary: text.to_string(),
        }
    }

    fn summary(&self) -> &str {
        &self.executive_summary
    }
}

/// Commercial behaviour and payment history analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehavioralAnalysis {
    /// "Puntual", "Con Retrasos Leves" or "Moroso"
    #[serde(alias = "patron_de_pago", deserialize_with = "lenient::string")]
    pub payment_pattern: String,
    /// "Alta", "Media" or "Baja"
    #[serde(alias = "fiabilidad_referencias", deserialize_with = "lenient::string")]
    pub reference_reliability: String,
    /// "Bajo", "Moderado" or "Alto"
    #[serde(alias = "riesgo_comportamental", deserialize_with = "lenient::string")]
    pub behavioral_risk: String,
    #[serde(alias = "resumen_ejecutivo", deserialize_with = "lenient::string")]
    pub executive_summary: String,
}

impl BranchReport for BehavioralAnalysis {
    const KIND: BranchKind = BranchKind::Behavioral;

    fn no_data() -> Self {
        Self {
            payment_pattern: NO_DATA.to_string(),
            reference_reliability: NO_DATA.to_string(),
            behavioral_risk: NO_DATA.to_string(),
            executive_summary: "No hay datos comerciales ni de pagos para analizar".to_string(),
        }
    }

    fn from_unstructured(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let payment_pattern = if PAYMENT_LATE.is_match(raw) {
            "Con Retrasos"
        } else if PAYMENT_ON_TIME.is_match(raw) {
            "Puntual"
        } else {
            "Sin determinar"
        };
        Some(Self {
            payment_pattern: payment_pattern.to_string(),
            reference_reliability: "Sin determinar".to_string(),
            behavioral_risk: "Sin determinar".to_string(),
            executive_summary: truncate_chars(raw, 200).to_string(),
        })
    }

    fn failed(error: &str) -> Self {
        Self {
            executive_summary: format!("Error en análisis comportamental: {error}"),
            ..Self::no_data()
        }
    }

    fn redacted(&self, text: &str) -> Self {
        Self {
            payment_pattern: text.to_string(),
            reference_reliability: text.to_string(),
            behavioral_risk: text.to_string(),
            executive_summary: text.to_string(),
        }
    }

    fn summary(&self) -> &str {
        &self.executive_summary
    }
}

/// Deserializers that accept whatever JSON shape the model produced.
pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn flatten(value: Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::String(s) => s,
            Value::Array(items) => items
                .into_iter()
                .map(flatten)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(flatten(Value::deserialize(d)?))
    }

    pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items
                .into_iter()
                .map(flatten)
                .filter(|s| !s.is_empty())
                .collect(),
            Value::Null => Vec::new(),
            other => vec![flatten(other)],
        })
    }

    /// Optional number; numeric strings are parsed, anything else is `None`.
    pub fn optional_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|n| n.is_finite()))
    }

    /// Number in `[-1, 1]`; strings are parsed, anything else is 0.
    pub fn polarity<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let raw = match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        };
        Ok(if raw.is_finite() { raw.clamp(-1.0, 1.0) } else { 0.0 })
    }
}
