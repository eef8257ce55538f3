//! Shared lexical signals for baseline scoring and fallback parsing.
//!
//! Branch reports are free text produced by a model, so the deterministic
//! parts of the pipeline read them through keyword patterns. Both Spanish
//! and English vocabulary are accepted because the model may answer in
//! either language.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // =========================================================================
    // FINANCIAL DESCRIPTORS
    // =========================================================================

    /// Favourable solvency wording
    pub static ref SOLVENCY_POSITIVE: Regex = Regex::new(
        r"(?i)\b(buen[ao]s?|alt[ao]s?|positiv[ao]s?|estables?|s[oó]lid[ao]s?|good|strong|high|positive|stable|solid|healthy)\b"
    ).unwrap();

    /// Unfavourable solvency wording
    pub static ref SOLVENCY_NEGATIVE: Regex = Regex::new(
        r"(?i)\b(mal[ao]s?|baj[ao]s?|negativ[ao]s?|cr[ií]tic[ao]s?|d[eé]bil(es)?|bad|weak|low|negative|critical|poor)\b"
    ).unwrap();

    /// Favourable liquidity wording
    pub static ref LIQUIDITY_POSITIVE: Regex = Regex::new(
        r"(?i)\b(buen[ao]s?|alt[ao]s?|suficientes?|adecuad[ao]s?|good|high|sufficient|adequate|strong|ample)\b"
    ).unwrap();

    /// Unfavourable liquidity wording
    pub static ref LIQUIDITY_NEGATIVE: Regex = Regex::new(
        r"(?i)\b(mal[ao]s?|baj[ao]s?|insuficientes?|ajustad[ao]s?|bad|low|insufficient|weak|tight|poor)\b"
    ).unwrap();

    /// Vocabulary that marks text as a financial analysis
    pub static ref FINANCIAL_VOCABULARY: Regex = Regex::new(
        r"(?i)(solvencia|liquidez|rentabilidad|an[aá]lisis financiero|financial|solvency|liquidity|profitability)"
    ).unwrap();

    // =========================================================================
    // BEHAVIOURAL DESCRIPTORS
    // =========================================================================

    /// Late or delinquent payment wording. Checked before [`PAYMENT_ON_TIME`]
    /// because "impuntual" contains "puntual".
    pub static ref PAYMENT_LATE: Regex = Regex::new(
        r"(?i)(impuntual|retras|moros|\blate\b|delay|overdue|delinquen|\bdefault)"
    ).unwrap();

    /// On-time payment wording
    pub static ref PAYMENT_ON_TIME: Regex = Regex::new(
        r"(?i)(puntual|on[\s-]time|punctual|timely|prompt)"
    ).unwrap();

    /// High reliability of commercial references
    pub static ref RELIABILITY_HIGH: Regex = Regex::new(
        r"(?i)\b(alta|alto|high)\b"
    ).unwrap();

    /// Low reliability of commercial references
    pub static ref RELIABILITY_LOW: Regex = Regex::new(
        r"(?i)\b(baja|bajo|low)\b"
    ).unwrap();

    // =========================================================================
    // SENTIMENT
    // =========================================================================

    pub static ref SENTIMENT_POSITIVE: Regex = Regex::new(
        r"(?i)\b(excelente|buen[oa]|positiv[oa]|recomendad[oa]|calidad|profesional|excellent|good|positive|recommended|quality|professional)\b"
    ).unwrap();

    pub static ref SENTIMENT_NEGATIVE: Regex = Regex::new(
        r"(?i)\b(mal[oa]|p[eé]sim[oa]|negativ[oa]|problemas?|quejas?|deficiente|bad|terrible|negative|problems?|complaints?|poor)\b"
    ).unwrap();
}

/// Phrases that suggest a validator response meant "unsafe".
pub const DANGER_SIGNALS: &[&str] = &[
    "not safe",
    "unsafe",
    "malicious",
    "injection",
    "attack",
    "dangerous",
    "blocked",
    "false",
    "is_safe\": false",
];

/// Phrases that suggest a validator response meant "safe".
pub const SAFETY_SIGNALS: &[&str] = &[
    "safe",
    "legitimate",
    "legítimo",
    "no malicious",
    "no commands",
    "is_safe\": true",
    "true",
    "seguro",
];

/// Check if content reads like a financial analysis.
pub fn contains_financial_vocabulary(content: &str) -> bool {
    FINANCIAL_VOCABULARY.is_match(content)
}

/// Count positive and negative sentiment words in content.
pub fn sentiment_counts(content: &str) -> (usize, usize) {
    (
        SENTIMENT_POSITIVE.find_iter(content).count(),
        SENTIMENT_NEGATIVE.find_iter(content).count(),
    )
}

/// Infer a safety verdict from an unstructured validator response.
///
/// Returns `true` when safety phrases outnumber danger phrases.
pub fn infer_safety(raw: &str) -> bool {
    let lowered = raw.to_lowercase();
    let danger = DANGER_SIGNALS.iter().filter(|s| lowered.contains(*s)).count();
    let safety = SAFETY_SIGNALS.iter().filter(|s| lowered.contains(*s)).count();
    safety > danger
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_financial_vocabulary() {
        assert!(contains_financial_vocabulary("La solvencia es adecuada"));
        assert!(contains_financial_vocabulary("Financial position looks fine"));
        assert!(contains_financial_vocabulary("Análisis financiero completo"));
        assert!(!contains_financial_vocabulary("Hola mundo"));
    }

    #[test]
    fn test_payment_late_matches_before_on_time() {
        assert!(PAYMENT_LATE.is_match("Impuntual"));
        assert!(PAYMENT_LATE.is_match("Con Retrasos Leves"));
        assert!(PAYMENT_LATE.is_match("Moroso"));
        assert!(!PAYMENT_LATE.is_match("Puntual"));
        assert!(PAYMENT_ON_TIME.is_match("Puntual"));
        assert!(PAYMENT_ON_TIME.is_match("pays on time"));
    }

    #[test]
    fn test_solvency_wording() {
        assert!(SOLVENCY_POSITIVE.is_match("Solvencia buena"));
        assert!(SOLVENCY_POSITIVE.is_match("stable solvency"));
        assert!(SOLVENCY_NEGATIVE.is_match("Solvencia crítica"));
        assert!(!SOLVENCY_POSITIVE.is_match("Solvencia crítica"));
    }

    #[test]
    fn test_reliability_is_word_bounded() {
        assert!(RELIABILITY_HIGH.is_match("Alta"));
        assert!(!RELIABILITY_HIGH.is_match("Altamente variable"));
        assert!(RELIABILITY_LOW.is_match("low"));
    }

    #[test]
    fn test_sentiment_counts() {
        let (pos, neg) = sentiment_counts("Excelente servicio, muy profesional, una queja menor");
        assert_eq!(pos, 2);
        assert_eq!(neg, 1);
    }

    #[test]
    fn test_infer_safety() {
        assert!(infer_safety("The content is safe and legitimate"));
        assert!(!infer_safety("Possible SQL injection attack, unsafe"));
        assert!(!infer_safety(""));
    }
}
