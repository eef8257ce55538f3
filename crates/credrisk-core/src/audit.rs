//! Audit event model.
//!
//! Events are append-only and addressed by evaluation id plus a sequence
//! number assigned by the log. They serialize to one JSON object per line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Fixed taxonomy of audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    SecuritySupervision,
    InputValidation,
    BusinessAnalysis,
    OutputSanitization,
    ScoringConsolidation,
    EvaluationCompleted,
    EvaluationFailed,
    SecurityAlert,
    ScenarioSimulation,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecuritySupervision => "SECURITY_SUPERVISION",
            Self::InputValidation => "INPUT_VALIDATION",
            Self::BusinessAnalysis => "BUSINESS_ANALYSIS",
            Self::OutputSanitization => "OUTPUT_SANITIZATION",
            Self::ScoringConsolidation => "SCORING_CONSOLIDATION",
            Self::EvaluationCompleted => "EVALUATION_COMPLETED",
            Self::EvaluationFailed => "EVALUATION_FAILED",
            Self::SecurityAlert => "SECURITY_ALERT",
            Self::ScenarioSimulation => "SCENARIO_SIMULATION",
        }
    }

    /// Whether this event closes an evaluation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::EvaluationCompleted | Self::EvaluationFailed)
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub evaluation_id: String,
    /// Assigned by the log on append; monotonic per log.
    #[serde(default)]
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub agent_id: String,
    #[serde(default)]
    pub company_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub details: JsonValue,
}

impl AuditEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        evaluation_id: impl Into<String>,
        event_type: AuditEventType,
        agent_id: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            evaluation_id: evaluation_id.into(),
            sequence: 0,
            timestamp: Utc::now(),
            event_type,
            agent_id: agent_id.into(),
            company_id: String::new(),
            success,
            risk_level: None,
            processing_time_ms: None,
            tokens_used: None,
            details: JsonValue::Null,
        }
    }

    pub fn company(mut self, company_id: impl Into<String>) -> Self {
        self.company_id = company_id.into();
        self
    }

    pub fn risk(mut self, risk_level: impl Into<String>) -> Self {
        self.risk_level = Some(risk_level.into());
        self
    }

    pub fn processing_time(mut self, elapsed: std::time::Duration) -> Self {
        self.processing_time_ms = Some(elapsed.as_millis() as u64);
        self
    }

    pub fn tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    pub fn details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&AuditEventType::ScoringConsolidation).unwrap();
        assert_eq!(json, "\"SCORING_CONSOLIDATION\"");
        assert_eq!(AuditEventType::SecurityAlert.to_string(), "SECURITY_ALERT");
        assert!(AuditEventType::EvaluationFailed.is_terminal());
        assert!(!AuditEventType::BusinessAnalysis.is_terminal());
        assert_eq!(AuditEventType::ScenarioSimulation.as_str(), "SCENARIO_SIMULATION");
        assert!(!AuditEventType::ScenarioSimulation.is_terminal());
    }

    #[test]
    fn test_event_line_shape() {
        let event = AuditEvent::new("eval_1", AuditEventType::BusinessAnalysis, "financial_agent", true)
            .company("c-1")
            .tokens(120)
            .processing_time(std::time::Duration::from_millis(1500))
            .details(serde_json::json!({"branch": "financial"}));

        let line = serde_json::to_value(&event).unwrap();
        assert_eq!(line["event_type"], "BUSINESS_ANALYSIS");
        assert_eq!(line["tokens_used"], 120);
        assert_eq!(line["processing_time_ms"], 1500);
        assert!(line.get("risk_level").is_none());
        assert!(line["timestamp"].as_str().unwrap().contains('T'));

        let back: AuditEvent = serde_json::from_value(line).unwrap();
        assert_eq!(back, event);
    }
}
