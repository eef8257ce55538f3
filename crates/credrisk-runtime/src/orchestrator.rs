//! Evaluation pipeline controller.
//!
//! The pipeline owns one [`EvaluationRecord`] per evaluation and drives it
//! through the phase state machine:
//! - Security gate: audit supervision, then per-field validation
//! - Business analysis: the three branches via `tokio::join!`, then their
//!   sanitization, also joined
//! - Scoring consolidation and a final sanitization of the report
//!
//! Every path ends in an [`EvaluationResult`]. Gate blocks and invalid
//! requests end in `FAILED`; degraded branches still complete.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use credrisk_core::{
    extract, AssessmentSource, AuditEvent, AuditEventType, BaselineInputs, BranchOutcome,
    BranchReport, ConsolidatedReport, CoreError, EvaluationRecord, EvaluationRequest,
    EvaluationResult, FailureReason, GateDecision, GatePolicy, Phase, SanitizationNote,
    SanitizationTarget, ScenarioOutcome,
};

use crate::agents::{BehavioralAgent, BranchAgent, FinancialAgent, ReputationalAgent};
use crate::audit_log::AuditLog;
use crate::cache::SanitizationCache;
use crate::config::RuntimeConfig;
use crate::consolidation::{ScoringConsolidator, CONSOLIDATION_AGENT_ID};
use crate::dispatcher::{DispatcherStats, ModelDispatcher};
use crate::documents::{build_financial_text, DocumentError, DocumentExtractor, PlainTextExtractor};
use crate::providers::LlmProvider;
use crate::scenario::{ScenarioSimulator, SCENARIO_AGENT_ID};
use crate::security::{
    InputValidator, OutputSanitizer, SanitizationOutcome, SecuritySupervisor, REPORT_PLACEHOLDER,
    SANITIZER_AGENT_ID, SUPERVISOR_AGENT_ID, VALIDATOR_AGENT_ID,
};

/// Agent id used for pipeline-level audit events.
pub const PIPELINE_AGENT_ID: &str = "master_orchestrator";

/// Agent id used for security alerts.
pub const ALERT_AGENT_ID: &str = "security_system";

const MAX_TABLE_ROWS: usize = 12;

/// Reasons an evaluation stops before completing.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    SecurityBlocked(String),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("phase error: {0}")]
    Phase(#[from] CoreError),

    #[error("document extraction failed: {0}")]
    Documents(#[from] DocumentError),
}

impl PipelineError {
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::InvalidRequest(_) | Self::Documents(_) => FailureReason::InvalidRequest,
            Self::SecurityBlocked(_) => FailureReason::SecurityBlocked,
            Self::ValidationFailed(_) => FailureReason::ValidationFailed,
            Self::Phase(_) => FailureReason::Internal,
        }
    }
}

/// Receives record snapshots and final results.
///
/// Observers are notified synchronously from the pipeline task and must not
/// block. They are not required for correctness.
pub trait EvaluationObserver: Send + Sync {
    /// Called after every phase transition.
    fn on_transition(&self, _record: &EvaluationRecord) {}

    /// Called once with the result handed to the caller.
    fn on_result(&self, _result: &EvaluationResult) {}
}

/// Aggregate pipeline statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_evaluations: u64,
    /// Evaluations that reached `COMPLETED`, degraded or not.
    pub successful_evaluations: u64,
    /// Completed evaluations that recorded errors.
    pub degraded_evaluations: u64,
    pub failed_evaluations: u64,
    pub average_processing_ms: f64,
    pub total_tokens_used: u64,
    pub dispatcher: DispatcherStats,
}

impl PipelineStats {
    pub fn success_rate(&self) -> f64 {
        self.successful_evaluations as f64 / self.total_evaluations.max(1) as f64
    }
}

/// Provider reachability plus a dispatcher snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub provider: String,
    pub provider_healthy: bool,
    pub audit_events: usize,
    pub dispatcher: DispatcherStats,
}

#[derive(Debug, Default)]
struct PipelineCounters {
    total: u64,
    completed: u64,
    degraded: u64,
    failed: u64,
    processing_ms_total: u64,
    tokens: u64,
}

/// The evaluation pipeline.
pub struct RiskPipeline {
    dispatcher: Arc<ModelDispatcher>,
    audit: Arc<AuditLog>,
    gate: GatePolicy,
    supervisor: SecuritySupervisor,
    validator: InputValidator,
    sanitizer: OutputSanitizer,
    consolidator: ScoringConsolidator,
    simulator: ScenarioSimulator,
    financial: FinancialAgent,
    reputational: ReputationalAgent,
    behavioral: BehavioralAgent,
    extractor: Arc<dyn DocumentExtractor>,
    observers: Vec<Arc<dyn EvaluationObserver>>,
    counters: Mutex<PipelineCounters>,
}

impl RiskPipeline {
    /// Create a pipeline over a shared dispatcher and audit log.
    pub fn new(dispatcher: Arc<ModelDispatcher>, audit: Arc<AuditLog>, config: &RuntimeConfig) -> Self {
        Self {
            dispatcher,
            audit,
            gate: config.gate.policy.clone(),
            supervisor: SecuritySupervisor::new(config.gate.history_window),
            validator: InputValidator::new(
                config.gate.max_field_chars,
                config.gate.policy.risk_bands.clone(),
            ),
            // Shared by every evaluation; entries are content-addressed verdicts.
            sanitizer: OutputSanitizer::new(SanitizationCache::new(
                config.sanitizer.cache_capacity,
                config.sanitizer.cache_ttl,
            )),
            consolidator: ScoringConsolidator::new(config.scoring.clone()),
            simulator: ScenarioSimulator::new(config.scoring.clone()),
            financial: FinancialAgent,
            reputational: ReputationalAgent,
            behavioral: BehavioralAgent,
            extractor: Arc::new(PlainTextExtractor),
            observers: Vec::new(),
            counters: Mutex::new(PipelineCounters::default()),
        }
    }

    /// Build the dispatcher and audit log described by `config`.
    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &RuntimeConfig) -> Self {
        let dispatcher = Arc::new(ModelDispatcher::new(
            provider,
            config.dispatcher.clone(),
            config.tiers.clone(),
        ));
        let audit = Arc::new(match &config.audit.path {
            Some(path) => AuditLog::open(path),
            None => AuditLog::in_memory(),
        });
        Self::new(dispatcher, audit, config)
    }

    pub fn with_observer(mut self, observer: Arc<dyn EvaluationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn dispatcher(&self) -> &Arc<ModelDispatcher> {
        &self.dispatcher
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Evaluate one company. Always returns a result.
    pub async fn evaluate(&self, request: EvaluationRequest) -> EvaluationResult {
        let result = self.run(new_evaluation_id(), request).await;
        self.publish(&result);
        result
    }

    /// Evaluate under a caller deadline.
    ///
    /// The evaluation runs as its own task. On expiry a `TIMEOUT` result is
    /// returned and audited; the task is left running and records its own
    /// audit trail when it finishes.
    pub async fn evaluate_with_deadline(
        self: &Arc<Self>,
        request: EvaluationRequest,
        deadline: Duration,
    ) -> EvaluationResult {
        let started = Instant::now();
        let evaluation_id = new_evaluation_id();
        let pipeline = Arc::clone(self);
        let task_id = evaluation_id.clone();
        let task_request = request.clone();
        let handle = tokio::spawn(async move { pipeline.run(task_id, task_request).await });

        let result = match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                tracing::error!(evaluation_id = %evaluation_id, error = %join_error, "Evaluation task aborted");
                self.detached_failure(
                    evaluation_id,
                    request,
                    FailureReason::Internal,
                    format!("evaluation task aborted: {join_error}"),
                    started.elapsed(),
                )
            }
            Err(_) => {
                tracing::warn!(evaluation_id = %evaluation_id, deadline = ?deadline, "Evaluation deadline exceeded");
                self.detached_failure(
                    evaluation_id,
                    request,
                    FailureReason::Timeout,
                    format!("deadline of {} exceeded", humantime::format_duration(deadline)),
                    started.elapsed(),
                )
            }
        };

        self.publish(&result);
        result
    }

    /// Fill the request's financial statements from documents.
    ///
    /// Existing financial text is kept ahead of the extracted text.
    pub async fn attach_documents(
        &self,
        mut request: EvaluationRequest,
        paths: &[PathBuf],
    ) -> Result<EvaluationRequest, PipelineError> {
        let extracted = self.extractor.extract(paths).await?;
        let mut text = build_financial_text(&extracted, MAX_TABLE_ROWS);
        if text.trim().is_empty() {
            text = serde_json::to_string(&extracted.summary).unwrap_or_default();
        }
        tracing::info!(
            company_id = %request.company_id,
            documents = extracted.summary.detected_documents,
            pending_ocr = extracted.summary.pending_ocr,
            "Extracted financial documents"
        );

        request.financial_statements = match request.financial_statements.trim() {
            "" => text,
            existing => format!("{existing}\n\n{text}"),
        };
        let files: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        Ok(request
            .with_metadata("source", json!("document_upload"))
            .with_metadata("files", json!(files))
            .with_metadata(
                "extraction_summary",
                serde_json::to_value(&extracted.summary).unwrap_or_default(),
            ))
    }

    /// Extract documents into the request and evaluate it.
    pub async fn evaluate_documents(
        &self,
        request: EvaluationRequest,
        paths: &[PathBuf],
    ) -> Result<EvaluationResult, PipelineError> {
        let request = self.attach_documents(request, paths).await?;
        Ok(self.evaluate(request).await)
    }

    /// Re-score a finished evaluation under a hypothetical scenario.
    ///
    /// The simulation is audited under the base evaluation's id. Failed
    /// evaluations have no report to simulate against.
    pub async fn simulate_scenario(
        &self,
        base: &EvaluationResult,
        scenario: &str,
    ) -> Result<ScenarioOutcome, PipelineError> {
        let report = base.consolidated_report.as_ref().ok_or_else(|| {
            PipelineError::InvalidRequest(format!(
                "evaluation {} has no consolidated report",
                base.evaluation_id
            ))
        })?;
        let scenario = scenario.trim();
        if scenario.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "scenario description must not be empty".into(),
            ));
        }

        let started = Instant::now();
        let (outcome, tokens) = self
            .simulator
            .simulate(&self.dispatcher, &base.evaluation_id, &base.company_name, report, scenario)
            .await;

        self.audit.append(
            AuditEvent::new(
                &base.evaluation_id,
                AuditEventType::ScenarioSimulation,
                SCENARIO_AGENT_ID,
                outcome.error.is_none(),
            )
            .company(&base.company_id)
            .risk(&outcome.risk_label)
            .processing_time(started.elapsed())
            .tokens(tokens as u64)
            .details(json!({
                "scenario": scenario,
                "base_score": outcome.base_score,
                "new_score": outcome.new_score,
                "score_change": outcome.score_change,
                "source": outcome.source,
            })),
        );
        tracing::info!(
            evaluation_id = %base.evaluation_id,
            base_score = outcome.base_score,
            new_score = outcome.new_score,
            "Scenario simulated"
        );
        Ok(outcome)
    }

    pub fn stats(&self) -> PipelineStats {
        let counters = self.counters.lock();
        let average_processing_ms = if counters.total == 0 {
            0.0
        } else {
            counters.processing_ms_total as f64 / counters.total as f64
        };
        PipelineStats {
            total_evaluations: counters.total,
            successful_evaluations: counters.completed,
            degraded_evaluations: counters.degraded,
            failed_evaluations: counters.failed,
            average_processing_ms,
            total_tokens_used: counters.tokens,
            dispatcher: self.dispatcher.stats(),
        }
    }

    pub async fn health_check(&self) -> HealthReport {
        let provider = self.dispatcher.provider();
        HealthReport {
            provider: provider.name().to_string(),
            provider_healthy: provider.health_check().await,
            audit_events: self.audit.len(),
            dispatcher: self.dispatcher.stats(),
        }
    }

    /// Run one evaluation to a terminal phase and freeze the result.
    async fn run(&self, evaluation_id: String, request: EvaluationRequest) -> EvaluationResult {
        let started = Instant::now();
        tracing::info!(
            evaluation_id = %evaluation_id,
            company_id = %request.company_id,
            "Starting risk evaluation"
        );

        let mut record = EvaluationRecord::new(evaluation_id, request);
        let outcome = self.execute(&mut record).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                let report = record.final_report.as_ref().or(record.consolidated.as_ref());
                self.audit.append(
                    AuditEvent::new(
                        &record.evaluation_id,
                        AuditEventType::EvaluationCompleted,
                        PIPELINE_AGENT_ID,
                        record.errors.is_empty(),
                    )
                    .company(&record.request.company_id)
                    .risk(report.map(|r| r.risk_label.clone()).unwrap_or_default())
                    .processing_time(elapsed)
                    .tokens(record.tokens_used())
                    .details(json!({
                        "final_score": report.map(|r| r.final_score),
                        "final_sanitization_applied": record
                            .sanitization
                            .iter()
                            .any(|n| n.target == SanitizationTarget::FinalReport && n.sanitization_applied),
                        "errors": record.errors,
                    })),
                );
                tracing::info!(
                    evaluation_id = %record.evaluation_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    tokens = record.tokens_used(),
                    degraded = !record.errors.is_empty(),
                    "Risk evaluation completed"
                );
            }
            Err(e) => {
                let reason = e.failure_reason();
                let failed_in = record.phase();
                tracing::warn!(
                    evaluation_id = %record.evaluation_id,
                    reason = %reason,
                    phase = %failed_in,
                    error = %e,
                    "Risk evaluation failed"
                );
                if let Err(transition) = record.fail(reason, e.to_string()) {
                    tracing::error!(evaluation_id = %record.evaluation_id, error = %transition, "Could not fail record");
                    record.record_error(e.to_string());
                }
                self.notify_transition(&record);
                self.audit.append(
                    AuditEvent::new(
                        &record.evaluation_id,
                        AuditEventType::EvaluationFailed,
                        PIPELINE_AGENT_ID,
                        false,
                    )
                    .company(&record.request.company_id)
                    .risk("ERROR")
                    .processing_time(elapsed)
                    .tokens(record.tokens_used())
                    .details(json!({
                        "reason": reason,
                        "failure_stage": failed_in,
                        "error_message": e.to_string(),
                    })),
                );
            }
        }

        record.into_result(self.consolidator.policy(), elapsed)
    }

    async fn execute(&self, record: &mut EvaluationRecord) -> Result<(), PipelineError> {
        record
            .request
            .validate()
            .map_err(|e| PipelineError::InvalidRequest(e.to_string()))?;

        self.transition(record, Phase::SecurityValidation)?;
        self.security_gate(record).await?;

        self.transition(record, Phase::BusinessAnalysis)?;
        self.business_analysis(record).await;
        self.sanitize_branches(record).await;

        self.transition(record, Phase::ScoringConsolidation)?;
        self.consolidate(record).await;
        self.sanitize_report(record).await;

        self.transition(record, Phase::Completed)?;
        Ok(())
    }

    async fn security_gate(&self, record: &mut EvaluationRecord) -> Result<(), PipelineError> {
        let id = record.evaluation_id.clone();
        let company_id = record.request.company_id.clone();

        let ((supervision, tokens), elapsed) =
            timed(self.supervisor.supervise(&self.dispatcher, &self.audit, &id)).await;
        record.add_tokens(u64::from(tokens));
        self.audit.append(
            AuditEvent::new(
                &id,
                AuditEventType::SecuritySupervision,
                SUPERVISOR_AGENT_ID,
                supervision.source != AssessmentSource::SystemError,
            )
            .company(&company_id)
            .risk(if supervision.critical_alert { "CRITICAL" } else { "LOW" })
            .processing_time(elapsed)
            .tokens(u64::from(tokens))
            .details(json!({
                "anomaly_detected": supervision.anomaly_detected,
                "confidence_score": supervision.confidence,
                "recommended_action": supervision.recommended_action.label(),
                "critical_alert": supervision.critical_alert,
                "summary": supervision.summary,
            })),
        );

        let blocked = self.gate.decide_supervision(&supervision);
        if supervision.anomaly_detected && blocked.is_none() {
            tracing::warn!(
                evaluation_id = %id,
                confidence = supervision.confidence,
                action = supervision.recommended_action.label(),
                "Supervision flagged an anomaly below the block threshold"
            );
        }
        record.supervision = Some(supervision);

        if let Some(decision) = blocked {
            let reason = match &decision {
                GateDecision::SecurityBlocked { reason } => reason.clone(),
                _ => "security supervision blocked the evaluation".to_string(),
            };
            self.audit.append(
                AuditEvent::new(&id, AuditEventType::SecurityAlert, ALERT_AGENT_ID, false)
                    .company(&company_id)
                    .risk("CRITICAL")
                    .details(json!({
                        "alert_type": "SECURITY_SUPERVISION",
                        "alert_details": reason,
                        "requires_immediate_attention": true,
                    })),
            );
            record.gate = Some(decision);
            return Err(PipelineError::SecurityBlocked(reason));
        }

        let ((summary, tokens), elapsed) =
            timed(self.validator.validate(&self.dispatcher, &id, &record.request)).await;
        record.add_tokens(u64::from(tokens));
        let decision = self.gate.decide_validation(&summary);
        self.audit.append(
            AuditEvent::new(
                &id,
                AuditEventType::InputValidation,
                VALIDATOR_AGENT_ID,
                decision.is_pass(),
            )
            .company(&company_id)
            .risk(wire_name(&summary.risk))
            .processing_time(elapsed)
            .tokens(u64::from(tokens))
            .details(json!({
                "all_safe": summary.all_safe(),
                "blocked_fields": summary.unsafe_fields,
                "field_count": summary.verdicts.len(),
                "decision": decision,
            })),
        );
        record.validation = Some(summary);

        let outcome = match &decision {
            GateDecision::Pass { warnings } => {
                for warning in warnings {
                    tracing::warn!(evaluation_id = %id, warning = %warning, "Validation flag below block threshold");
                }
                Ok(())
            }
            GateDecision::ValidationFailed { reason, .. } => {
                Err(PipelineError::ValidationFailed(reason.clone()))
            }
            GateDecision::SecurityBlocked { reason } => {
                Err(PipelineError::SecurityBlocked(reason.clone()))
            }
        };
        record.gate = Some(decision);
        outcome
    }

    async fn business_analysis(&self, record: &mut EvaluationRecord) {
        let id = record.evaluation_id.clone();
        let request = &record.request;

        let (
            (financial, financial_time),
            (reputational, reputational_time),
            (behavioral, behavioral_time),
        ) = tokio::join!(
            timed(self.financial.analyze(&self.dispatcher, &id, request)),
            timed(self.reputational.analyze(&self.dispatcher, &id, request)),
            timed(self.behavioral.analyze(&self.dispatcher, &id, request)),
        );

        self.record_branch(record, &financial, financial_time);
        self.record_branch(record, &reputational, reputational_time);
        self.record_branch(record, &behavioral, behavioral_time);

        record.financial = Some(financial);
        record.reputational = Some(reputational);
        record.behavioral = Some(behavioral);
    }

    fn record_branch<T: BranchReport>(
        &self,
        record: &mut EvaluationRecord,
        outcome: &BranchOutcome<T>,
        elapsed: Duration,
    ) {
        let kind = T::KIND;
        let tokens = u64::from(outcome.tokens_used());
        record.add_tokens(tokens);
        if let Some(error) = outcome.error() {
            record.record_error(format!("{kind}: {error}"));
        }
        self.audit.append(
            AuditEvent::new(
                &record.evaluation_id,
                AuditEventType::BusinessAnalysis,
                kind.agent_id(),
                outcome.is_success(),
            )
            .company(&record.request.company_id)
            .processing_time(elapsed)
            .tokens(tokens)
            .details(json!({
                "agent_type": kind,
                "analysis_successful": outcome.is_success(),
                "has_error": outcome.error().is_some(),
            })),
        );
    }

    async fn sanitize_branches(&self, record: &mut EvaluationRecord) {
        let id = record.evaluation_id.clone();
        let company_id = record.request.company_id.clone();

        let (financial, reputational, behavioral) = tokio::join!(
            self.sanitize_branch(&id, &company_id, record.financial.as_ref()),
            self.sanitize_branch(&id, &company_id, record.reputational.as_ref()),
            self.sanitize_branch(&id, &company_id, record.behavioral.as_ref()),
        );

        if let Some((outcome, note, tokens)) = financial {
            record.add_tokens(u64::from(tokens));
            record.sanitization.push(note);
            record.sanitized_financial = Some(outcome);
        }
        if let Some((outcome, note, tokens)) = reputational {
            record.add_tokens(u64::from(tokens));
            record.sanitization.push(note);
            record.sanitized_reputational = Some(outcome);
        }
        if let Some((outcome, note, tokens)) = behavioral {
            record.add_tokens(u64::from(tokens));
            record.sanitization.push(note);
            record.sanitized_behavioral = Some(outcome);
        }
    }

    /// Sanitize one branch report, keeping its schema when the sanitized
    /// text still decodes.
    async fn sanitize_branch<T: BranchReport>(
        &self,
        evaluation_id: &str,
        company_id: &str,
        outcome: Option<&BranchOutcome<T>>,
    ) -> Option<(BranchOutcome<T>, SanitizationNote, u32)> {
        let outcome = outcome?;
        let target = SanitizationTarget::from(T::KIND);
        let report = outcome.report();
        let text = serde_json::to_string(report).unwrap_or_else(|_| report.summary().to_string());

        let (sanitized, elapsed) = timed(self.sanitizer.sanitize(
            &self.dispatcher,
            evaluation_id,
            target,
            &text,
        ))
        .await;
        self.audit_sanitization(evaluation_id, company_id, T::KIND.as_str(), &sanitized, elapsed);

        let result = if sanitized.applied {
            let report = extract::decode::<T>(&sanitized.text)
                .unwrap_or_else(|_| report.redacted(&sanitized.text));
            outcome.clone().with_report(report)
        } else {
            outcome.clone()
        };
        Some((result, sanitized.note(target), sanitized.tokens_used))
    }

    async fn consolidate(&self, record: &mut EvaluationRecord) {
        let id = record.evaluation_id.clone();
        let inputs = BaselineInputs {
            financial: record.sanitized_financial.as_ref().or(record.financial.as_ref()),
            reputational: record
                .sanitized_reputational
                .as_ref()
                .or(record.reputational.as_ref()),
            behavioral: record.sanitized_behavioral.as_ref().or(record.behavioral.as_ref()),
        };

        let ((report, tokens), elapsed) = timed(self.consolidator.consolidate(
            &self.dispatcher,
            &id,
            &record.request.company_name,
            inputs,
        ))
        .await;

        record.add_tokens(u64::from(tokens));
        if let Some(error) = &report.error {
            record.record_error(format!("consolidation: {error}"));
        }
        self.audit.append(
            AuditEvent::new(
                &id,
                AuditEventType::ScoringConsolidation,
                CONSOLIDATION_AGENT_ID,
                report.error.is_none(),
            )
            .company(&record.request.company_id)
            .risk(&report.risk_label)
            .processing_time(elapsed)
            .tokens(u64::from(tokens))
            .details(json!({
                "final_score": report.final_score,
                "baseline_score": report.baseline_score,
                "confidence": report.confidence,
                "source": report.source,
                "contributing_factors_count": report.contributing_factors.len(),
            })),
        );
        record.consolidated = Some(report);
    }

    /// Sanitize the consolidated report. Score and risk always survive.
    async fn sanitize_report(&self, record: &mut EvaluationRecord) {
        let Some(report) = record.consolidated.clone() else {
            return;
        };
        let id = record.evaluation_id.clone();
        let text = serde_json::to_string(&report).unwrap_or_else(|_| report.justification.clone());

        let (sanitized, elapsed) = timed(self.sanitizer.sanitize(
            &self.dispatcher,
            &id,
            SanitizationTarget::FinalReport,
            &text,
        ))
        .await;
        self.audit_sanitization(
            &id,
            &record.request.company_id,
            "final_report",
            &sanitized,
            elapsed,
        );
        record.add_tokens(u64::from(sanitized.tokens_used));
        record.sanitization.push(sanitized.note(SanitizationTarget::FinalReport));

        let final_report = if sanitized.applied {
            match extract::decode::<ConsolidatedReport>(&sanitized.text) {
                Ok(decoded) => decoded.with_score_of(&report),
                Err(_) => placeholder_report(report),
            }
        } else {
            report
        };
        record.final_report = Some(final_report);
    }

    fn audit_sanitization(
        &self,
        evaluation_id: &str,
        company_id: &str,
        agent_type: &str,
        outcome: &SanitizationOutcome,
        elapsed: Duration,
    ) {
        self.audit.append(
            AuditEvent::new(
                evaluation_id,
                AuditEventType::OutputSanitization,
                SANITIZER_AGENT_ID,
                outcome.is_safe || outcome.applied,
            )
            .company(company_id)
            .processing_time(elapsed)
            .tokens(u64::from(outcome.tokens_used))
            .details(json!({
                "agent_type": agent_type,
                "is_safe": outcome.is_safe,
                "sanitization_applied": outcome.applied,
                "sanitization_details": outcome.details,
            })),
        );
    }

    fn transition(&self, record: &mut EvaluationRecord, next: Phase) -> Result<(), PipelineError> {
        record.advance(next)?;
        tracing::debug!(evaluation_id = %record.evaluation_id, phase = %next, "Phase transition");
        self.notify_transition(record);
        Ok(())
    }

    fn notify_transition(&self, record: &EvaluationRecord) {
        for observer in &self.observers {
            observer.on_transition(record);
        }
    }

    /// Update statistics and hand the result to observers.
    fn publish(&self, result: &EvaluationResult) {
        {
            let mut counters = self.counters.lock();
            counters.total += 1;
            counters.processing_ms_total += result.processing_time_ms;
            counters.tokens += result.tokens_used;
            match result.phase {
                Phase::Completed => {
                    counters.completed += 1;
                    if !result.errors.is_empty() {
                        counters.degraded += 1;
                    }
                }
                _ => counters.failed += 1,
            }
        }
        for observer in &self.observers {
            observer.on_result(result);
        }
    }

    /// Failed result for an evaluation whose task did not return in time.
    fn detached_failure(
        &self,
        evaluation_id: String,
        request: EvaluationRequest,
        reason: FailureReason,
        detail: String,
        elapsed: Duration,
    ) -> EvaluationResult {
        let mut record = EvaluationRecord::new(evaluation_id, request);
        if let Err(e) = record.fail(reason, detail.as_str()) {
            tracing::error!(evaluation_id = %record.evaluation_id, error = %e, "Could not fail record");
        }
        self.audit.append(
            AuditEvent::new(
                &record.evaluation_id,
                AuditEventType::EvaluationFailed,
                PIPELINE_AGENT_ID,
                false,
            )
            .company(&record.request.company_id)
            .risk("ERROR")
            .processing_time(elapsed)
            .details(json!({
                "reason": reason,
                "error_message": detail,
            })),
        );
        record.into_result(self.consolidator.policy(), elapsed)
    }
}

impl std::fmt::Debug for RiskPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskPipeline")
            .field("dispatcher", &self.dispatcher)
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn new_evaluation_id() -> String {
    format!("eval_{}", Uuid::new_v4().simple())
}

async fn timed<F: Future>(future: F) -> (F::Output, Duration) {
    let started = Instant::now();
    let output = future.await;
    (output, started.elapsed())
}

fn placeholder_report(report: ConsolidatedReport) -> ConsolidatedReport {
    ConsolidatedReport {
        justification: REPORT_PLACEHOLDER.to_string(),
        contributing_factors: vec!["Información sanitizada por privacidad".to_string()],
        credit_recommendation: "Revisión manual requerida debido a sanitización".to_string(),
        confidence: 0.5,
        ..report
    }
}

/// Serialized name of a unit enum variant.
fn wire_name<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts;
    use crate::testing::{unpaced_dispatcher, Scripted, ScriptedProvider};

    const SAFE: &str = r#"{"es_seguro": true, "texto_sanitizado": "", "detalles": "ok"}"#;

    fn pipeline(provider: Arc<ScriptedProvider>) -> RiskPipeline {
        RiskPipeline::new(
            Arc::new(unpaced_dispatcher(provider)),
            Arc::new(AuditLog::in_memory()),
            &RuntimeConfig::default(),
        )
    }

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(
            PipelineError::SecurityBlocked("x".into()).failure_reason(),
            FailureReason::SecurityBlocked
        );
        assert_eq!(
            PipelineError::Phase(CoreError::InvalidRequest("x".into())).failure_reason(),
            FailureReason::Internal
        );
        assert_eq!(
            PipelineError::Documents(DocumentError::NoDocuments).failure_reason(),
            FailureReason::InvalidRequest
        );
    }

    #[test]
    fn test_placeholder_keeps_score() {
        let report = ConsolidatedReport::from_baseline(
            &credrisk_core::baseline_score(&BaselineInputs::default()),
            &credrisk_core::ScoringPolicy::default(),
            credrisk_core::ScoreSource::BaselineParseFallback,
            None,
        );
        let replaced = placeholder_report(report.clone());
        assert_eq!(replaced.final_score, report.final_score);
        assert_eq!(replaced.risk_level, report.risk_level);
        assert_eq!(replaced.justification, REPORT_PLACEHOLDER);
        assert!(replaced.credit_recommendation.contains("Revisión manual"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_fails_without_model_calls() {
        let provider = Arc::new(ScriptedProvider::new());
        let pipeline = pipeline(provider.clone());

        let result = pipeline.evaluate(EvaluationRequest::new("", "Acme")).await;

        assert_eq!(result.phase, Phase::Failed);
        assert_eq!(result.failure_reason, Some(FailureReason::InvalidRequest));
        assert_eq!(result.final_score, 0);
        assert_eq!(provider.calls(), 0);

        let trail = pipeline.audit_log().trail(&result.evaluation_id);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].event_type, AuditEventType::EvaluationFailed);
        assert_eq!(pipeline.stats().failed_evaluations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_every_transition() {
        #[derive(Default)]
        struct Phases(Mutex<Vec<Phase>>, Mutex<usize>);
        impl EvaluationObserver for Phases {
            fn on_transition(&self, record: &EvaluationRecord) {
                self.0.lock().push(record.phase());
            }
            fn on_result(&self, _result: &EvaluationResult) {
                *self.1.lock() += 1;
            }
        }

        let provider = Arc::new(ScriptedProvider::new());
        provider.route_always(prompts::SANITIZER_SYSTEM_PROMPT, Scripted::reply(SAFE, 5));
        provider.route_always(
            prompts::VALIDATOR_SYSTEM_PROMPT,
            Scripted::reply(r#"{"is_safe": true, "reason": "ok", "confidence": 0.9}"#, 5),
        );
        let observer = Arc::new(Phases::default());
        let pipeline = pipeline(provider).with_observer(observer.clone());

        let result = pipeline.evaluate(EvaluationRequest::new("c-1", "Acme")).await;

        assert_eq!(result.phase, Phase::Completed);
        assert_eq!(
            *observer.0.lock(),
            vec![
                Phase::SecurityValidation,
                Phase::BusinessAnalysis,
                Phase::ScoringConsolidation,
                Phase::Completed
            ]
        );
        assert_eq!(*observer.1.lock(), 1);
    }
}
