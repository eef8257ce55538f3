//! # credrisk-runtime
//!
//! LLM-backed evaluation pipeline for SME credit risk.
//!
//! This crate wires the deterministic pieces of `credrisk-core` to a model
//! service. Every model call goes through one shared [`ModelDispatcher`],
//! which applies admission control, adaptive pacing and classified retries.
//!
//! ## Pipeline
//!
//! 1. Security gate: audit supervision, then per-field input validation
//! 2. Business analysis: financial, reputational and behavioral branches run
//!    concurrently and are sanitized
//! 3. Scoring consolidation: deterministic baseline refined by the model,
//!    then a final sanitization
//!
//! A finished evaluation can be re-scored under a what-if scenario with
//! `RiskPipeline::simulate_scenario`.
//!
//! Every step is written to the [`AuditLog`]. Callers always receive an
//! `EvaluationResult`, never an error.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use credrisk_core::EvaluationRequest;
//! use credrisk_runtime::{AzureOpenAiProvider, RiskPipeline, RuntimeConfig};
//!
//! let config = RuntimeConfig::default();
//! let provider = Arc::new(AzureOpenAiProvider::from_env()?);
//! let pipeline = RiskPipeline::from_config(provider, &config);
//!
//! let request = EvaluationRequest::new("c-001", "Ferretería Andina")
//!     .with_financial_statements("Activos 1.2M, pasivos 400k");
//! let result = pipeline.evaluate(request).await;
//! println!("{} ({})", result.final_score, result.risk_label);
//! ```

pub mod agents;
pub mod audit_log;
pub mod cache;
pub mod config;
pub mod consolidation;
pub mod dispatcher;
pub mod documents;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod scenario;
pub mod security;
pub mod testing;

pub use audit_log::AuditLog;
pub use config::{ConfigError, RuntimeConfig};
pub use dispatcher::{
    DispatchError, DispatcherStats, FailureClass, ModelDispatcher, ModelRequest, ModelResponse,
    ModelTier,
};
pub use documents::{
    build_financial_text, DocumentError, DocumentExtractor, ExtractedDocuments, PlainTextExtractor,
};
pub use orchestrator::{
    EvaluationObserver, HealthReport, PipelineError, PipelineStats, RiskPipeline,
};
pub use scenario::ScenarioSimulator;
pub use providers::{
    AzureOpenAiProvider, AzureSettings, LlmProvider, ProviderError, ProviderRegistry,
};
