//! credrisk - SME credit-risk evaluation CLI
//!
//! ## Commands
//!
//! - `evaluate`: run one evaluation from a JSON request and print the result
//! - `audit`: print audit events from a JSONL audit log

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use credrisk_core::{EvaluationRequest, Phase};
use credrisk_runtime::config::ModelTiers;
use credrisk_runtime::{AuditLog, AzureSettings, ProviderRegistry, RiskPipeline, RuntimeConfig};

#[derive(Parser)]
#[command(name = "credrisk")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LLM-assisted credit-risk evaluation for SMEs", long_about = None)]
struct Cli {
    /// Enable debug logging when RUST_LOG is not set
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one company and print the result as JSON
    Evaluate {
        /// Evaluation request (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Runtime configuration (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Audit log file, overriding the configuration
        #[arg(long)]
        audit_log: Option<PathBuf>,

        /// Caller deadline, e.g. "90s" or "5m"
        #[arg(long, value_parser = humantime::parse_duration)]
        deadline: Option<Duration>,

        /// Financial documents to extract into the financial statements
        #[arg(long, num_args = 1..)]
        documents: Vec<PathBuf>,
    },

    /// Print audit events
    Audit {
        /// Audit log file (JSONL)
        #[arg(long, default_value = "audit_log.jsonl")]
        audit_log: PathBuf,

        /// Only events of this evaluation
        #[arg(short, long)]
        evaluation_id: Option<String>,

        /// Maximum number of recent events when no evaluation is given
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },
}

fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    // Logs go to stderr so stdout stays machine-readable.
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json_logs, level);

    match cli.command {
        Commands::Evaluate {
            input,
            config,
            audit_log,
            deadline,
            documents,
        } => {
            let failed = evaluate(&input, config.as_deref(), audit_log, deadline, &documents).await?;
            if failed {
                std::process::exit(2);
            }
        }
        Commands::Audit {
            audit_log,
            evaluation_id,
            limit,
        } => print_audit(&audit_log, evaluation_id.as_deref(), limit)?,
    }

    Ok(())
}

/// Run one evaluation. Returns whether it ended in `FAILED`.
async fn evaluate(
    input: &Path,
    config_path: Option<&Path>,
    audit_log: Option<PathBuf>,
    deadline: Option<Duration>,
    documents: &[PathBuf],
) -> Result<bool> {
    let mut config = match config_path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if audit_log.is_some() {
        config.audit.path = audit_log;
    }
    apply_deployments(&mut config);

    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read request {}", input.display()))?;
    let request: EvaluationRequest =
        serde_json::from_str(&raw).context("Request is not a valid evaluation request")?;

    let registry = ProviderRegistry::with_defaults();
    let provider = registry
        .build(&config.provider.provider_type, &config.provider.settings)
        .with_context(|| {
            format!(
                "Failed to create provider '{}' (available: {})",
                config.provider.provider_type,
                registry.kinds().join(", ")
            )
        })?;

    let pipeline = Arc::new(RiskPipeline::from_config(provider, &config));
    let request = if documents.is_empty() {
        request
    } else {
        pipeline
            .attach_documents(request, documents)
            .await
            .context("Failed to extract documents")?
    };

    let deadline = deadline.unwrap_or(config.pipeline.deadline);
    let result = pipeline.evaluate_with_deadline(request, deadline).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    tracing::info!(
        evaluation_id = %result.evaluation_id,
        phase = %result.phase,
        score = result.final_score,
        risk = %result.risk_label,
        "Evaluation finished"
    );
    Ok(result.phase == Phase::Failed)
}

/// Take tier deployments from the Azure settings unless the config names them.
fn apply_deployments(config: &mut RuntimeConfig) {
    if config.provider.provider_type != "azure-openai" || config.tiers != ModelTiers::default() {
        return;
    }
    if let Ok(settings) = AzureSettings::from_config_or_env(&config.provider.settings) {
        config.tiers = ModelTiers {
            fast: settings.deployment_mini,
            capable: settings.deployment,
        };
    }
}

fn print_audit(path: &Path, evaluation_id: Option<&str>, limit: usize) -> Result<()> {
    if !path.exists() {
        bail!("Audit log not found: {}", path.display());
    }
    let log = AuditLog::open(path);
    let events = match evaluation_id {
        Some(id) => log.trail(id),
        None => log.recent(limit),
    };
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    tracing::debug!(count = events.len(), "Printed audit events");
    Ok(())
}
