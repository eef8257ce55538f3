//! Runtime configuration.
//!
//! Every field has a default, so an empty YAML document is a valid config.
//! Durations are written as human strings such as `"60s"` or `"2m"`.
//!
//! ```yaml
//! provider:
//!   type: azure-openai
//!   settings: { api_version: "2024-02-01" }
//! dispatcher:
//!   window: 60s
//!   max_requests_per_window: 40
//!   admission_threshold: 0.8
//!   rate_limit_retry: { max_retries: 8, base_delay: 2s, growth: 1.8, max_delay: 2m }
//! tiers:
//!   fast: o3-mini
//!   capable: gpt-4o
//! pipeline:
//!   deadline: 5m
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use credrisk_core::{GatePolicy, ScoringPolicy};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::dispatcher::ModelTier;

/// Errors loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub provider: ProviderConfig,
    pub dispatcher: DispatcherConfig,
    pub tiers: ModelTiers,
    pub gate: GateConfig,
    pub scoring: ScoringPolicy,
    pub sanitizer: SanitizerConfig,
    pub audit: AuditConfig,
    pub pipeline: PipelineConfig,
}

impl RuntimeConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject values that would stall or disable the dispatcher.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.dispatcher;
        if d.max_requests_per_window == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.max_requests_per_window must be at least 1".into(),
            ));
        }
        if !(d.admission_threshold > 0.0 && d.admission_threshold <= 1.0) {
            return Err(ConfigError::Invalid(
                "dispatcher.admission_threshold must be in (0, 1]".into(),
            ));
        }
        if d.window.is_zero() {
            return Err(ConfigError::Invalid("dispatcher.window must be non-zero".into()));
        }
        for (name, retry) in [("rate_limit_retry", &d.rate_limit_retry), ("transient_retry", &d.transient_retry)] {
            if !(retry.growth.is_finite() && retry.growth >= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "dispatcher.{name}.growth must be finite and >= 1.0"
                )));
            }
        }
        d.pacing.validate()?;
        let s = &self.scoring;
        if s.medium_risk_min > s.low_risk_min {
            return Err(ConfigError::Invalid(
                "scoring.medium_risk_min must not exceed scoring.low_risk_min".into(),
            ));
        }
        Ok(())
    }
}

/// Model provider selection, resolved through `ProviderRegistry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Type-specific settings; missing keys fall back to the environment.
    pub settings: JsonValue,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: "azure-openai".to_string(),
            settings: JsonValue::Object(Default::default()),
        }
    }
}

/// Admission, pacing and retry settings for the model dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Length of the sliding admission window.
    #[serde(with = "duration_str")]
    pub window: Duration,

    /// Physical calls allowed per window.
    pub max_requests_per_window: usize,

    /// Fraction of the cap at which new calls wait for the window to drain.
    pub admission_threshold: f64,

    /// Timeout for one physical call.
    #[serde(with = "duration_str")]
    pub call_timeout: Duration,

    /// Missing keys fall back to `RetryConfig::rate_limit()`.
    #[serde(deserialize_with = "rate_limit_retry")]
    pub rate_limit_retry: RetryConfig,

    /// Missing keys fall back to `RetryConfig::transient()`.
    #[serde(deserialize_with = "transient_retry")]
    pub transient_retry: RetryConfig,

    pub pacing: PacingConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests_per_window: 40,
            admission_threshold: 0.8,
            call_timeout: Duration::from_secs(60),
            rate_limit_retry: RetryConfig::rate_limit(),
            transient_retry: RetryConfig::transient(),
            pacing: PacingConfig::default(),
        }
    }
}

/// Exponential backoff schedule for one failure class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    #[serde(with = "duration_str")]
    pub base_delay: Duration,
    pub growth: f32,
    #[serde(with = "duration_str")]
    pub max_delay: Duration,
}

impl RetryConfig {
    pub fn rate_limit() -> Self {
        Self {
            max_retries: 8,
            base_delay: Duration::from_secs(2),
            growth: 1.8,
            max_delay: Duration::from_secs(120),
        }
    }

    pub fn transient() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            growth: 1.5,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// A retry block as written in YAML, where any key may be left out.
#[derive(Deserialize)]
struct RetryOverrides {
    max_retries: Option<usize>,
    #[serde(default, deserialize_with = "duration_str::deserialize_opt")]
    base_delay: Option<Duration>,
    growth: Option<f32>,
    #[serde(default, deserialize_with = "duration_str::deserialize_opt")]
    max_delay: Option<Duration>,
}

impl RetryOverrides {
    fn over(self, base: RetryConfig) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            base_delay: self.base_delay.unwrap_or(base.base_delay),
            growth: self.growth.unwrap_or(base.growth),
            max_delay: self.max_delay.unwrap_or(base.max_delay),
        }
    }
}

fn rate_limit_retry<'de, D>(deserializer: D) -> Result<RetryConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(RetryOverrides::deserialize(deserializer)?.over(RetryConfig::rate_limit()))
}

fn transient_retry<'de, D>(deserializer: D) -> Result<RetryConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(RetryOverrides::deserialize(deserializer)?.over(RetryConfig::transient()))
}

/// Adaptive pacing between calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    #[serde(with = "duration_str")]
    pub base_delay: Duration,
    /// Pacing sleeps shorter than this are skipped.
    #[serde(with = "duration_str")]
    pub min_sleep: Duration,
    pub min_factor: f64,
    pub max_factor: f64,
    pub speed_up: f64,
    pub slow_down: f64,
    /// Success ratio above which pacing speeds up.
    pub healthy_ratio: f64,
    /// Success ratio below which pacing slows down.
    pub degraded_ratio: f64,
    /// Observation count above which counters decay.
    pub decay_after: u32,
    pub decay: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            min_sleep: Duration::from_millis(100),
            min_factor: 0.5,
            max_factor: 3.0,
            speed_up: 0.9,
            slow_down: 1.2,
            healthy_ratio: 0.9,
            degraded_ratio: 0.7,
            decay_after: 100,
            decay: 0.8,
        }
    }
}

impl PacingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(format!("dispatcher.pacing.{msg}")));

        if !(self.min_factor.is_finite() && self.max_factor.is_finite())
            || self.min_factor <= 0.0
            || self.min_factor > self.max_factor
        {
            return invalid("factors must satisfy 0 < min_factor <= max_factor");
        }
        if !(self.speed_up.is_finite() && self.speed_up > 0.0) {
            return invalid("speed_up must be finite and positive");
        }
        if !(self.slow_down.is_finite() && self.slow_down > 0.0) {
            return invalid("slow_down must be finite and positive");
        }
        if !(self.decay > 0.0 && self.decay <= 1.0) {
            return invalid("decay must be in (0, 1]");
        }
        let ratio = 0.0..=1.0;
        if !ratio.contains(&self.healthy_ratio) || !ratio.contains(&self.degraded_ratio) {
            return invalid("ratios must be in [0, 1]");
        }
        if self.degraded_ratio > self.healthy_ratio {
            return invalid("degraded_ratio must not exceed healthy_ratio");
        }
        Ok(())
    }
}

/// Deployment names per model tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTiers {
    pub fast: String,
    pub capable: String,
}

impl Default for ModelTiers {
    fn default() -> Self {
        Self {
            fast: "o3-mini".to_string(),
            capable: "gpt-4o".to_string(),
        }
    }
}

impl ModelTiers {
    pub fn deployment(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Capable => &self.capable,
        }
    }
}

/// Security gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    #[serde(flatten)]
    pub policy: GatePolicy,
    /// Input fields are truncated to this many characters before validation.
    pub max_field_chars: usize,
    /// Audit events shown to the supervisor.
    pub history_window: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            policy: GatePolicy::default(),
            max_field_chars: 4000,
            history_window: 100,
        }
    }
}

/// Sanitization verdict cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    pub cache_capacity: u64,
    #[serde(with = "duration_str")]
    pub cache_ttl: Duration,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Audit log location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSONL file; `None` keeps events in memory only.
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("audit_log.jsonl")),
        }
    }
}

/// Pipeline-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Caller deadline used by the CLI when none is given on the command line.
    #[serde(with = "duration_str")]
    pub deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(300),
        }
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_is_default() {
        let config = RuntimeConfig::from_yaml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.dispatcher.rate_limit_retry.max_retries, 8);
        assert_eq!(config.dispatcher.transient_retry.max_delay, Duration::from_secs(30));
        assert_eq!(config.tiers.deployment(ModelTier::Capable), "gpt-4o");
    }

    #[test]
    fn test_partial_yaml_with_human_durations() {
        let config = RuntimeConfig::from_yaml_str(
            r#"
provider:
  settings:
    endpoint: https://credrisk.openai.azure.com
dispatcher:
  window: 30s
  max_requests_per_window: 10
  rate_limit_retry:
    max_retries: 2
    base_delay: 500ms
    growth: 2.0
    max_delay: 1m
gate:
  validation_block_confidence: 0.95
  max_field_chars: 1000
scoring:
  labels: { low: LOW, medium: MEDIUM, high: HIGH }
pipeline:
  deadline: 2m
"#,
        )
        .unwrap();

        assert_eq!(config.dispatcher.window, Duration::from_secs(30));
        assert_eq!(config.dispatcher.admission_threshold, 0.8);
        assert_eq!(config.dispatcher.rate_limit_retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.gate.policy.validation_block_confidence, 0.95);
        assert_eq!(config.gate.policy.supervision_block_confidence, 0.9);
        assert_eq!(config.gate.max_field_chars, 1000);
        assert_eq!(config.scoring.labels.low, "LOW");
        assert_eq!(config.pipeline.deadline, Duration::from_secs(120));
        assert_eq!(config.provider.provider_type, "azure-openai");
        assert_eq!(
            config.provider.settings["endpoint"],
            "https://credrisk.openai.azure.com"
        );
    }

    #[test]
    fn test_rejects_zero_cap() {
        let err = RuntimeConfig::from_yaml_str("dispatcher:\n  max_requests_per_window: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_bad_duration() {
        let err = RuntimeConfig::from_yaml_str("dispatcher:\n  window: soon\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_partial_retry_block_keeps_class_defaults() {
        let config = RuntimeConfig::from_yaml_str(
            "dispatcher:\n  transient_retry:\n    max_retries: 1\n  rate_limit_retry:\n    base_delay: 5s\n",
        )
        .unwrap();

        let transient = &config.dispatcher.transient_retry;
        assert_eq!(transient.max_retries, 1);
        assert_eq!(transient.base_delay, Duration::from_secs(2));
        assert_eq!(transient.growth, 1.5);
        assert_eq!(transient.max_delay, Duration::from_secs(30));

        let rate_limit = &config.dispatcher.rate_limit_retry;
        assert_eq!(rate_limit.max_retries, 8);
        assert_eq!(rate_limit.base_delay, Duration::from_secs(5));
        assert_eq!(rate_limit.growth, 1.8);
        assert_eq!(rate_limit.max_delay, Duration::from_secs(120));
    }

    #[test]
    fn test_rejects_bad_pacing() {
        for yaml in [
            "dispatcher:\n  pacing:\n    slow_down: -1.0\n",
            "dispatcher:\n  pacing:\n    speed_up: .nan\n",
            "dispatcher:\n  pacing:\n    max_factor: .inf\n",
            "dispatcher:\n  pacing:\n    decay: 0.0\n",
            "dispatcher:\n  pacing:\n    decay: 1.5\n",
            "dispatcher:\n  pacing:\n    healthy_ratio: 0.5\n    degraded_ratio: 0.6\n",
            "dispatcher:\n  pacing:\n    healthy_ratio: 1.2\n",
            "dispatcher:\n  transient_retry:\n    growth: .inf\n",
        ] {
            let err = RuntimeConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "accepted {yaml:?}");
        }
    }

    #[test]
    fn test_yaml_roundtrip_keeps_durations_readable() {
        let yaml = serde_yaml::to_string(&RuntimeConfig::default()).unwrap();
        assert!(yaml.contains("window: 1m"));
        assert_eq!(RuntimeConfig::from_yaml_str(&yaml).unwrap(), RuntimeConfig::default());
    }
}
