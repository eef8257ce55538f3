//! Azure OpenAI chat-completions backend.
//!
//! Calls go to
//! `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={version}`
//! with the key in the `api-key` header. The deployment comes from
//! [`CallParams::deployment`], so one provider serves both model tiers.
//!
//! Without the `azure-openai` feature the provider still builds from settings
//! but every completion fails with [`ProviderError::NotConfigured`].

#![cfg_attr(not(feature = "azure-openai"), allow(dead_code))]

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::factory::ProviderBackend;
use super::secrets::ApiKey;
use super::{CallParams, ChatMessage, Completion, LlmProvider, ProviderError, TokenUsage};

pub const AZURE_OPENAI_ENDPOINT_ENV: &str = "AZURE_OPENAI_ENDPOINT";
pub const AZURE_OPENAI_API_KEY_ENV: &str = "AZURE_OPENAI_API_KEY";
pub const AZURE_OPENAI_API_VERSION_ENV: &str = "AZURE_OPENAI_API_VERSION";
pub const AZURE_OPENAI_DEPLOYMENT_ENV: &str = "AZURE_OPENAI_DEPLOYMENT";
pub const AZURE_OPENAI_DEPLOYMENT_MINI_ENV: &str = "AZURE_OPENAI_DEPLOYMENT_MINI";

const DEFAULT_API_VERSION: &str = "2024-02-01";
const DEFAULT_DEPLOYMENT: &str = "gpt-4o";
const DEFAULT_DEPLOYMENT_MINI: &str = "o3-mini";

/// Non-secret connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureSettings {
    pub endpoint: String,
    pub api_version: String,
    /// Deployment serving the capable tier.
    pub deployment: String,
    /// Deployment serving the fast tier.
    pub deployment_mini: String,
}

impl AzureSettings {
    /// Each key is read from `settings`, then its `AZURE_OPENAI_*` variable,
    /// then a default. Only the endpoint has no default.
    pub fn from_config_or_env(settings: &JsonValue) -> Result<Self, ProviderError> {
        let endpoint = lookup(settings, "endpoint", AZURE_OPENAI_ENDPOINT_ENV).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Azure endpoint missing: set provider.settings.endpoint or {AZURE_OPENAI_ENDPOINT_ENV}"
            ))
        })?;
        let or_default = |key: &str, env_var: &str, default: &str| {
            lookup(settings, key, env_var).unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: or_default("api_version", AZURE_OPENAI_API_VERSION_ENV, DEFAULT_API_VERSION),
            deployment: or_default("deployment", AZURE_OPENAI_DEPLOYMENT_ENV, DEFAULT_DEPLOYMENT),
            deployment_mini: or_default(
                "deployment_mini",
                AZURE_OPENAI_DEPLOYMENT_MINI_ENV,
                DEFAULT_DEPLOYMENT_MINI,
            ),
        })
    }

    fn completions_url(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{deployment}/chat/completions?api-version={}",
            self.endpoint, self.api_version
        )
    }
}

fn lookup(settings: &JsonValue, key: &str, env_var: &str) -> Option<String> {
    settings[key]
        .as_str()
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok())
        .filter(|v| !v.trim().is_empty())
}

#[derive(Debug)]
pub struct AzureOpenAiProvider {
    key: ApiKey,
    settings: AzureSettings,
}

impl AzureOpenAiProvider {
    pub fn new(api_key: impl Into<String>, settings: AzureSettings) -> Self {
        Self {
            key: ApiKey::explicit(api_key),
            settings,
        }
    }

    /// Build from a `provider.settings` block with environment fallback.
    pub fn from_config(settings: &JsonValue) -> Result<Self, ProviderError> {
        Ok(Self {
            key: ApiKey::resolve(settings, "api_key", AZURE_OPENAI_API_KEY_ENV)?,
            settings: AzureSettings::from_config_or_env(settings)?,
        })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_config(&JsonValue::Null)
    }

    pub fn settings(&self) -> &AzureSettings {
        &self.settings
    }

    #[cfg(feature = "azure-openai")]
    fn client() -> &'static reqwest::Client {
        static CLIENT: std::sync::OnceLock<reqwest::Client> = std::sync::OnceLock::new();
        CLIENT.get_or_init(reqwest::Client::new)
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// `{"error": {"message": ...}}` body of a failed call.
#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    message: String,
}

impl WireResponse {
    fn into_completion(self, requested: &str) -> Result<Completion, ProviderError> {
        let usage = self.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });
        let Some(choice) = self.choices.into_iter().next() else {
            return Err(ProviderError::ParseError("no choices in completion".to_string()));
        };
        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            usage,
            deployment: if self.model.is_empty() {
                requested.to_string()
            } else {
                self.model
            },
            finish_reason: choice.finish_reason,
        })
    }
}

/// Parse a `retry-after` header given in whole seconds.
fn retry_after_secs(value: &str) -> Option<std::time::Duration> {
    value.trim().parse::<u64>().ok().map(std::time::Duration::from_secs)
}

#[async_trait]
impl LlmProvider for AzureOpenAiProvider {
    #[cfg(feature = "azure-openai")]
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CallParams,
    ) -> Result<Completion, ProviderError> {
        let body = WireRequest {
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let response = Self::client()
            .post(self.settings.completions_url(&params.deployment))
            .header("api-key", self.key.expose())
            .timeout(params.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| match e.is_timeout() {
                true => ProviderError::Timeout(params.timeout),
                false => ProviderError::HttpError(e.to_string()),
            })?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {}
            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(retry_after_secs);
                return Err(ProviderError::RateLimited { retry_after });
            }
            401 | 403 => return Err(ProviderError::AuthError),
            _ => {
                let raw = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<WireError>(&raw)
                    .map(|e| e.error.message)
                    .unwrap_or(raw);
                return Err(ProviderError::ApiError { status, message });
            }
        }

        response
            .json::<WireResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?
            .into_completion(&params.deployment)
    }

    #[cfg(not(feature = "azure-openai"))]
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _params: &CallParams,
    ) -> Result<Completion, ProviderError> {
        Err(ProviderError::NotConfigured(
            "built without the 'azure-openai' feature".to_string(),
        ))
    }

    async fn health_check(&self) -> bool {
        !self.key.is_blank() && !self.settings.endpoint.is_empty()
    }

    fn name(&self) -> &str {
        "azure-openai"
    }
}

/// `provider.type: azure-openai`.
///
/// ```yaml
/// provider:
///   type: azure-openai
///   settings:
///     endpoint: https://my-resource.openai.azure.com
///     api_version: "2024-02-01"
///     deployment: gpt-4o
///     deployment_mini: o3-mini
/// ```
///
/// `api_key` is normally left to `AZURE_OPENAI_API_KEY`.
pub struct AzureOpenAiBackend;

impl ProviderBackend for AzureOpenAiBackend {
    fn kind(&self) -> &'static str {
        "azure-openai"
    }

    fn build(&self, settings: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(AzureOpenAiProvider::from_config(settings)?))
    }

    fn check(&self, settings: &JsonValue) -> Result<(), ProviderError> {
        let provider = AzureOpenAiProvider::from_config(settings)?;
        let endpoint = &provider.settings.endpoint;
        if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
            return Err(ProviderError::NotConfigured(format!(
                "endpoint '{endpoint}' is not an http(s) URL"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AzureSettings {
        AzureSettings::from_config_or_env(&serde_json::json!({
            "endpoint": "https://credrisk.openai.azure.com/",
            "api_version": "2024-06-01",
            "deployment": "gpt-4o-prod",
            "deployment_mini": "mini-prod"
        }))
        .unwrap()
    }

    #[test]
    fn test_completions_url_trims_endpoint_slash() {
        assert_eq!(
            settings().completions_url("gpt-4o-prod"),
            "https://credrisk.openai.azure.com/openai/deployments/gpt-4o-prod/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn test_from_config_reads_tier_deployments() {
        let provider = AzureOpenAiProvider::from_config(&serde_json::json!({
            "endpoint": "https://x.openai.azure.com",
            "api_key": "k",
            "deployment": "big",
            "deployment_mini": "small"
        }))
        .unwrap();
        assert_eq!(provider.settings().deployment, "big");
        assert_eq!(provider.settings().deployment_mini, "small");
    }

    #[test]
    fn test_backend_rejects_endpoint_without_scheme() {
        let result = AzureOpenAiBackend.check(&serde_json::json!({
            "api_key": "k",
            "endpoint": "credrisk.openai.azure.com"
        }));
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn test_debug_output_hides_key() {
        let secret = "azure-super-secret-key-12345";
        let debug = format!("{:?}", AzureOpenAiProvider::new(secret, settings()));
        assert!(!debug.contains(secret));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_health_check_needs_a_key() {
        assert!(AzureOpenAiProvider::new("k", settings()).health_check().await);
        assert!(!AzureOpenAiProvider::new(" ", settings()).health_check().await);
    }

    #[test]
    fn test_wire_response_to_completion() {
        let body = r#"{
            "model": "gpt-4o-2024-08-06",
            "choices": [{"message": {"role": "assistant", "content": "{\"ok\": true}"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        }"#;
        let completion = serde_json::from_str::<WireResponse>(body)
            .unwrap()
            .into_completion("gpt-4o")
            .unwrap();
        assert_eq!(completion.text, "{\"ok\": true}");
        assert_eq!(completion.usage.total(), 150);
        assert_eq!(completion.deployment, "gpt-4o-2024-08-06");
    }

    #[test]
    fn test_empty_choices_is_a_parse_error() {
        let response: WireResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            response.into_completion("gpt-4o"),
            Err(ProviderError::ParseError(_))
        ));
    }

    #[test]
    fn test_retry_after_seconds() {
        assert_eq!(retry_after_secs(" 7 "), Some(std::time::Duration::from_secs(7)));
        assert_eq!(retry_after_secs("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
