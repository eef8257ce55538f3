//! Backend lookup by the `provider.type` config key.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Builds one kind of provider from its `provider.settings` block.
pub trait ProviderBackend: Send + Sync {
    /// Value of `provider.type` selecting this backend.
    fn kind(&self) -> &'static str;

    fn build(&self, settings: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Reject settings that would build but can never work.
    fn check(&self, settings: &JsonValue) -> Result<(), ProviderError> {
        self.build(settings).map(|_| ())
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    backends: BTreeMap<&'static str, Arc<dyn ProviderBackend>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every backend compiled into this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::AzureOpenAiBackend));
        registry
    }

    /// Later registrations replace earlier ones of the same kind.
    pub fn register(&mut self, backend: Arc<dyn ProviderBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn build(
        &self,
        kind: &str,
        settings: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let provider = self.backend(kind)?.build(settings)?;
        tracing::debug!(kind, provider = provider.name(), "Built model provider");
        Ok(provider)
    }

    pub fn check(&self, kind: &str, settings: &JsonValue) -> Result<(), ProviderError> {
        self.backend(kind)?.check(settings)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.backends.keys().copied().collect()
    }

    fn backend(&self, kind: &str) -> Result<&Arc<dyn ProviderBackend>, ProviderError> {
        self.backends.get(kind).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "unknown provider type '{kind}' (known: {})",
                self.kinds().join(", ")
            ))
        })
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.backends.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    struct ScriptedBackend;

    impl ProviderBackend for ScriptedBackend {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        fn build(&self, _settings: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
            Ok(Arc::new(ScriptedProvider::new()))
        }
    }

    #[test]
    fn test_registered_backend_builds() {
        let mut registry = ProviderRegistry::with_defaults();
        registry.register(Arc::new(ScriptedBackend));

        assert_eq!(registry.kinds(), vec!["azure-openai", "scripted"]);
        let provider = registry.build("scripted", &serde_json::json!({})).unwrap();
        assert_eq!(provider.name(), "scripted");
        assert!(registry.check("scripted", &JsonValue::Null).is_ok());
    }

    #[test]
    fn test_unknown_kind_lists_known_ones() {
        let registry = ProviderRegistry::with_defaults();
        match registry.build("bedrock", &serde_json::json!({})) {
            Err(ProviderError::NotConfigured(msg)) => {
                assert!(msg.contains("'bedrock'"));
                assert!(msg.contains("azure-openai"));
            }
            other => panic!("expected NotConfigured, got {:?}", other.map(|p| p.name().to_string())),
        }
    }
}
