//! API key handling.
//!
//! Keys are wrapped in [`secrecy::SecretString`] as soon as they are read and
//! leave the wrapper only where the `api-key` header is set.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a key was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    ProviderSettings,
    Environment,
    Explicit,
}

pub struct ApiKey {
    secret: SecretString,
    origin: KeyOrigin,
}

impl ApiKey {
    pub fn explicit(value: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(value.into()),
            origin: KeyOrigin::Explicit,
        }
    }

    /// Resolve `settings[key]`, then `env_var`.
    pub fn resolve(settings: &JsonValue, key: &str, env_var: &str) -> Result<Self, ProviderError> {
        let (value, origin) = match settings[key].as_str() {
            Some(value) => (value.to_string(), KeyOrigin::ProviderSettings),
            None => match std::env::var(env_var) {
                Ok(value) => (value, KeyOrigin::Environment),
                Err(_) => {
                    return Err(ProviderError::NotConfigured(format!(
                        "API key missing: set provider.settings.{key} or {env_var}"
                    )))
                }
            },
        };
        Ok(Self {
            secret: SecretString::from(value),
            origin,
        })
    }

    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn is_blank(&self) -> bool {
        self.secret.expose_secret().trim().is_empty()
    }

    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("secret", &"[REDACTED]")
            .field("origin", &self.origin)
            .finish()
    }
}
