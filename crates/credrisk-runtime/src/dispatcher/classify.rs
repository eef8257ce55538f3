//! Failure classification for provider errors.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::providers::ProviderError;

/// How the dispatcher treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Throttled by the service; retried on the long schedule.
    RateLimited,
    /// Network or server trouble; retried on the short schedule.
    Transient,
    /// Never retried.
    Fatal,
}

const RATE_LIMIT_INDICATORS: &[&str] = &[
    "rate limit",
    "429",
    "quota",
    "too many requests",
    "requests per minute",
    "throttled",
    "exceeded call rate limit",
];

const TRANSIENT_INDICATORS: &[&str] = &[
    "timeout",
    "connection",
    "network",
    "502",
    "503",
    "504",
    "internal server error",
    "service unavailable",
    "gateway timeout",
];

lazy_static! {
    static ref RETRY_HINTS: [Regex; 3] = [
        Regex::new(r"(?i)retry after (\d+) seconds?").unwrap(),
        Regex::new(r"(?i)please retry after (\d+) seconds?").unwrap(),
        Regex::new(r"(?i)wait (\d+) seconds?").unwrap(),
    ];
}

/// Classify a provider error, preferring structured signals over message text.
pub fn classify(error: &ProviderError) -> FailureClass {
    match error {
        ProviderError::RateLimited { .. } => FailureClass::RateLimited,
        ProviderError::ApiError { status: 429, .. } => FailureClass::RateLimited,
        ProviderError::ApiError { status, .. } if (500..600).contains(status) => {
            FailureClass::Transient
        }
        ProviderError::Timeout(_) | ProviderError::HttpError(_) => FailureClass::Transient,
        ProviderError::AuthError | ProviderError::NotConfigured(_) => FailureClass::Fatal,
        other => classify_message(&other.to_string()),
    }
}

/// Classify free error text by indicator substrings.
pub fn classify_message(message: &str) -> FailureClass {
    let lowered = message.to_lowercase();
    if RATE_LIMIT_INDICATORS.iter().any(|i| lowered.contains(i)) {
        FailureClass::RateLimited
    } else if TRANSIENT_INDICATORS.iter().any(|i| lowered.contains(i)) {
        FailureClass::Transient
    } else {
        FailureClass::Fatal
    }
}

/// Server-suggested wait, from a structured `Retry-After` or the message.
pub fn retry_after_hint(error: &ProviderError) -> Option<Duration> {
    if let ProviderError::RateLimited {
        retry_after: Some(after),
    } = error
    {
        return Some(*after);
    }

    let message = error.to_string();
    RETRY_HINTS.iter().find_map(|re| {
        re.captures(&message)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(Duration::from_secs)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_signals_win() {
        assert_eq!(
            classify(&ProviderError::RateLimited { retry_after: None }),
            FailureClass::RateLimited
        );
        assert_eq!(
            classify(&ProviderError::ApiError { status: 503, message: "busy".into() }),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&ProviderError::Timeout(Duration::from_secs(5))),
            FailureClass::Transient
        );
        assert_eq!(classify(&ProviderError::AuthError), FailureClass::Fatal);
    }

    #[test]
    fn test_message_indicators() {
        assert_eq!(
            classify(&ProviderError::ApiError {
                status: 400,
                message: "Requests to the deployment have exceeded call rate limit".into()
            }),
            FailureClass::RateLimited
        );
        assert_eq!(classify_message("Quota exhausted for tier"), FailureClass::RateLimited);
        assert_eq!(classify_message("Connection reset by peer"), FailureClass::Transient);
        assert_eq!(classify_message("Gateway Timeout"), FailureClass::Transient);
        assert_eq!(classify_message("content filter triggered"), FailureClass::Fatal);
    }

    #[test]
    fn test_parse_error_is_fatal_unless_text_says_otherwise() {
        assert_eq!(
            classify(&ProviderError::ParseError("expected value at line 1".into())),
            FailureClass::Fatal
        );
    }

    #[test]
    fn test_retry_after_hints() {
        assert_eq!(
            retry_after_hint(&ProviderError::RateLimited { retry_after: Some(Duration::from_secs(7)) }),
            Some(Duration::from_secs(7))
        );
        assert_eq!(
            retry_after_hint(&ProviderError::ApiError {
                status: 429,
                message: "Please retry after 12 seconds.".into()
            }),
            Some(Duration::from_secs(12))
        );
        assert_eq!(
            retry_after_hint(&ProviderError::HttpError("wait 1 second".into())),
            Some(Duration::from_secs(1))
        );
        assert_eq!(retry_after_hint(&ProviderError::AuthError), None);
    }
}
