//! Tolerant JSON extraction from model output.
//!
//! Model responses are expected to be a single JSON object but often arrive
//! wrapped in a markdown fence or surrounded by commentary. Parsing happens
//! in two stages:
//!
//! 1. **Structural extraction**: trim, strip a code fence, then take the
//!    first balanced `{ ... }` substring.
//! 2. **Typed decode**: deserialize into a fixed schema whose fields carry
//!    serde defaults, so missing keys never fail the decode.
//!
//! A decode failure is never fatal on its own. Callers fall back to the
//! lexical heuristics in [`crate::analysis`].

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors from structural extraction or typed decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no JSON object found in model output")]
    NoObject,

    #[error("JSON decode failed: {0}")]
    Decode(String),
}

/// Strip a surrounding markdown code fence, if present.
///
/// Handles both ```` ```json ```` and bare ```` ``` ```` openers, and fences
/// that appear after leading commentary.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };

    let after_open = &trimmed[open + 3..];
    // Skip the info string ("json", "JSON", ...) up to the end of the line.
    let body_start = match after_open.find('\n') {
        Some(nl) if after_open[..nl].chars().all(|c| c.is_ascii_alphanumeric()) => nl + 1,
        _ => 0,
    };
    let body = &after_open[body_start..];

    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Locate the first balanced JSON object in `text`.
///
/// Braces inside string literals are ignored. When the object is truncated
/// and never balances, the span from the first `{` to the last `}` is
/// returned instead.
pub fn extract_object(text: &str) -> Result<&str, ExtractError> {
    let text = strip_code_fence(text);
    let start = text.find('{').ok_or(ExtractError::NoObject)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    match text.rfind('}') {
        Some(end) if end > start => Ok(&text[start..=end]),
        _ => Err(ExtractError::NoObject),
    }
}

/// Extract and decode a JSON object into `T`.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let object = extract_object(text)?;
    serde_json::from_str(object).map_err(|e| {
        tracing::debug!(error = %e, len = object.len(), "Model payload did not decode");
        ExtractError::Decode(e.to_string())
    })
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
