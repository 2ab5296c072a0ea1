//! Error types for the Hibiscus generation pipeline.
//!
//! The upstream API reports most failures as free-form text bodies, so the
//! pipeline carries a structured [`ApiError`] internally and maps it onto the
//! closed [`ErrorKind`] taxonomy for user-facing classification. All of the
//! fragile string sniffing lives in this module.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for Hibiscus operations.
#[derive(Error, Debug)]
pub enum HibiscusError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Generation API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Errors surfaced by the dispatch/retry layers.
///
/// Variants are terminal from the retry engine's point of view: transient
/// outcomes only become an `ApiError` once their retry budget is spent.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// HTTP 401 — credential missing or rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP 402, or 403 with a balance marker, after credential rotation
    /// was exhausted
    #[error("balance exhausted: {0}")]
    Balance(String),

    /// Upstream content safety filter rejected the prompt
    #[error("blocked by the content safety filter")]
    Safety,

    /// HTTP 429 after the retry budget was spent
    #[error("rate limited: too many requests")]
    RateLimited,

    /// 5xx after the retry budget was spent
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Connection-level failure after the retry budget was spent
    #[error("network error: {0}")]
    Network(String),

    /// Requested dimensions exceed the model's pixel budget — never retryable
    #[error("requested resolution exceeds the model limit")]
    ResolutionLimit,

    /// The persistent safety-retry loop ran out of attempts
    #[error("safety retries exhausted after {attempts} attempts")]
    SafetyRetriesExhausted { attempts: u32 },

    /// Wall-clock deadline hit (video generation only)
    #[error("generation timed out after {}s", timeout.as_secs())]
    Timeout { timeout: Duration },

    /// Any other non-retryable client error
    #[error("request failed: {0}")]
    Request(String),
}

/// Closed set of user-facing failure classifications.
///
/// This is what the UI layer switches on to pick a remedy message; the raw
/// upstream body never reaches the user directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Auth,
    Balance,
    Safety,
    RateLimited,
    TransientServer,
    Network,
    ResolutionLimit,
    Cancelled,
    ExhaustedRetries,
    Generic,
}

impl ApiError {
    /// Structural classification, before any message sniffing.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Auth(_) => ErrorKind::Auth,
            ApiError::Balance(_) => ErrorKind::Balance,
            ApiError::Safety => ErrorKind::Safety,
            ApiError::RateLimited => ErrorKind::RateLimited,
            ApiError::Server { .. } => ErrorKind::TransientServer,
            ApiError::Network(_) => ErrorKind::Network,
            ApiError::ResolutionLimit => ErrorKind::ResolutionLimit,
            ApiError::SafetyRetriesExhausted { .. } => ErrorKind::ExhaustedRetries,
            ApiError::Timeout { .. } => ErrorKind::Generic,
            ApiError::Request(_) => ErrorKind::Generic,
        }
    }
}

/// Classify a terminal [`ApiError`] for display, refining generic variants by
/// inspecting the embedded upstream message.
pub fn classify_failure(error: &ApiError) -> ErrorKind {
    match error.kind() {
        ErrorKind::Generic => match error {
            ApiError::Request(raw) => classify_message(raw),
            _ => ErrorKind::Generic,
        },
        ErrorKind::TransientServer => {
            if let ApiError::Server { message, .. } = error {
                match classify_message(message) {
                    ErrorKind::ResolutionLimit => ErrorKind::ResolutionLimit,
                    _ => ErrorKind::TransientServer,
                }
            } else {
                ErrorKind::TransientServer
            }
        }
        kind => kind,
    }
}

/// Map a raw upstream error body onto the closed taxonomy.
///
/// Substring matching against known upstream phrasings; kept in one place so
/// it can be tested against a fixture set of real error bodies.
pub fn classify_message(raw: &str) -> ErrorKind {
    let lower = extract_api_message(raw).to_lowercase();

    if lower.contains("exceeds limit")
        || lower.contains("resolution too high")
        || (lower.contains("value_error") && lower.contains("pixels"))
    {
        ErrorKind::ResolutionLimit
    } else if lower.contains("prohibited_content")
        || lower.contains("safety")
        || lower.contains("content rejected")
        || lower.contains("nsfw")
        || lower.contains("filtered")
    {
        ErrorKind::Safety
    } else if lower.contains("unauthorized")
        || lower.contains("401")
        || lower.contains("invalid api key")
    {
        ErrorKind::Auth
    } else if lower.contains("balance")
        || lower.contains("pollen")
        || lower.contains("402")
        || lower.contains("insufficient")
    {
        ErrorKind::Balance
    } else if lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("429")
    {
        ErrorKind::RateLimited
    } else {
        ErrorKind::Generic
    }
}

/// Pull a human-readable message out of a (possibly deeply nested) JSON error
/// body. The API wraps errors in up to several layers of `{"message": ...}` /
/// `{"error": ...}`, sometimes with JSON re-encoded as a string.
pub fn extract_api_message(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    let Ok(mut value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return trimmed.to_string();
    };

    for _ in 0..5 {
        if let Some(message) = value.get("message") {
            if let Some(text) = message.as_str() {
                if text.trim_start().starts_with('{') {
                    if let Ok(inner) = serde_json::from_str::<serde_json::Value>(text) {
                        value = inner;
                        continue;
                    }
                }
                return text.to_string();
            }
        }
        match value.get("error") {
            Some(serde_json::Value::String(text)) => return text.clone(),
            Some(inner @ serde_json::Value::Object(_)) => {
                value = inner.clone();
                continue;
            }
            _ => break,
        }
    }

    trimmed.to_string()
}

/// Convenience type alias for Hibiscus results.
pub type Result<T> = std::result::Result<T, HibiscusError>;

/// Convenience type alias for API-layer results.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ApiError::Auth("nope".into()).kind(), ErrorKind::Auth);
        assert_eq!(ApiError::Safety.kind(), ErrorKind::Safety);
        assert_eq!(
            ApiError::SafetyRetriesExhausted { attempts: 50 }.kind(),
            ErrorKind::ExhaustedRetries
        );
        assert_eq!(
            ApiError::Server {
                status: 503,
                message: "unavailable".into()
            }
            .kind(),
            ErrorKind::TransientServer
        );
    }

    #[test]
    fn test_classify_resolution_limit() {
        assert_eq!(
            classify_message("requested size exceeds limit for this model"),
            ErrorKind::ResolutionLimit
        );
        assert_eq!(
            classify_message("value_error: too many pixels"),
            ErrorKind::ResolutionLimit
        );
    }

    #[test]
    fn test_classify_safety_phrases() {
        assert_eq!(
            classify_message("IMAGE_PROHIBITED_CONTENT detected"),
            ErrorKind::Safety
        );
        assert_eq!(classify_message("content rejected by filter"), ErrorKind::Safety);
    }

    #[test]
    fn test_classify_balance_and_auth() {
        assert_eq!(
            classify_message("Insufficient pollen for request"),
            ErrorKind::Balance
        );
        assert_eq!(classify_message("invalid api key supplied"), ErrorKind::Auth);
    }

    #[test]
    fn test_classify_unknown_is_generic() {
        assert_eq!(classify_message("something odd happened"), ErrorKind::Generic);
    }

    #[test]
    fn test_extract_nested_json_message() {
        let raw = r#"{"error": {"message": "model flux is overloaded"}}"#;
        assert_eq!(extract_api_message(raw), "model flux is overloaded");
    }

    #[test]
    fn test_extract_double_encoded_message() {
        let raw = r#"{"message": "{\"message\": \"inner detail\"}"}"#;
        assert_eq!(extract_api_message(raw), "inner detail");
    }

    #[test]
    fn test_extract_plain_text_passthrough() {
        assert_eq!(extract_api_message("  plain failure  "), "plain failure");
    }

    #[test]
    fn test_classify_failure_refines_server_errors() {
        let err = ApiError::Server {
            status: 500,
            message: "image size exceeds limit".into(),
        };
        assert_eq!(classify_failure(&err), ErrorKind::ResolutionLimit);

        let err = ApiError::Server {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(classify_failure(&err), ErrorKind::TransientServer);
    }
}
