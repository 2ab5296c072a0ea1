//! Classification of dispatch results.
//!
//! Every HTTP exchange collapses into one [`Outcome`]; the retry policies in
//! [`crate::api::retry`] and the job scheduler decide what to do with it. The
//! status code alone is not enough: the upstream reuses 400 and 403 for
//! several distinct conditions and distinguishes them only in the body text.

use crate::error::{extract_api_message, ApiError};

/// Markers that identify a 403 as "out of pollen" rather than a plain
/// permission failure.
const BALANCE_MARKERS: [&str; 4] = ["FORBIDDEN", "balance", "Insufficient", "pollen"];

/// Markers that identify a 400 as a content-safety rejection.
const SAFETY_MARKERS: [&str; 4] = [
    "IMAGE_PROHIBITED_CONTENT",
    "PROHIBITED_CONTENT",
    "safety",
    "Bad Request",
];

/// Markers that identify a 5xx as a resolution-limit rejection, which must
/// never be retried.
const RESOLUTION_MARKERS: [&str; 2] = ["exceeds limit", "value_error"];

/// The classified result of a single dispatch attempt.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// 2xx with the generated payload.
    Success(Vec<u8>),
    /// The safety filter rejected the prompt; retryable under the persistent
    /// safety policy with a fresh seed.
    ContentFiltered,
    /// 429; retryable with doubled backoff.
    RateLimited,
    /// 5xx that looks transient; retryable with backoff.
    TransientServer { status: u16, message: String },
    /// 401; terminal.
    AuthFailed(String),
    /// 402, or 403 with a balance marker; triggers credential rotation.
    BalanceExhausted(String),
    /// Any other client error; terminal.
    FatalClient { status: u16, message: String },
    /// The request never produced an HTTP response.
    NetworkError(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Convert a non-success outcome into its terminal error form. Success
    /// maps to a generic error so callers never silently drop a payload.
    pub fn into_error(self) -> ApiError {
        match self {
            Outcome::Success(_) => ApiError::Request("unexpected success outcome".into()),
            Outcome::ContentFiltered => ApiError::Safety,
            Outcome::RateLimited => ApiError::RateLimited,
            Outcome::TransientServer { status, message } => ApiError::Server { status, message },
            Outcome::AuthFailed(message) => ApiError::Auth(message),
            Outcome::BalanceExhausted(message) => ApiError::Balance(message),
            Outcome::FatalClient { status, message } => {
                if contains_any(&message, &RESOLUTION_MARKERS) {
                    ApiError::ResolutionLimit
                } else {
                    ApiError::Request(format!("{status}: {message}"))
                }
            }
            Outcome::NetworkError(message) => ApiError::Network(message),
        }
    }
}

fn contains_any(body: &str, markers: &[&str]) -> bool {
    let lower = body.to_lowercase();
    markers.iter().any(|m| lower.contains(&m.to_lowercase()))
}

/// Classify an HTTP response into an [`Outcome`].
///
/// The body is reduced to its innermost message before marker matching so
/// that nested JSON envelopes do not hide the signal.
pub fn classify(status: u16, body: &str) -> Outcome {
    let message = extract_api_message(body);

    match status {
        200..=299 => Outcome::Success(body.as_bytes().to_vec()),
        401 => Outcome::AuthFailed(message),
        402 => Outcome::BalanceExhausted(message),
        403 => {
            if contains_any(&message, &BALANCE_MARKERS) {
                Outcome::BalanceExhausted(message)
            } else {
                Outcome::FatalClient { status, message }
            }
        }
        429 => Outcome::RateLimited,
        400 => {
            if contains_any(&message, &SAFETY_MARKERS) {
                Outcome::ContentFiltered
            } else {
                Outcome::FatalClient { status, message }
            }
        }
        500 | 502 | 503 => {
            // A resolution-limit rejection sometimes surfaces as a 500; it
            // will fail identically on every retry.
            if contains_any(&message, &RESOLUTION_MARKERS) {
                Outcome::FatalClient { status, message }
            } else {
                Outcome::TransientServer { status, message }
            }
        }
        _ => Outcome::FatalClient { status, message },
    }
}
