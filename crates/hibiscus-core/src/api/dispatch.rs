//! Request dispatch.
//!
//! [`Dispatch`] is the single seam between the retry/scheduling machinery and
//! the network. Production code uses [`HttpDispatcher`]; tests substitute a
//! scripted stub so retry behavior can be exercised without sockets.

use crate::api::outcome::{classify, Outcome};
use async_trait::async_trait;
use tracing::{debug, trace};

/// Sends one request and classifies the result.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Issue a GET for `locator`, attaching `credential` as a bearer token
    /// when present. Never returns an Err: every failure mode is an
    /// [`Outcome`] variant so the retry layer sees a uniform surface.
    async fn dispatch(&self, locator: &str, credential: Option<&str>) -> Outcome;
}

/// Production dispatcher backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn dispatch(&self, locator: &str, credential: Option<&str>) -> Outcome {
        trace!(locator, has_credential = credential.is_some(), "dispatching");

        let mut request = self.client.get(locator);
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(error = %err, "request failed before a response arrived");
                return Outcome::NetworkError(err.to_string());
            }
        };

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return match response.bytes().await {
                Ok(bytes) => Outcome::Success(bytes.to_vec()),
                Err(err) => Outcome::NetworkError(err.to_string()),
            };
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        debug!(status, "non-success response");
        classify(status, &body)
    }
}
