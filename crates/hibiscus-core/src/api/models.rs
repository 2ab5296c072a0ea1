//! Model catalog and account queries.

use crate::api::credentials::CredentialPool;
use crate::api::dispatch::Dispatch;
use crate::api::retry::{fetch_with_retry, RetryOptions};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One entry from the upstream model catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: f64,
}

/// Fetch the image model catalog.
pub async fn image_models(
    dispatch: &dyn Dispatch,
    pool: &CredentialPool,
    base: &str,
    options: &RetryOptions,
) -> Result<Vec<ModelInfo>> {
    fetch_catalog(dispatch, pool, &format!("{base}/image/models"), options).await
}

/// Fetch the text model catalog.
pub async fn text_models(
    dispatch: &dyn Dispatch,
    pool: &CredentialPool,
    base: &str,
    options: &RetryOptions,
) -> Result<Vec<ModelInfo>> {
    fetch_catalog(dispatch, pool, &format!("{base}/text/models"), options).await
}

async fn fetch_catalog(
    dispatch: &dyn Dispatch,
    pool: &CredentialPool,
    locator: &str,
    options: &RetryOptions,
) -> Result<Vec<ModelInfo>> {
    let bytes = fetch_with_retry(dispatch, pool, locator, options).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Query the account balance for the current credential.
///
/// Balance is informational only, so failures degrade to `None` rather than
/// propagating.
pub async fn account_balance(
    dispatch: &dyn Dispatch,
    pool: &CredentialPool,
    base: &str,
    options: &RetryOptions,
) -> Option<f64> {
    let locator = format!("{base}/account/balance");
    match fetch_with_retry(dispatch, pool, &locator, options).await {
        Ok(bytes) => match serde_json::from_slice::<BalanceResponse>(&bytes) {
            Ok(response) => Some(response.balance),
            Err(err) => {
                warn!(error = %err, "unparseable balance response");
                None
            }
        },
        Err(err) => {
            warn!(error = %err, "balance query failed");
            None
        }
    }
}
