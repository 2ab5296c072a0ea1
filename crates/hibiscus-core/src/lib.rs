//! # hibiscus-core
//!
//! Core library for Hibiscus, a client for the Pollinations generation API.
//! It covers the request pipeline end to end: locator construction, credential
//! rotation, dispatch with outcome classification, the retry policies, and a
//! parallel job scheduler with recents and usage tracking.
//!
//! ## Quick start
//!
//! ```no_run
//! use hibiscus_core::{Config, Hibiscus, JobKind};
//! use hibiscus_core::gallery::{NullGallery, NullNotifier};
//! use std::sync::Arc;
//!
//! # async fn example() -> hibiscus_core::Result<()> {
//! let config = Config::load()?;
//! let hibiscus = Hibiscus::new(&config);
//! let scheduler = hibiscus.scheduler(Arc::new(NullGallery), Arc::new(NullNotifier));
//!
//! let params = config.defaults.image.to_params();
//! let id = scheduler.submit(JobKind::TextToImage, "a red fox at dawn", params);
//! let job = scheduler.wait(id).await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod gallery;
pub mod jobs;
pub mod request;

pub use api::{CredentialPool, Dispatch, HttpDispatcher, ModelInfo, Outcome};
pub use config::Config;
pub use error::{ApiError, ErrorKind, HibiscusError, Result};
pub use jobs::{Job, JobId, JobKind, JobScheduler, JobStatus, UsageSnapshot};
pub use request::{Params, RequestBuilder};

use api::retry::{fetch_with_deadline, RetryOptions};
use gallery::{Gallery, Notifier};
use std::sync::Arc;
use std::time::Duration;

/// Library version, from the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wires the pipeline together from a [`Config`].
pub struct Hibiscus {
    dispatch: Arc<HttpDispatcher>,
    pool: Arc<CredentialPool>,
    builder: RequestBuilder,
    retry_options: RetryOptions,
    video_timeout: Duration,
    config: Config,
}

impl Hibiscus {
    pub fn new(config: &Config) -> Self {
        Self {
            dispatch: Arc::new(HttpDispatcher::new()),
            pool: Arc::new(CredentialPool::new(config.api.keys.clone())),
            builder: RequestBuilder::new(&config.api.base_url),
            retry_options: config.retry_options(),
            video_timeout: Duration::from_secs(config.api.video_timeout_secs),
            config: config.clone(),
        }
    }

    /// Build a scheduler sharing this instance's dispatcher and credential
    /// pool.
    pub fn scheduler(&self, gallery: Arc<dyn Gallery>, notifier: Arc<dyn Notifier>) -> JobScheduler {
        JobScheduler::new(
            self.dispatch.clone(),
            self.pool.clone(),
            gallery,
            notifier,
            self.builder.clone(),
            self.config.scheduler_options(),
        )
    }

    pub fn credential_pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn request_builder(&self) -> &RequestBuilder {
        &self.builder
    }

    pub async fn image_models(&self) -> Result<Vec<ModelInfo>> {
        api::image_models(
            &*self.dispatch,
            &self.pool,
            &self.config.api.base_url,
            &self.retry_options,
        )
        .await
    }

    pub async fn text_models(&self) -> Result<Vec<ModelInfo>> {
        api::text_models(
            &*self.dispatch,
            &self.pool,
            &self.config.api.base_url,
            &self.retry_options,
        )
        .await
    }

    /// Balance for the current credential; `None` when unavailable.
    pub async fn account_balance(&self) -> Option<f64> {
        api::account_balance(
            &*self.dispatch,
            &self.pool,
            &self.config.api.base_url,
            &self.retry_options,
        )
        .await
    }

    /// One-shot video generation under the configured wall-clock deadline.
    /// Video runs outside the scheduler because a single request can
    /// legitimately take minutes; it dispatches exactly once (credential
    /// rotation aside) rather than retrying transients.
    pub async fn generate_video(&self, prompt: &str, params: &Params) -> Result<Vec<u8>> {
        let locator = self.builder.build(prompt, params);
        let bytes =
            fetch_with_deadline(&*self.dispatch, &self.pool, &locator, self.video_timeout).await?;
        Ok(bytes)
    }
}
