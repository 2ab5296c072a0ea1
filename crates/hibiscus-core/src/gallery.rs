//! Persistence and notification seams.
//!
//! The scheduler does not know how results are stored or how users are told
//! about them; it drives these two traits. The CLI provides filesystem and
//! console implementations, tests provide in-memory ones, and the null
//! implementations let the scheduler run headless.

use crate::jobs::JobKind;
use crate::request::Params;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A generation result that has been saved somewhere durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: String,
    pub kind: JobKind,
    pub prompt: String,
    /// The parameters that produced the result (model, dimensions, seed),
    /// so listings can show more than the prompt.
    #[serde(default)]
    pub params: Params,
    /// Where the payload landed, if the store is file-backed.
    pub path: Option<PathBuf>,
    /// Unix seconds.
    pub saved_at: u64,
}

/// Durable storage for generation results.
#[async_trait]
pub trait Gallery: Send + Sync {
    /// Persist a result. `None` means the save failed; the scheduler treats
    /// that as non-fatal since the payload is still in the job result.
    async fn save(
        &self,
        kind: JobKind,
        prompt: &str,
        params: &Params,
        bytes: &[u8],
    ) -> Option<StoredItem>;

    /// Remove a stored item. Returns whether anything was removed.
    async fn remove(&self, id: &str) -> bool;

    async fn list(&self) -> Vec<StoredItem>;
}

/// Severity for transient notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Receives user-facing notifications from the scheduler.
///
/// `toast` is for transient messages; `panel` is for failures that need a
/// remedy (bad credential, empty balance) and should stay visible.
pub trait Notifier: Send + Sync {
    fn toast(&self, level: ToastLevel, message: &str);
    fn panel(&self, title: &str, message: &str);
}

/// Discards everything saved to it.
#[derive(Debug, Default)]
pub struct NullGallery;

#[async_trait]
impl Gallery for NullGallery {
    async fn save(
        &self,
        _kind: JobKind,
        _prompt: &str,
        _params: &Params,
        _bytes: &[u8],
    ) -> Option<StoredItem> {
        None
    }

    async fn remove(&self, _id: &str) -> bool {
        false
    }

    async fn list(&self) -> Vec<StoredItem> {
        Vec::new()
    }
}

/// Swallows all notifications.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn toast(&self, _level: ToastLevel, _message: &str) {}
    fn panel(&self, _title: &str, _message: &str) {}
}
