//! Parallel job scheduler.
//!
//! Each submitted generation runs as an independent tokio task; jobs never
//! queue behind one another. A job owns its own retry loop, distinct from
//! the one-shot policies in [`crate::api::retry`]: content-filter rejections
//! re-roll the *seed* (not just a cache marker) so the next sample differs,
//! and network-class failures get a small separate budget (backoff schedule
//! for 5xx/429, flat delay for connection errors) so a dead connection fails
//! fast instead of burning fifty attempts.

pub mod recents;

use crate::api::credentials::CredentialPool;
use crate::api::dispatch::Dispatch;
use crate::api::outcome::Outcome;
use crate::api::retry::{backoff_delay, RetryState, RotationGuard};
use crate::error::{classify_failure, ApiError, ErrorKind};
use crate::gallery::{Gallery, Notifier, ToastLevel};
use crate::request::{random_seed, Params, RequestBuilder};
use recents::{RecentItem, RecentRing};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub type JobId = u64;

/// What a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    TextToImage,
    ImageEdit,
    Video,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobKind::TextToImage => "txt2img",
            JobKind::ImageEdit => "img2img",
            JobKind::Video => "video",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    /// Mid safety or network retry; the attempt counters say which.
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Payload of a completed job.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub bytes: Vec<u8>,
    /// The locator that finally succeeded.
    pub locator: String,
    /// Total dispatches, including retries.
    pub attempts: u32,
    /// Gallery id, when the save succeeded.
    pub stored_id: Option<String>,
}

/// Terminal failure, pre-classified for display.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub display: String,
}

/// Point-in-time snapshot of a job. Cheap to clone; handed out by every
/// query method so callers never hold scheduler locks.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub prompt: String,
    pub params: Params,
    pub status: JobStatus,
    pub safety_attempts: u32,
    pub network_attempts: u32,
    pub result: Option<JobResult>,
    pub failure: Option<JobFailure>,
    /// Unix seconds.
    pub created_at: u64,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Per-job budget for content-filter retries.
    pub max_safety_attempts: u32,
    /// Per-job budget for network-class failures.
    pub max_network_attempts: u32,
    pub safety_delay_ms: u64,
    /// Flat delay after a connection-level failure.
    pub network_delay_ms: u64,
    /// Backoff schedule for rate limits and transient 5xx, clamped to its
    /// last entry; doubled for rate limits.
    pub backoff_ms: Vec<u64>,
    /// Recent-results ring size, per job kind.
    pub recents_capacity: usize,
    /// How long finished jobs linger in listings before eviction.
    pub eviction_delay_ms: u64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_safety_attempts: 30,
            max_network_attempts: 3,
            safety_delay_ms: 1000,
            network_delay_ms: 2000,
            backoff_ms: vec![1000, 2000, 4000],
            recents_capacity: 5,
            eviction_delay_ms: 2000,
        }
    }
}

/// Session counters, updated atomically from job tasks.
#[derive(Debug, Default)]
pub struct UsageStats {
    images: AtomicU64,
    edits: AtomicU64,
    videos: AtomicU64,
    safety_retries: AtomicU64,
    downloads: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub images: u64,
    pub edits: u64,
    pub videos: u64,
    pub safety_retries: u64,
    pub downloads: u64,
}

impl UsageStats {
    fn record_completion(&self, kind: JobKind, safety_retries: u32) {
        match kind {
            JobKind::TextToImage => self.images.fetch_add(1, Ordering::Relaxed),
            JobKind::ImageEdit => self.edits.fetch_add(1, Ordering::Relaxed),
            JobKind::Video => self.videos.fetch_add(1, Ordering::Relaxed),
        };
        self.safety_retries
            .fetch_add(safety_retries as u64, Ordering::Relaxed);
    }

    pub fn record_download(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            images: self.images.load(Ordering::Relaxed),
            edits: self.edits.load(Ordering::Relaxed),
            videos: self.videos.load(Ordering::Relaxed),
            safety_retries: self.safety_retries.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
        }
    }
}

struct JobEntry {
    snapshot: Job,
    state: Arc<RetryState>,
}

struct Inner {
    dispatch: Arc<dyn Dispatch>,
    pool: Arc<CredentialPool>,
    gallery: Arc<dyn Gallery>,
    notifier: Arc<dyn Notifier>,
    builder: RequestBuilder,
    options: SchedulerOptions,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    next_id: AtomicU64,
    recents: Mutex<HashMap<JobKind, RecentRing>>,
    stats: UsageStats,
}

/// Runs generation jobs concurrently and tracks their lifecycle.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(
        dispatch: Arc<dyn Dispatch>,
        pool: Arc<CredentialPool>,
        gallery: Arc<dyn Gallery>,
        notifier: Arc<dyn Notifier>,
        builder: RequestBuilder,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatch,
                pool,
                gallery,
                notifier,
                builder,
                options,
                jobs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                recents: Mutex::new(HashMap::new()),
                stats: UsageStats::default(),
            }),
        }
    }

    /// Submit a job; it starts running immediately on its own task.
    pub fn submit(&self, kind: JobKind, prompt: &str, params: Params) -> JobId {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(RetryState::new());
        let snapshot = Job {
            id,
            kind,
            prompt: prompt.to_string(),
            params,
            status: JobStatus::Pending,
            safety_attempts: 0,
            network_attempts: 0,
            result: None,
            failure: None,
            created_at: unix_now(),
        };
        self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner()).insert(
            id,
            JobEntry {
                snapshot,
                state: state.clone(),
            },
        );
        info!(job = id, %kind, "job submitted");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_job(inner, id, state).await;
        });
        id
    }

    /// Request cancellation. Cooperative: the job observes the flag at its
    /// next checkpoint, so the status may lag briefly.
    pub fn cancel(&self, id: JobId) {
        if let Some(entry) = self.lock_jobs().get(&id) {
            if !entry.snapshot.status.is_terminal() {
                debug!(job = id, "cancellation requested");
                entry.state.cancel();
            }
        }
    }

    /// Drop a terminal job from the listing. Failed jobs are never evicted
    /// automatically, so the user can read the failure at leisure.
    pub fn dismiss(&self, id: JobId) -> bool {
        let mut jobs = self.lock_jobs();
        match jobs.get(&id) {
            Some(entry) if entry.snapshot.status.is_terminal() => {
                jobs.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.lock_jobs().get(&id).map(|e| e.snapshot.clone())
    }

    /// All tracked jobs, newest first.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .lock_jobs()
            .values()
            .map(|e| e.snapshot.clone())
            .collect();
        jobs.sort_by(|a, b| b.id.cmp(&a.id));
        jobs
    }

    pub fn active_count(&self) -> usize {
        self.lock_jobs()
            .values()
            .filter(|e| !e.snapshot.status.is_terminal())
            .count()
    }

    /// Poll until the job reaches a terminal status.
    pub async fn wait(&self, id: JobId) -> Option<Job> {
        loop {
            let snapshot = self.job(id)?;
            if snapshot.status.is_terminal() {
                return Some(snapshot);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Recent results for a kind, newest first.
    pub fn recents(&self, kind: JobKind) -> Vec<RecentItem> {
        self.inner
            .recents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map(|ring| ring.items().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> UsageSnapshot {
        self.inner.stats.snapshot()
    }

    /// For download bookkeeping by the embedding application.
    pub fn usage(&self) -> &UsageStats {
        &self.inner.stats
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn update_job(inner: &Inner, id: JobId, f: impl FnOnce(&mut Job)) {
    let mut jobs = inner.jobs.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(entry) = jobs.get_mut(&id) {
        f(&mut entry.snapshot);
    }
}

fn job_snapshot(inner: &Inner, id: JobId) -> Option<Job> {
    inner
        .jobs
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(&id)
        .map(|e| e.snapshot.clone())
}

/// The per-job retry loop.
async fn run_job(inner: Arc<Inner>, id: JobId, state: Arc<RetryState>) {
    update_job(&inner, id, |job| job.status = JobStatus::Running);

    let Some(initial) = job_snapshot(&inner, id) else {
        return;
    };
    let kind = initial.kind;
    let prompt = initial.prompt.clone();
    let mut params = initial.params.clone();

    let mut guard = RotationGuard::new(&inner.pool);
    let mut safety_attempts: u32 = 0;
    let mut network_attempts: u32 = 0;
    let mut total_attempts: u32 = 0;

    loop {
        if state.is_cancelled() {
            finish_cancelled(&inner, id).await;
            return;
        }

        let locator = inner.builder.build(&prompt, &params);
        let credential = inner.pool.current();
        let outcome = inner.dispatch.dispatch(&locator, credential.as_deref()).await;
        total_attempts += 1;

        if state.is_cancelled() {
            debug!(job = id, "cancelled mid-flight, discarding result");
            finish_cancelled(&inner, id).await;
            return;
        }

        match outcome {
            Outcome::Success(bytes) => {
                complete(&inner, id, kind, &prompt, &params, bytes, locator, total_attempts, safety_attempts).await;
                return;
            }
            Outcome::ContentFiltered => {
                safety_attempts += 1;
                if safety_attempts >= inner.options.max_safety_attempts {
                    fail(
                        &inner,
                        id,
                        ApiError::SafetyRetriesExhausted {
                            attempts: safety_attempts,
                        },
                    );
                    return;
                }
                guard.reset();
                // A different seed gives the filter a genuinely different
                // sample to judge; retrying the same one would loop.
                params.set("seed", random_seed());
                update_job(&inner, id, |job| {
                    job.status = JobStatus::Retrying;
                    job.safety_attempts = safety_attempts;
                    job.params = params.clone();
                });
                debug!(job = id, safety_attempts, "content filtered, re-rolling seed");
                tokio::time::sleep(Duration::from_millis(inner.options.safety_delay_ms)).await;
            }
            Outcome::BalanceExhausted(message) => {
                if guard.try_rotate(&inner.pool) {
                    info!(job = id, "balance exhausted, rotated credential");
                    continue;
                }
                fail(&inner, id, ApiError::Balance(message));
                return;
            }
            Outcome::AuthFailed(message) => {
                fail(&inner, id, ApiError::Auth(message));
                return;
            }
            Outcome::FatalClient { .. } => {
                fail(&inner, id, outcome.into_error());
                return;
            }
            Outcome::RateLimited | Outcome::TransientServer { .. } | Outcome::NetworkError(_) => {
                network_attempts += 1;
                if network_attempts >= inner.options.max_network_attempts {
                    fail(&inner, id, outcome.into_error());
                    return;
                }
                guard.reset();
                let delay = match &outcome {
                    Outcome::NetworkError(_) => {
                        Duration::from_millis(inner.options.network_delay_ms)
                    }
                    Outcome::RateLimited => {
                        backoff_delay(&inner.options.backoff_ms, network_attempts - 1) * 2
                    }
                    _ => backoff_delay(&inner.options.backoff_ms, network_attempts - 1),
                };
                update_job(&inner, id, |job| {
                    job.status = JobStatus::Retrying;
                    job.network_attempts = network_attempts;
                });
                debug!(job = id, network_attempts, "network-class failure, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn complete(
    inner: &Arc<Inner>,
    id: JobId,
    kind: JobKind,
    prompt: &str,
    params: &Params,
    bytes: Vec<u8>,
    locator: String,
    attempts: u32,
    safety_attempts: u32,
) {
    let stored = inner.gallery.save(kind, prompt, params, &bytes).await;
    if stored.is_none() {
        warn!(job = id, "gallery save failed, result kept in memory only");
    }
    let stored_id = stored.map(|s| s.id);

    inner.stats.record_completion(kind, safety_attempts);
    {
        let mut recents = inner.recents.lock().unwrap_or_else(|e| e.into_inner());
        recents
            .entry(kind)
            .or_insert_with(|| RecentRing::new(inner.options.recents_capacity))
            .push(RecentItem {
                job_id: id,
                prompt: prompt.to_string(),
                params: params.clone(),
                bytes: bytes.clone(),
                stored_id: stored_id.clone(),
                created_at: unix_now(),
            });
    }

    update_job(inner, id, |job| {
        job.status = JobStatus::Completed;
        job.safety_attempts = safety_attempts;
        job.result = Some(JobResult {
            bytes,
            locator,
            attempts,
            stored_id,
        });
    });
    info!(job = id, attempts, "job completed");

    if safety_attempts > 0 {
        inner.notifier.toast(
            ToastLevel::Success,
            &format!("Generation succeeded after {safety_attempts} filtered attempts"),
        );
    }
    schedule_eviction(inner, id);
}

fn fail(inner: &Arc<Inner>, id: JobId, error: ApiError) {
    let kind = classify_failure(&error);
    let message = error.to_string();
    warn!(job = id, ?kind, display = %message, "job failed");

    update_job(inner, id, |job| {
        job.status = JobStatus::Failed;
        job.failure = Some(JobFailure {
            kind,
            display: message.clone(),
        });
    });

    // Credential problems need action from the user; everything else is a
    // passing notice.
    match kind {
        ErrorKind::Auth => inner.notifier.panel("Authentication failed", &message),
        ErrorKind::Balance => inner.notifier.panel("Balance exhausted", &message),
        _ => inner.notifier.toast(ToastLevel::Error, &message),
    }
}

async fn finish_cancelled(inner: &Arc<Inner>, id: JobId) {
    info!(job = id, "job cancelled");
    update_job(inner, id, |job| job.status = JobStatus::Cancelled);
    schedule_eviction(inner, id);
}

/// Completed and cancelled jobs leave the listing after a short delay;
/// failed jobs stay until dismissed.
fn schedule_eviction(inner: &Arc<Inner>, id: JobId) {
    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(inner.options.eviction_delay_ms)).await;
        let mut jobs = inner.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = jobs.get(&id) {
            if matches!(
                entry.snapshot.status,
                JobStatus::Completed | JobStatus::Cancelled
            ) {
                jobs.remove(&id);
            }
        }
    });
}
