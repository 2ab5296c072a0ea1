//! Retry policies.
//!
//! Three policies cover the pipeline:
//!
//! 1. **Bounded transient retry** ([`fetch_with_retry`]) — a small fixed
//!    budget with an escalating backoff schedule, for rate limits, 5xx, and
//!    network failures. Used for one-shot fetches (model catalog, balance).
//! 2. **Persistent safety retry** ([`fetch_with_safety_retry`]) — a large
//!    budget with short flat delays, re-rolling the request's cache-busting
//!    marker each time the content filter trips. Used for generation, where
//!    the filter is noisy and a fresh sample usually passes.
//! 3. **Credential rotation** — a sub-policy of both: balance exhaustion
//!    rotates the pool without consuming retry budget, bounded to one full
//!    pass over the pool per request by [`RotationGuard`].

use crate::api::credentials::CredentialPool;
use crate::api::dispatch::Dispatch;
use crate::api::outcome::Outcome;
use crate::error::{ApiError, ApiResult};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempt budget for the bounded transient policy.
pub const MAX_RETRIES: u32 = 3;

/// Backoff schedule for the bounded policy; clamped to the last entry.
pub const RETRY_DELAYS_MS: [u64; 3] = [1000, 2000, 4000];

/// Attempt budget for the persistent safety policy.
pub const MAX_SAFETY_RETRIES: u32 = 50;

/// Flat delay between safety retries.
pub const SAFETY_RETRY_DELAY_MS: u64 = 500;

/// Flat delay after a network failure inside the safety policy.
pub const NETWORK_RETRY_DELAY_MS: u64 = 1000;

/// Wall-clock deadline for video generation.
pub const VIDEO_TIMEOUT: Duration = Duration::from_secs(300);

/// Delay for `attempt` (0-based) under a backoff schedule, clamped to the
/// schedule's last entry.
pub fn backoff_delay(schedule: &[u64], attempt: u32) -> Duration {
    let idx = (attempt as usize).min(schedule.len().saturating_sub(1));
    Duration::from_millis(schedule.get(idx).copied().unwrap_or(0))
}

/// Tuning for the bounded transient policy.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub backoff_ms: Vec<u64>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            backoff_ms: RETRY_DELAYS_MS.to_vec(),
        }
    }
}

/// Tuning for the persistent safety policy.
#[derive(Debug, Clone)]
pub struct SafetyRetryOptions {
    pub max_attempts: u32,
    pub safety_delay_ms: u64,
    /// Flat delay after a connection-level failure.
    pub network_delay_ms: u64,
    /// Backoff schedule for rate limits and transient 5xx, same shape as the
    /// bounded policy's; doubled for rate limits.
    pub backoff_ms: Vec<u64>,
}

impl Default for SafetyRetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: MAX_SAFETY_RETRIES,
            safety_delay_ms: SAFETY_RETRY_DELAY_MS,
            network_delay_ms: NETWORK_RETRY_DELAY_MS,
            backoff_ms: RETRY_DELAYS_MS.to_vec(),
        }
    }
}

/// Shared cancellation and progress state for a long-running fetch.
///
/// Cancellation is cooperative: the flag is polled between attempts and after
/// each dispatch returns, so an in-flight response may complete on the wire
/// but its result is discarded.
#[derive(Debug, Default)]
pub struct RetryState {
    cancelled: AtomicBool,
    attempts: AtomicU32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Attempts completed so far (for progress display).
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Bounds credential rotation to one full pass over the pool per request.
///
/// Without this, a pool whose every key is drained would rotate forever:
/// each key "fails", the pool resets, and the cycle repeats.
#[derive(Debug)]
pub(crate) struct RotationGuard {
    rotations: u32,
    limit: u32,
}

impl RotationGuard {
    pub(crate) fn new(pool: &CredentialPool) -> Self {
        Self {
            rotations: 0,
            limit: pool.len() as u32,
        }
    }

    /// Rotate if the pass budget allows it. Returns false once every key in
    /// the pool has been tried for this request.
    pub(crate) fn try_rotate(&mut self, pool: &CredentialPool) -> bool {
        if self.rotations >= self.limit || pool.len() < 2 {
            return false;
        }
        pool.mark_failed();
        self.rotations += 1;
        true
    }

    /// A non-balance outcome means the current key works; allow a fresh pass
    /// if balance failures start again later.
    pub(crate) fn reset(&mut self) {
        self.rotations = 0;
    }
}

/// Fetch with the bounded transient policy.
///
/// Retryable outcomes (rate limit, transient 5xx, network) consume attempt
/// budget with escalating backoff; the rate-limit delay is doubled. Balance
/// exhaustion rotates credentials without consuming budget. Auth and fatal
/// client errors abort immediately.
pub async fn fetch_with_retry(
    dispatch: &dyn Dispatch,
    pool: &CredentialPool,
    locator: &str,
    options: &RetryOptions,
) -> ApiResult<Vec<u8>> {
    let mut guard = RotationGuard::new(pool);
    let mut attempt: u32 = 0;
    let mut last_error: Option<ApiError> = None;

    while attempt < options.max_attempts {
        let credential = pool.current();
        let outcome = dispatch.dispatch(locator, credential.as_deref()).await;

        match outcome {
            Outcome::Success(bytes) => return Ok(bytes),
            Outcome::BalanceExhausted(message) => {
                if guard.try_rotate(pool) {
                    info!("balance exhausted, rotated to next credential");
                    continue;
                }
                return Err(ApiError::Balance(message));
            }
            Outcome::AuthFailed(message) => return Err(ApiError::Auth(message)),
            Outcome::FatalClient { .. } | Outcome::ContentFiltered => {
                return Err(outcome.into_error());
            }
            Outcome::RateLimited => {
                guard.reset();
                let delay = backoff_delay(&options.backoff_ms, attempt) * 2;
                debug!(attempt, delay_ms = delay.as_millis() as u64, "rate limited");
                last_error = Some(ApiError::RateLimited);
                attempt += 1;
                if attempt < options.max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
            Outcome::TransientServer { .. } | Outcome::NetworkError(_) => {
                guard.reset();
                let delay = backoff_delay(&options.backoff_ms, attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "transient failure");
                last_error = Some(outcome.into_error());
                attempt += 1;
                if attempt < options.max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    warn!(attempts = options.max_attempts, "retry budget exhausted");
    Err(last_error.unwrap_or_else(|| ApiError::Request("retry budget exhausted".into())))
}

/// A successful generation, with the attempt count that produced it.
#[derive(Debug, Clone)]
pub struct SafetyFetch {
    pub bytes: Vec<u8>,
    pub attempts: u32,
}

/// Append a fresh cache-busting marker to the base locator.
///
/// Computed from the base every time so markers never stack across retries.
fn with_retry_marker(base: &str, marker: i64) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}_retry={marker}")
}

/// Fetch with the persistent safety policy.
///
/// Content-filter rejections retry up to `options.max_attempts` times with a
/// short flat delay, re-rolling the cache-busting marker each time. Rate
/// limits and transient server failures also consume the budget, waiting out
/// the backoff schedule (doubled for rate limits); connection failures use
/// the flat network delay. `on_attempt(failures, attempt)` fires before each
/// filter retry so callers can surface progress; attempt counts every
/// dispatch, so it runs ahead of the failure count when credential rotation
/// was involved.
///
/// Returns `Ok(None)` when `state` is cancelled — cancellation is not an
/// error. The flag is checked at the top of every iteration and again after
/// dispatch returns, so a response racing a cancel is discarded.
pub async fn fetch_with_safety_retry<F>(
    dispatch: &dyn Dispatch,
    pool: &CredentialPool,
    base_locator: &str,
    options: &SafetyRetryOptions,
    state: &RetryState,
    on_attempt: F,
) -> ApiResult<Option<SafetyFetch>>
where
    F: Fn(u32, u32),
{
    let mut guard = RotationGuard::new(pool);
    let mut locator = base_locator.to_string();
    let mut safety_attempts: u32 = 0;
    let mut total_attempts: u32 = 0;
    let mut last_error: Option<ApiError> = None;

    loop {
        if state.is_cancelled() {
            debug!("fetch cancelled before dispatch");
            return Ok(None);
        }
        if safety_attempts >= options.max_attempts {
            break;
        }

        let credential = pool.current();
        let outcome = dispatch.dispatch(&locator, credential.as_deref()).await;
        state.record_attempt();
        total_attempts += 1;

        if state.is_cancelled() {
            debug!("fetch cancelled mid-flight, discarding result");
            return Ok(None);
        }

        match outcome {
            Outcome::Success(bytes) => {
                return Ok(Some(SafetyFetch {
                    bytes,
                    attempts: safety_attempts + 1,
                }));
            }
            Outcome::ContentFiltered => {
                guard.reset();
                safety_attempts += 1;
                last_error = Some(ApiError::Safety);
                if safety_attempts >= options.max_attempts {
                    break;
                }
                on_attempt(safety_attempts, total_attempts);
                debug!(safety_attempts, "content filtered, re-rolling marker");
                locator = with_retry_marker(base_locator, crate::request::random_seed());
                tokio::time::sleep(Duration::from_millis(options.safety_delay_ms)).await;
            }
            Outcome::BalanceExhausted(message) => {
                if guard.try_rotate(pool) {
                    info!("balance exhausted, rotated to next credential");
                    continue;
                }
                return Err(ApiError::Balance(message));
            }
            Outcome::AuthFailed(message) => return Err(ApiError::Auth(message)),
            Outcome::FatalClient { .. } => return Err(outcome.into_error()),
            Outcome::RateLimited | Outcome::TransientServer { .. } | Outcome::NetworkError(_) => {
                guard.reset();
                safety_attempts += 1;
                let delay = match &outcome {
                    Outcome::NetworkError(_) => Duration::from_millis(options.network_delay_ms),
                    Outcome::RateLimited => {
                        backoff_delay(&options.backoff_ms, safety_attempts - 1) * 2
                    }
                    _ => backoff_delay(&options.backoff_ms, safety_attempts - 1),
                };
                last_error = Some(outcome.into_error());
                if safety_attempts >= options.max_attempts {
                    break;
                }
                tokio::time::sleep(delay).await;
            }
        }
    }

    warn!(attempts = safety_attempts, "safety retry budget exhausted");
    match last_error {
        // The budget is sized for filter noise; report it as such when the
        // filter was the last thing seen.
        Some(ApiError::Safety) | None => Err(ApiError::SafetyRetriesExhausted {
            attempts: safety_attempts,
        }),
        Some(other) => Err(other),
    }
}

/// Fetch exactly once under a wall-clock deadline; used for video generation,
/// which can legitimately run minutes before responding.
///
/// Balance exhaustion still rotates credentials, but there is no transient
/// retry: a render already takes minutes, and re-dispatching on a 5xx would
/// multiply the wait.
pub async fn fetch_with_deadline(
    dispatch: &dyn Dispatch,
    pool: &CredentialPool,
    locator: &str,
    deadline: Duration,
) -> ApiResult<Vec<u8>> {
    match tokio::time::timeout(deadline, dispatch_once(dispatch, pool, locator)).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout { timeout: deadline }),
    }
}

async fn dispatch_once(
    dispatch: &dyn Dispatch,
    pool: &CredentialPool,
    locator: &str,
) -> ApiResult<Vec<u8>> {
    let mut guard = RotationGuard::new(pool);
    loop {
        let credential = pool.current();
        let outcome = dispatch.dispatch(locator, credential.as_deref()).await;
        match outcome {
            Outcome::Success(bytes) => return Ok(bytes),
            Outcome::BalanceExhausted(message) => {
                if guard.try_rotate(pool) {
                    info!("balance exhausted, rotated to next credential");
                    continue;
                }
                return Err(ApiError::Balance(message));
            }
            other => return Err(other.into_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dispatch::testing::StubDispatch;
    use crate::error::ErrorKind;

    fn quick_retry() -> RetryOptions {
        RetryOptions {
            max_attempts: 3,
            backoff_ms: vec![1, 2, 4],
        }
    }

    fn quick_safety(max_attempts: u32) -> SafetyRetryOptions {
        SafetyRetryOptions {
            max_attempts,
            safety_delay_ms: 1,
            network_delay_ms: 1,
            backoff_ms: vec![1],
        }
    }

    fn transient() -> Outcome {
        Outcome::TransientServer {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[test]
    fn test_backoff_delay_clamps_to_last() {
        let schedule = [1000, 2000, 4000];
        assert_eq!(backoff_delay(&schedule, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&schedule, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&schedule, 9), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&[], 0), Duration::from_millis(0));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let stub = StubDispatch::new(
            vec![transient(), transient()],
            Outcome::Success(b"ok".to_vec()),
        );
        let pool = CredentialPool::new(vec![]);
        let bytes = fetch_with_retry(&stub, &pool, "u", &quick_retry())
            .await
            .unwrap();
        assert_eq!(bytes, b"ok");
        assert_eq!(stub.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let stub = StubDispatch::always(transient());
        let pool = CredentialPool::new(vec![]);
        let err = fetch_with_retry(&stub, &pool, "u", &quick_retry())
            .await
            .unwrap_err();
        // Exactly max_attempts calls, never more.
        assert_eq!(stub.call_count(), 3);
        assert!(matches!(err, ApiError::Server { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_reports_rate_limit() {
        let stub = StubDispatch::always(Outcome::RateLimited);
        let pool = CredentialPool::new(vec![]);
        let err = fetch_with_retry(&stub, &pool, "u", &quick_retry())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::RateLimited));
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_immediately() {
        let stub = StubDispatch::always(Outcome::AuthFailed("bad key".into()));
        let pool = CredentialPool::new(vec!["k".into()]);
        let err = fetch_with_retry(&stub, &pool, "u", &quick_retry())
            .await
            .unwrap_err();
        assert_eq!(stub.call_count(), 1);
        assert!(matches!(err, ApiError::Auth(_)));
    }

    #[tokio::test]
    async fn test_balance_rotates_without_consuming_budget() {
        let stub = StubDispatch::new(
            vec![Outcome::BalanceExhausted("dry".into())],
            Outcome::Success(b"ok".to_vec()),
        );
        let pool = CredentialPool::new(vec!["a".into(), "b".into()]);
        let bytes = fetch_with_retry(&stub, &pool, "u", &quick_retry())
            .await
            .unwrap();
        assert_eq!(bytes, b"ok");
        let creds = stub.credentials.lock().unwrap().clone();
        assert_eq!(creds, vec![Some("a".to_string()), Some("b".to_string())]);
    }

    #[tokio::test]
    async fn test_balance_with_single_credential_is_terminal() {
        let stub = StubDispatch::always(Outcome::BalanceExhausted("dry".into()));
        let pool = CredentialPool::new(vec!["only".into()]);
        let err = fetch_with_retry(&stub, &pool, "u", &quick_retry())
            .await
            .unwrap_err();
        assert_eq!(stub.call_count(), 1);
        assert!(matches!(err, ApiError::Balance(_)));
    }

    #[tokio::test]
    async fn test_rotation_bounded_to_one_full_pass() {
        // Every key drained: one try per key, then a terminal balance error
        // instead of an infinite rotate-reset loop.
        let stub = StubDispatch::always(Outcome::BalanceExhausted("dry".into()));
        let pool = CredentialPool::new(vec!["a".into(), "b".into(), "c".into()]);
        let err = fetch_with_retry(&stub, &pool, "u", &quick_retry())
            .await
            .unwrap_err();
        assert_eq!(stub.call_count(), 4); // initial + one per rotation
        assert!(matches!(err, ApiError::Balance(_)));
    }

    #[tokio::test]
    async fn test_safety_retry_counts_attempts() {
        let stub = StubDispatch::new(
            vec![
                Outcome::ContentFiltered,
                Outcome::ContentFiltered,
                Outcome::ContentFiltered,
            ],
            Outcome::Success(b"img".to_vec()),
        );
        let pool = CredentialPool::new(vec![]);
        let state = RetryState::new();
        let fetched = fetch_with_safety_retry(&stub, &pool, "u", &quick_safety(50), &state, |_, _| {})
            .await
            .unwrap()
            .unwrap();
        // Three filter hits then success: attempts reports 4.
        assert_eq!(fetched.attempts, 4);
        assert_eq!(stub.call_count(), 4);
    }

    #[tokio::test]
    async fn test_safety_retry_rerolls_marker() {
        let stub = StubDispatch::new(
            vec![Outcome::ContentFiltered, Outcome::ContentFiltered],
            Outcome::Success(b"img".to_vec()),
        );
        let pool = CredentialPool::new(vec![]);
        let state = RetryState::new();
        fetch_with_safety_retry(&stub, &pool, "u?seed=1", &quick_safety(50), &state, |_, _| {})
            .await
            .unwrap();
        let locators = stub.locators.lock().unwrap().clone();
        assert_eq!(locators[0], "u?seed=1");
        assert!(locators[1].starts_with("u?seed=1&_retry="));
        assert!(locators[2].starts_with("u?seed=1&_retry="));
        // Markers derive from the base locator, so they never stack.
        assert_eq!(locators[2].matches("_retry=").count(), 1);
        assert_ne!(locators[1], locators[2]);
    }

    #[tokio::test]
    async fn test_safety_retry_exhaustion_is_distinct_error() {
        let stub = StubDispatch::always(Outcome::ContentFiltered);
        let pool = CredentialPool::new(vec![]);
        let state = RetryState::new();
        let err = fetch_with_safety_retry(&stub, &pool, "u", &quick_safety(5), &state, |_, _| {})
            .await
            .unwrap_err();
        assert_eq!(stub.call_count(), 5);
        assert!(matches!(
            err,
            ApiError::SafetyRetriesExhausted { attempts: 5 }
        ));
        assert_eq!(err.kind(), ErrorKind::ExhaustedRetries);
    }

    #[tokio::test]
    async fn test_safety_retry_reports_progress() {
        use std::sync::Mutex;
        let stub = StubDispatch::new(
            vec![Outcome::ContentFiltered],
            Outcome::Success(b"img".to_vec()),
        );
        let pool = CredentialPool::new(vec![]);
        let state = RetryState::new();
        let seen = Mutex::new(Vec::new());
        fetch_with_safety_retry(&stub, &pool, "u", &quick_safety(50), &state, |failures, attempt| {
            seen.lock().unwrap().push((failures, attempt));
        })
        .await
        .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(1, 1)]);
    }

    #[tokio::test]
    async fn test_progress_attempt_counts_rotations() {
        use std::sync::Mutex;
        let stub = StubDispatch::new(
            vec![
                Outcome::BalanceExhausted("dry".into()),
                Outcome::ContentFiltered,
            ],
            Outcome::Success(b"img".to_vec()),
        );
        let pool = CredentialPool::new(vec!["a".into(), "b".into()]);
        let state = RetryState::new();
        let seen = Mutex::new(Vec::new());
        fetch_with_safety_retry(&stub, &pool, "u", &quick_safety(50), &state, |failures, attempt| {
            seen.lock().unwrap().push((failures, attempt));
        })
        .await
        .unwrap();
        // The rotation dispatch counts as an attempt but not a failure.
        assert_eq!(*seen.lock().unwrap(), vec![(1, 2)]);
    }

    #[tokio::test]
    async fn test_cancellation_before_dispatch_returns_none() {
        let stub = StubDispatch::always(Outcome::Success(b"img".to_vec()));
        let pool = CredentialPool::new(vec![]);
        let state = RetryState::new();
        state.cancel();
        let result = fetch_with_safety_retry(&stub, &pool, "u", &quick_safety(50), &state, |_, _| {})
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellation_discards_in_flight_result() {
        use std::sync::Arc;
        let stub = Arc::new(
            StubDispatch::always(Outcome::Success(b"img".to_vec()))
                .with_delay(Duration::from_millis(50)),
        );
        let pool = Arc::new(CredentialPool::new(vec![]));
        let state = Arc::new(RetryState::new());

        let task = {
            let (stub, pool, state) = (stub.clone(), pool.clone(), state.clone());
            tokio::spawn(async move {
                fetch_with_safety_retry(&*stub, &pool, "u", &quick_safety(50), &state, |_, _| {})
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        state.cancel();

        let result = task.await.unwrap().unwrap();
        // Dispatch completed, but the cancelled fetch discards the payload.
        assert!(result.is_none());
        assert_eq!(stub.call_count(), 1);
    }

    #[tokio::test]
    async fn test_safety_loop_transient_waits_out_backoff() {
        let stub = StubDispatch::new(vec![transient()], Outcome::Success(b"img".to_vec()));
        let pool = CredentialPool::new(vec![]);
        let state = RetryState::new();
        let options = SafetyRetryOptions {
            max_attempts: 50,
            safety_delay_ms: 1,
            network_delay_ms: 1,
            backoff_ms: vec![50],
        };
        let start = std::time::Instant::now();
        fetch_with_safety_retry(&stub, &pool, "u", &options, &state, |_, _| {})
            .await
            .unwrap();
        // The 5xx retry follows the backoff schedule, not the network delay.
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_safety_loop_rate_limit_doubles_backoff() {
        let stub = StubDispatch::new(vec![Outcome::RateLimited], Outcome::Success(b"img".to_vec()));
        let pool = CredentialPool::new(vec![]);
        let state = RetryState::new();
        let options = SafetyRetryOptions {
            max_attempts: 50,
            safety_delay_ms: 1,
            network_delay_ms: 1,
            backoff_ms: vec![25],
        };
        let start = std::time::Instant::now();
        fetch_with_safety_retry(&stub, &pool, "u", &options, &state, |_, _| {})
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_safety_loop_network_uses_flat_delay() {
        let stub = StubDispatch::new(
            vec![Outcome::NetworkError("refused".into())],
            Outcome::Success(b"img".to_vec()),
        );
        let pool = CredentialPool::new(vec![]);
        let state = RetryState::new();
        let options = SafetyRetryOptions {
            max_attempts: 50,
            safety_delay_ms: 1,
            network_delay_ms: 50,
            backoff_ms: vec![1],
        };
        let start = std::time::Instant::now();
        fetch_with_safety_retry(&stub, &pool, "u", &options, &state, |_, _| {})
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_network_failures_consume_safety_budget() {
        let stub = StubDispatch::always(Outcome::NetworkError("refused".into()));
        let pool = CredentialPool::new(vec![]);
        let state = RetryState::new();
        let err = fetch_with_safety_retry(&stub, &pool, "u", &quick_safety(3), &state, |_, _| {})
            .await
            .unwrap_err();
        assert_eq!(stub.call_count(), 3);
        assert!(matches!(err, ApiError::Network(_)));
    }

    #[tokio::test]
    async fn test_safety_retry_fatal_client_aborts() {
        let stub = StubDispatch::always(Outcome::FatalClient {
            status: 400,
            message: "missing model".into(),
        });
        let pool = CredentialPool::new(vec![]);
        let state = RetryState::new();
        let err = fetch_with_safety_retry(&stub, &pool, "u", &quick_safety(50), &state, |_, _| {})
            .await
            .unwrap_err();
        assert_eq!(stub.call_count(), 1);
        assert!(matches!(err, ApiError::Request(_)));
    }

    #[tokio::test]
    async fn test_deadline_times_out() {
        let stub = StubDispatch::always(Outcome::Success(b"v".to_vec()))
            .with_delay(Duration::from_millis(100));
        let pool = CredentialPool::new(vec![]);
        let err = fetch_with_deadline(&stub, &pool, "u", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_deadline_passes_through_success() {
        let stub = StubDispatch::always(Outcome::Success(b"v".to_vec()));
        let pool = CredentialPool::new(vec![]);
        let bytes = fetch_with_deadline(&stub, &pool, "u", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(bytes, b"v");
    }

    #[tokio::test]
    async fn test_deadline_fetch_never_retries_transients() {
        let stub = StubDispatch::always(transient());
        let pool = CredentialPool::new(vec![]);
        let err = fetch_with_deadline(&stub, &pool, "u", Duration::from_secs(5))
            .await
            .unwrap_err();
        // One dispatch only: a render takes minutes, so a 5xx is terminal.
        assert_eq!(stub.call_count(), 1);
        assert!(matches!(err, ApiError::Server { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_deadline_fetch_still_rotates_credentials() {
        let stub = StubDispatch::new(
            vec![Outcome::BalanceExhausted("dry".into())],
            Outcome::Success(b"v".to_vec()),
        );
        let pool = CredentialPool::new(vec!["a".into(), "b".into()]);
        let bytes = fetch_with_deadline(&stub, &pool, "u", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(bytes, b"v");
        let creds = stub.credentials.lock().unwrap().clone();
        assert_eq!(creds, vec![Some("a".to_string()), Some("b".to_string())]);
    }
}
