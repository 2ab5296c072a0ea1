//! Rotating credential pool.
//!
//! Multiple API keys are held in a fixed order; the pool hands out the
//! current key and advances past keys that have been marked as drained.
//! When every key has failed the pool resets and starts another full pass,
//! since balances replenish over time. Rotation never loops forever on its
//! own — the retry layer bounds full cycles with a guard.

use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PoolState {
    keys: Vec<String>,
    current: usize,
    failed: HashSet<usize>,
}

/// Thread-safe rotating pool of API credentials.
///
/// An empty pool is valid: the API accepts anonymous requests at a reduced
/// tier, so `current()` simply returns `None`.
#[derive(Debug, Default)]
pub struct CredentialPool {
    state: Mutex<PoolState>,
}

impl CredentialPool {
    pub fn new(keys: Vec<String>) -> Self {
        let pool = Self::default();
        pool.configure(keys);
        pool
    }

    /// Build from a comma-separated key list, the format used in settings
    /// UIs and `HIBISCUS_API_KEYS`.
    pub fn from_joined(raw: &str) -> Self {
        Self::new(raw.split(',').map(str::to_string).collect())
    }

    /// Replace the key set. Blank entries are discarded; rotation state is
    /// reset so the first usable key becomes current.
    pub fn configure(&self, keys: Vec<String>) {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        debug!(count = keys.len(), "configured credential pool");
        let mut state = self.lock();
        state.keys = keys;
        state.current = 0;
        state.failed.clear();
    }

    /// The credential to use for the next request.
    ///
    /// Scans forward from the current index past failed keys, advancing the
    /// index as it goes. If every key has failed, clears the failure set and
    /// starts over from the first key.
    pub fn current(&self) -> Option<String> {
        let mut state = self.lock();
        if state.keys.is_empty() {
            return None;
        }
        if state.failed.len() >= state.keys.len() {
            info!("all credentials drained, resetting pool for another pass");
            state.failed.clear();
            state.current = 0;
        }
        while state.failed.contains(&state.current) {
            state.current = (state.current + 1) % state.keys.len();
        }
        Some(state.keys[state.current].clone())
    }

    /// Mark the current credential as drained and advance to the next one.
    ///
    /// With fewer than two keys there is nothing to rotate to, so this is a
    /// no-op and the single key stays active.
    pub fn mark_failed(&self) {
        let mut state = self.lock();
        if state.keys.len() < 2 {
            return;
        }
        let failed = state.current;
        state.failed.insert(failed);
        state.current = (state.current + 1) % state.keys.len();
        warn!(
            index = failed,
            remaining = state.keys.len() - state.failed.len(),
            "credential drained, rotating"
        );
    }

    /// Whether rotating could yield a different, not-yet-failed credential.
    pub fn has_alternatives(&self) -> bool {
        let state = self.lock();
        state.keys.len() >= 2 && state.failed.len() < state.keys.len() - 1
    }

    pub fn len(&self) -> usize {
        self.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().keys.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // Key strings cannot poison the lock in any recoverable way.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
