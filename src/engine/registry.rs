//! Shared dedup registry for item keys.
//!
//! The registry answers "has this key already been queued?" atomically. It
//! is the only engine component guarded by a lock, and the lock is held
//! only for the map access itself.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

/// Identifies one run of the engine against a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(pub u64);

/// State of a key in the registry. Absence means unseen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Queued or in flight, or finished successfully.
    Claimed(RunId),
    /// All attempts were exhausted in the given run.
    Failed(RunId),
}

/// Map of item key to [`EntryState`], guarded by one mutex.
///
/// A key is claimable when it is absent, or when it failed in an earlier
/// run. Within one run every key is claimed at most once.
#[derive(Debug, Default)]
pub struct DedupRegistry {
    entries: Mutex<HashMap<String, EntryState>>,
}

impl DedupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, EntryState>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims `key` for `run`, returning `true` if the caller should queue it.
    pub fn claim(&self, key: &str, run: RunId) -> bool {
        let mut entries = self.lock();
        let claimable = match entries.get(key) {
            None => true,
            Some(EntryState::Failed(failed_in)) => *failed_in != run,
            Some(EntryState::Claimed(_)) => false,
        };
        if claimable {
            entries.insert(key.to_string(), EntryState::Claimed(run));
        }
        trace!(key, claimable, "registry claim");
        claimable
    }

    /// Records that `key` exhausted its attempts in `run`.
    pub fn mark_failed(&self, key: &str, run: RunId) {
        self.lock().insert(key.to_string(), EntryState::Failed(run));
    }

    /// Removes `key` if it is still claimed by `run`, so a later run may
    /// claim it again. Used for keys a cancelled run never finished.
    pub fn release(&self, key: &str, run: RunId) {
        let mut entries = self.lock();
        if entries.get(key) == Some(&EntryState::Claimed(run)) {
            entries.remove(key);
            trace!(key, "registry release");
        }
    }

    /// Records that `key` succeeded. The key stays claimed.
    #[allow(clippy::unused_self)]
    pub fn mark_succeeded(&self, key: &str) {
        trace!(key, "registry success");
    }

    /// Returns the current state of `key`, or `None` if it was never claimed.
    #[must_use]
    pub fn state(&self, key: &str) -> Option<EntryState> {
        self.lock().get(key).copied()
    }

    /// Returns the number of keys ever claimed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no key was ever claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
