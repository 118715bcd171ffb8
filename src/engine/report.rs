//! Terminal outcomes and statistics for a run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Terminal state of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// A try returned status 200.
    Succeeded {
        /// Response body of the successful try.
        body: String,
    },

    /// Every allowed try failed.
    Failed {
        /// Status of the final try, or `None` if it failed at the transport level.
        last_status: Option<u16>,
        /// Transport error of the final try, if any.
        last_error: Option<String>,
    },

    /// The run was cancelled before the item reached a terminal state.
    Cancelled,
}

impl ItemOutcome {
    /// Returns `true` for [`ItemOutcome::Succeeded`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Returns `true` for [`ItemOutcome::Failed`].
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Terminal record for one first-seen key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    /// The item key.
    pub key: String,
    /// Number of network tries made for the key.
    pub attempts: u32,
    /// How the item ended.
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// Statistics from a run.
///
/// Uses atomic counters so workers and the retry coordinator can update
/// them concurrently.
#[derive(Debug, Default)]
pub struct FetchStats {
    calls: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    duplicates: AtomicUsize,
}

impl FetchStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of network calls issued.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the number of items that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Returns the number of items that failed permanently.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the number of retries scheduled.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Returns the number of submissions dropped as duplicates.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_calls(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::SeqCst);
    }
}

/// Result of a finished run: one [`ItemReport`] per first-seen key, in the
/// order the keys reached a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Per-key terminal records.
    pub items: Vec<ItemReport>,
    /// Network calls issued.
    pub calls: usize,
    /// Retries scheduled.
    pub retried: usize,
    /// Submissions dropped as duplicates.
    pub duplicates: usize,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Wall-clock duration of the run.
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(
    value: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

impl RunReport {
    /// Returns the record for `key`, if it was a first-seen key of this run.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ItemReport> {
        self.items.iter().find(|item| item.key == key)
    }

    /// Returns the number of keys with a terminal record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no key was processed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of succeeded items.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_success()).count()
    }

    /// Returns the number of permanently failed items.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_failure()).count()
    }

    /// Returns the number of items left unfinished by cancellation.
    #[must_use]
    pub fn cancelled_items(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.outcome == ItemOutcome::Cancelled)
            .count()
    }
}
