//! Retry policy with a fixed backoff schedule.
//!
//! Every item gets at most `max_attempts` network tries. After a failed try
//! numbered `n` (zero-based), the next try is delayed by `schedule[n]`.
//!
//! # Decision table
//!
//! | Result of attempt `n`     | `n + 1 < max_attempts` | Decision             |
//! |---------------------------|------------------------|----------------------|
//! | status 200                | any                    | `Succeeded`          |
//! | other status / transport  | yes                    | `Retry` after `schedule[n]` |
//! | other status / transport  | no                     | `Exhausted`          |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use item_fetcher::engine::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.max_attempts(), 3);
//!
//! match policy.decide(Some(500), 0) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(1));
//!         assert_eq!(attempt, 1);
//!     }
//!     other => panic!("unexpected decision {other:?}"),
//! }
//! ```

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// The only status treated as success.
pub const SUCCESS_STATUS: u16 = 200;

/// Default number of network tries per item, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delays between consecutive tries (1s, 3s, 10s).
pub const DEFAULT_BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(10),
];

/// Rejected retry policy parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryPolicyError {
    /// `max_attempts` was zero.
    #[error("max attempts must be at least 1")]
    ZeroAttempts,

    /// Retries were requested without any backoff delay.
    #[error("backoff schedule is empty but max attempts is {max_attempts}")]
    EmptySchedule {
        /// The requested attempt ceiling.
        max_attempts: u32,
    },
}

/// What to do after an attempt's outcome is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The item is done and succeeded.
    Succeeded,

    /// Try again after `delay`.
    Retry {
        /// How long to wait before the next try.
        delay: Duration,
        /// Zero-based number of the next try.
        attempt: u32,
    },

    /// The last allowed try failed.
    Exhausted {
        /// Human-readable reason.
        reason: String,
    },
}

/// Attempt ceiling plus a fixed backoff schedule.
///
/// If the schedule is shorter than `max_attempts - 1`, its last entry is
/// reused for the remaining retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of tries, including the first.
    max_attempts: u32,
    /// Delay after the failure of try `n`, indexed by `n`.
    schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            schedule: DEFAULT_BACKOFF_SCHEDULE.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy from an attempt ceiling and backoff schedule.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError`] if `max_attempts` is zero, or if retries
    /// are allowed (`max_attempts > 1`) but the schedule is empty.
    pub fn new(max_attempts: u32, schedule: Vec<Duration>) -> Result<Self, RetryPolicyError> {
        if max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        if max_attempts > 1 && schedule.is_empty() {
            return Err(RetryPolicyError::EmptySchedule { max_attempts });
        }
        Ok(Self {
            max_attempts,
            schedule,
        })
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            schedule: Vec::new(),
        }
    }

    /// Returns the maximum number of tries per item.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the configured backoff schedule.
    #[must_use]
    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }

    /// Returns the delay applied after try `attempt` fails.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        usize::try_from(attempt)
            .ok()
            .and_then(|index| self.schedule.get(index))
            .or_else(|| self.schedule.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Decides what follows try `attempt`, given its HTTP status.
    ///
    /// `status` is `None` when the try failed at the transport level.
    #[must_use]
    pub fn decide(&self, status: Option<u16>, attempt: u32) -> RetryDecision {
        if status == Some(SUCCESS_STATUS) {
            return RetryDecision::Succeeded;
        }

        let next = attempt.saturating_add(1);
        if next >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::Exhausted {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.delay_for(attempt);
        debug!(
            attempt,
            next_attempt = next,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: next,
        }
    }
}
