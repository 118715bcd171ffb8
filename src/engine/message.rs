//! Typed messages passed between pipeline stages.

use crate::fetch::FetchResponse;

/// One numbered try to fetch an item.
///
/// Attempt 0 is the initial try. Only the retry coordinator creates
/// attempt `n + 1`, after it has consumed the outcome of attempt `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// The item key.
    pub key: String,
    /// Zero-based attempt number.
    pub number: u32,
}

impl Attempt {
    /// Creates the initial attempt for a key.
    pub fn initial(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            number: 0,
        }
    }

    /// Returns the attempt that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self {
            key: self.key,
            number: self.number + 1,
        }
    }
}

/// What a worker observed for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// The HTTP exchange completed with some status.
    Response(FetchResponse),
    /// The exchange failed at the transport level.
    Transport(String),
}

impl AttemptResult {
    /// Returns the HTTP status, if the exchange completed.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response(response) => Some(response.status),
            Self::Transport(_) => None,
        }
    }
}

/// The result of one attempt, sent from a worker to the retry coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// The attempt this outcome belongs to.
    pub attempt: Attempt,
    /// What happened.
    pub result: AttemptResult,
}
