//! Concurrent fetch-dispatch-retry engine.
//!
//! The engine runs a fixed pool of workers over a bounded work queue. Every
//! outcome flows to a single retry coordinator, which either finalizes the
//! item or schedules a delayed re-enqueue onto the same queue. A completion
//! tracker counts items that have not reached a terminal state; the run ends
//! when it reaches zero.
//!
//! # Pipeline
//!
//! ```text
//! submit ──► DedupRegistry ──► WorkQueue ──► Worker × N ──► result sink
//!                                  ▲                            │
//!                                  └── retry timer ◄── Coordinator ──► terminal record
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use item_fetcher::engine::{EngineConfig, FetchEngine};
//! use item_fetcher::fetch::HttpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = FetchEngine::new(EngineConfig::default(), Arc::new(HttpClient::new()))?;
//! let report = engine
//!     .run("http://localhost:8080/items/", ["1", "2", "2", "3"])
//!     .await?;
//! println!("succeeded: {}, failed: {}", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod message;
mod queue;
mod registry;
mod report;
mod retry;
mod session;
mod tracker;
mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

pub use message::{Attempt, AttemptResult, Outcome};
pub use queue::{QueueClosed, WorkQueue};
pub use registry::{DedupRegistry, EntryState, RunId};
pub use report::{FetchStats, ItemOutcome, ItemReport, RunReport};
pub use retry::{
    DEFAULT_BACKOFF_SCHEDULE, DEFAULT_MAX_ATTEMPTS, RetryDecision, RetryPolicy, RetryPolicyError,
    SUCCESS_STATUS,
};
pub use session::RunSession;
pub use tracker::CompletionTracker;

use crate::fetch::{Fetcher, HttpClient};
use session::SessionParts;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default number of workers.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The work queue capacity was zero.
    #[error("work queue capacity must be at least 1")]
    InvalidQueueCapacity,

    /// The retry policy was rejected.
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(#[from] RetryPolicyError),

    /// A key was submitted after submissions were closed.
    #[error("submissions are closed for this run")]
    SubmissionsClosed,

    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,

    /// A pipeline task panicked.
    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Engine configuration.
///
/// # Default Values
///
/// - `concurrency`: 5 workers
/// - `queue_capacity`: same as `concurrency`
/// - `retry_policy`: 3 attempts, backoff 1s, 3s, 10s
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of workers, and so the ceiling on in-flight fetches.
    pub concurrency: usize,
    /// Work queue capacity; `None` means one slot per worker.
    pub queue_capacity: Option<usize>,
    /// Attempt ceiling and backoff schedule.
    pub retry_policy: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            queue_capacity: None,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration from the three run parameters.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRetryPolicy`] if the attempt ceiling or
    /// schedule is rejected by [`RetryPolicy::new`].
    pub fn new(
        concurrency: usize,
        max_attempts: u32,
        backoff_schedule: Vec<Duration>,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            concurrency,
            queue_capacity: None,
            retry_policy: RetryPolicy::new(max_attempts, backoff_schedule)?,
        })
    }

    /// Sets an explicit work queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.concurrency)
    }
}

/// Fetch engine with a fixed worker pool, dedup and retry support.
///
/// # Concurrency Model
///
/// - Each run spawns `concurrency` worker tasks sharing one bounded queue
/// - At most `concurrency` fetches are in flight at any instant
/// - A single coordinator task consumes all outcomes
/// - Each pending retry is an independent, cancellable timer task
///
/// # Dedup
///
/// By default every run gets a fresh [`DedupRegistry`]. A registry shared
/// through [`with_registry`](Self::with_registry) persists across runs:
/// keys that succeeded stay deduplicated, keys that failed may be fetched
/// again by a later run.
pub struct FetchEngine {
    config: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
    registry: Option<Arc<DedupRegistry>>,
    next_run: AtomicU64,
}

impl std::fmt::Debug for FetchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchEngine")
            .field("config", &self.config)
            .field("shared_registry", &self.registry.is_some())
            .finish_non_exhaustive()
    }
}

impl FetchEngine {
    /// Creates a new engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `concurrency` is
    /// outside 1-100, and [`EngineError::InvalidQueueCapacity`] if the queue
    /// capacity is zero.
    #[instrument(level = "debug", skip(fetcher))]
    pub fn new(config: EngineConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(EngineError::InvalidConcurrency {
                value: config.concurrency,
            });
        }
        if config.effective_queue_capacity() == 0 {
            return Err(EngineError::InvalidQueueCapacity);
        }

        debug!(
            concurrency = config.concurrency,
            queue_capacity = config.effective_queue_capacity(),
            max_attempts = config.retry_policy.max_attempts(),
            "creating fetch engine"
        );

        Ok(Self {
            config,
            fetcher,
            registry: None,
            next_run: AtomicU64::new(1),
        })
    }

    /// Shares `registry` across all runs of this engine.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<DedupRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }

    /// Starts a run session against `base_url`.
    ///
    /// The session observes `cancel`: cancelling it aborts pending retry
    /// timers and in-flight fetches.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, base_url: &str, cancel: &CancellationToken) -> RunSession {
        let run = RunId(self.next_run.fetch_add(1, Ordering::SeqCst));
        let registry = self
            .registry
            .clone()
            .unwrap_or_else(|| Arc::new(DedupRegistry::new()));

        RunSession::spawn(SessionParts {
            run,
            base_url: Arc::from(base_url),
            concurrency: self.config.concurrency,
            queue_capacity: self.config.effective_queue_capacity(),
            policy: self.config.retry_policy.clone(),
            fetcher: Arc::clone(&self.fetcher),
            registry,
            cancel: cancel.child_token(),
        })
    }

    /// Fetches every distinct key and returns one terminal record per key.
    ///
    /// Individual item failures do NOT cause this method to error; they
    /// are reported as [`ItemOutcome::Failed`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Join`] if a pipeline task panicked.
    pub async fn run<I, K>(&self, base_url: &str, keys: I) -> Result<RunReport, EngineError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.run_with_cancel(base_url, keys, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but stops early when `cancel` fires.
    ///
    /// Items that had not finished are reported as
    /// [`ItemOutcome::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Join`] if a pipeline task panicked.
    #[instrument(skip(self, keys, cancel))]
    pub async fn run_with_cancel<I, K>(
        &self,
        base_url: &str,
        keys: I,
        cancel: &CancellationToken,
    ) -> Result<RunReport, EngineError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut session = self.start(base_url, cancel);
        match session.submit_all(keys).await {
            Ok(accepted) => debug!(accepted, "all keys submitted"),
            Err(EngineError::Cancelled) => debug!("submission interrupted by cancellation"),
            Err(e) => return Err(e),
        }
        session.finish().await
    }
}

/// Fetches `keys` from `base_url` over HTTP with the given run parameters.
///
/// Convenience wrapper around [`FetchEngine`] with a default [`HttpClient`].
///
/// # Errors
///
/// Returns [`EngineError`] if the parameters are invalid or a pipeline task
/// panicked.
pub async fn fetch_items<I, K>(
    base_url: &str,
    keys: I,
    concurrency: usize,
    max_attempts: u32,
    backoff_schedule: Vec<Duration>,
) -> Result<RunReport, EngineError>
where
    I: IntoIterator<Item = K>,
    K: Into<String>,
{
    let config = EngineConfig::new(concurrency, max_attempts, backoff_schedule)?;
    let engine = FetchEngine::new(config, Arc::new(HttpClient::new()))?;
    engine.run(base_url, keys).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests;
