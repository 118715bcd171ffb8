//! A live pipeline accepting submissions.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::EngineError;
use super::coordinator::{Coordinator, CoordinatorLog};
use super::message::Attempt;
use super::queue::WorkQueue;
use super::registry::{DedupRegistry, RunId};
use super::report::{FetchStats, ItemOutcome, ItemReport, RunReport};
use super::retry::RetryPolicy;
use super::tracker::CompletionTracker;
use super::worker::Worker;
use crate::fetch::Fetcher;

/// Inputs for spawning one pipeline. Built by [`FetchEngine::start`](super::FetchEngine::start).
pub(super) struct SessionParts {
    pub run: RunId,
    pub base_url: Arc<str>,
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub policy: RetryPolicy,
    pub fetcher: Arc<dyn Fetcher>,
    pub registry: Arc<DedupRegistry>,
    pub cancel: CancellationToken,
}

/// One run of the fetch pipeline.
///
/// Keys are submitted incrementally with [`submit`](Self::submit); the
/// workers start fetching immediately. [`settled`](Self::settled) waits for
/// all work submitted so far, including retries, without closing the
/// session. [`finish`](Self::finish) closes submissions, waits for the last
/// item, tears the pipeline down and returns the [`RunReport`].
///
/// Dropping a session without calling `finish` cancels it.
#[derive(Debug)]
pub struct RunSession {
    run: RunId,
    registry: Arc<DedupRegistry>,
    tracker: Arc<CompletionTracker>,
    queue: WorkQueue,
    stats: Arc<FetchStats>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    coordinator: Option<JoinHandle<CoordinatorLog>>,
    accepted: Vec<String>,
    item_reports: Option<mpsc::UnboundedReceiver<ItemReport>>,
    open: bool,
    started: Instant,
}

impl RunSession {
    pub(super) fn spawn(parts: SessionParts) -> Self {
        let SessionParts {
            run,
            base_url,
            concurrency,
            queue_capacity,
            policy,
            fetcher,
            registry,
            cancel,
        } = parts;

        let queue = WorkQueue::new(queue_capacity);
        let tracker = Arc::new(CompletionTracker::new());
        let stats = Arc::new(FetchStats::new());
        let (outcome_tx, outcome_rx) = mpsc::channel(concurrency);
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        let workers = (0..concurrency)
            .map(|id| {
                tokio::spawn(
                    Worker {
                        id,
                        base_url: Arc::clone(&base_url),
                        fetcher: Arc::clone(&fetcher),
                        queue: queue.clone(),
                        outcomes: outcome_tx.clone(),
                        stats: Arc::clone(&stats),
                        cancel: cancel.clone(),
                    }
                    .run(),
                )
            })
            .collect();
        // Workers hold the only senders, so the sink closes when they exit
        drop(outcome_tx);

        let coordinator = tokio::spawn(
            Coordinator {
                run,
                policy,
                outcomes: outcome_rx,
                queue: queue.clone(),
                registry: Arc::clone(&registry),
                tracker: Arc::clone(&tracker),
                stats: Arc::clone(&stats),
                cancel: cancel.clone(),
                finished: finished_tx,
            }
            .run(),
        );

        debug!(run = run.0, concurrency, queue_capacity, "pipeline started");

        Self {
            run,
            registry,
            tracker,
            queue,
            stats,
            cancel,
            workers,
            coordinator: Some(coordinator),
            accepted: Vec::new(),
            item_reports: Some(finished_rx),
            open: true,
            started: Instant::now(),
        }
    }

    /// Submits one key.
    ///
    /// Returns `Ok(true)` if the key was first-seen and queued, `Ok(false)`
    /// if it was a duplicate. Waits while the work queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SubmissionsClosed`] after
    /// [`close_submissions`](Self::close_submissions), and
    /// [`EngineError::Cancelled`] once the run is cancelled.
    pub async fn submit(&mut self, key: impl Into<String>) -> Result<bool, EngineError> {
        if !self.open {
            return Err(EngineError::SubmissionsClosed);
        }
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let key = key.into();
        if !self.registry.claim(&key, self.run) {
            debug!(%key, "duplicate key skipped");
            self.stats.increment_duplicates();
            return Ok(false);
        }

        // Count the item before its attempt becomes visible to workers
        self.tracker.increment();
        self.accepted.push(key.clone());

        let pushed = tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            pushed = self.queue.push(Attempt::initial(key)) => pushed.is_ok(),
        };
        if pushed {
            Ok(true)
        } else {
            Err(EngineError::Cancelled)
        }
    }

    /// Submits every key in order, returning how many were first-seen.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub async fn submit_all<I, K>(&mut self, keys: I) -> Result<usize, EngineError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut accepted = 0;
        for key in keys {
            if self.submit(key).await? {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    /// Takes the live feed of terminal records.
    ///
    /// Each succeeded or failed item is sent as soon as it finishes. The
    /// feed ends once [`finish`](Self::finish) has torn the pipeline down.
    /// Cancelled items only appear in the final [`RunReport`]. Returns
    /// `None` if the feed was already taken.
    pub fn take_item_reports(&mut self) -> Option<mpsc::UnboundedReceiver<ItemReport>> {
        self.item_reports.take()
    }

    /// Stops accepting submissions. Work already submitted keeps running.
    pub fn close_submissions(&mut self) {
        self.open = false;
    }

    /// Returns `true` while submissions are accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Returns the number of submitted items not yet terminal.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.tracker.outstanding()
    }

    /// Returns live statistics for this run.
    #[must_use]
    pub fn stats(&self) -> &FetchStats {
        &self.stats
    }

    /// Waits until every item submitted so far is terminal, or the run is
    /// cancelled. The session stays open.
    pub async fn settled(&self) {
        tokio::select! {
            () = self.tracker.wait_zero() => {}
            () = self.cancel.cancelled() => {}
        }
    }

    /// Closes submissions, waits for all items, and tears down the pipeline.
    ///
    /// If the run is cancelled first, items that had not finished are
    /// reported as [`ItemOutcome::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Join`] if the coordinator task panicked.
    #[instrument(skip(self), fields(run = self.run.0))]
    pub async fn finish(mut self) -> Result<RunReport, EngineError> {
        self.open = false;
        self.settled().await;

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            info!(outstanding = self.tracker.outstanding(), "run cancelled");
        }

        self.queue.close();

        for joined in join_all(std::mem::take(&mut self.workers)).await {
            // Ignore JoinError - a panicked worker is logged, the run still reports
            if let Err(e) = joined {
                warn!(error = %e, "worker task panicked");
            }
        }

        let log = match self.coordinator.take() {
            Some(handle) => handle.await?,
            None => CoordinatorLog::default(),
        };

        Ok(self.build_report(log, cancelled))
    }

    fn build_report(&mut self, log: CoordinatorLog, cancelled: bool) -> RunReport {
        let CoordinatorLog {
            mut finished,
            attempts,
        } = log;

        if finished.len() < self.accepted.len() {
            let done: std::collections::HashSet<&str> =
                finished.iter().map(|item| item.key.as_str()).collect();
            let unfinished: Vec<ItemReport> = self
                .accepted
                .iter()
                .filter(|key| !done.contains(key.as_str()))
                .map(|key| {
                    // Neither in flight nor failed any more
                    self.registry.release(key, self.run);
                    ItemReport {
                        key: key.clone(),
                        attempts: attempts.get(key).copied().unwrap_or(0),
                        outcome: ItemOutcome::Cancelled,
                    }
                })
                .collect();
            finished.extend(unfinished);
        }

        let report = RunReport {
            items: finished,
            calls: self.stats.calls(),
            retried: self.stats.retried(),
            duplicates: self.stats.duplicates(),
            cancelled,
            elapsed: self.started.elapsed(),
        };

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled_items = report.cancelled_items(),
            calls = report.calls,
            retried = report.retried,
            duplicates = report.duplicates,
            elapsed_ms = report.elapsed.as_millis(),
            "run complete"
        );

        report
    }
}

impl Drop for RunSession {
    fn drop(&mut self) {
        if self.coordinator.is_some() {
            self.cancel.cancel();
            self.queue.close();
        }
    }
}
