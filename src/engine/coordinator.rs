//! Retry coordinator: turns outcomes into terminal records or delayed retries.
//!
//! The coordinator is the single consumer of the result sink. It never
//! sleeps itself; each retry delay runs on its own timer task, so a pending
//! backoff never stalls the processing of other outcomes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::message::{Attempt, AttemptResult, Outcome};
use super::queue::WorkQueue;
use super::registry::{DedupRegistry, RunId};
use super::report::{FetchStats, ItemOutcome, ItemReport};
use super::retry::{RetryDecision, RetryPolicy};
use super::tracker::CompletionTracker;

/// What the coordinator hands back once the result sink is closed.
#[derive(Debug, Default)]
pub(super) struct CoordinatorLog {
    /// Terminal records, in finishing order.
    pub finished: Vec<ItemReport>,
    /// Tries observed per key, including unfinished keys.
    pub attempts: HashMap<String, u32>,
}

pub(super) struct Coordinator {
    pub run: RunId,
    pub policy: RetryPolicy,
    pub outcomes: mpsc::Receiver<Outcome>,
    pub queue: WorkQueue,
    pub registry: Arc<DedupRegistry>,
    pub tracker: Arc<CompletionTracker>,
    pub stats: Arc<FetchStats>,
    pub cancel: CancellationToken,
    /// Live feed of terminal records; a dropped receiver is ignored.
    pub finished: mpsc::UnboundedSender<ItemReport>,
}

impl Coordinator {
    /// Consumes outcomes until every worker has dropped its sender.
    #[instrument(level = "debug", skip(self), fields(run = self.run.0))]
    pub async fn run(mut self) -> CoordinatorLog {
        let mut log = CoordinatorLog::default();
        let mut timers = JoinSet::new();

        loop {
            tokio::select! {
                outcome = self.outcomes.recv() => match outcome {
                    Some(outcome) => self.handle(outcome, &mut log, &mut timers),
                    None => break,
                },
                Some(joined) = timers.join_next(), if !timers.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "retry timer panicked");
                    }
                }
            }
        }

        // Only reachable with live timers when the run was cancelled
        if !timers.is_empty() {
            debug!(pending = timers.len(), "stopping retry timers");
            timers.shutdown().await;
        }

        log
    }

    fn handle(&self, outcome: Outcome, log: &mut CoordinatorLog, timers: &mut JoinSet<()>) {
        let Outcome { attempt, result } = outcome;
        log.attempts.insert(attempt.key.clone(), attempt.number + 1);

        match self.policy.decide(result.status(), attempt.number) {
            RetryDecision::Succeeded => {
                let body = match &result {
                    AttemptResult::Response(response) => response.body_text(),
                    AttemptResult::Transport(_) => String::new(),
                };
                info!(key = %attempt.key, attempts = attempt.number + 1, "item succeeded");
                self.registry.mark_succeeded(&attempt.key);
                self.stats.increment_succeeded();
                self.finish(log, attempt, ItemOutcome::Succeeded { body });
            }
            RetryDecision::Retry {
                delay,
                attempt: next_number,
            } => {
                debug!(
                    key = %attempt.key,
                    attempt = next_number,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    status = ?result.status(),
                    "retrying item"
                );
                self.stats.increment_retried();
                let next = attempt.next();
                debug_assert_eq!(next.number, next_number);
                timers.spawn(delayed_requeue(
                    next,
                    delay,
                    self.queue.clone(),
                    self.cancel.clone(),
                ));
            }
            RetryDecision::Exhausted { reason } => {
                let (last_status, last_error) = match result {
                    AttemptResult::Response(response) => (Some(response.status), None),
                    AttemptResult::Transport(error) => (None, Some(error)),
                };
                warn!(
                    key = %attempt.key,
                    attempts = attempt.number + 1,
                    ?last_status,
                    %reason,
                    "item failed after all attempts"
                );
                self.registry.mark_failed(&attempt.key, self.run);
                self.stats.increment_failed();
                self.finish(
                    log,
                    attempt,
                    ItemOutcome::Failed {
                        last_status,
                        last_error,
                    },
                );
            }
        }
    }

    fn finish(&self, log: &mut CoordinatorLog, attempt: Attempt, outcome: ItemOutcome) {
        let report = ItemReport {
            attempts: attempt.number + 1,
            key: attempt.key,
            outcome,
        };
        let _ = self.finished.send(report.clone());
        log.finished.push(report);
        self.tracker.decrement();
    }
}

/// Sleeps for `delay`, then puts `attempt` back on the work queue.
async fn delayed_requeue(
    attempt: Attempt,
    delay: Duration,
    queue: WorkQueue,
    cancel: CancellationToken,
) {
    let key = attempt.key.clone();
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!(%key, "retry timer cancelled");
        }
        pushed = async {
            tokio::time::sleep(delay).await;
            queue.push(attempt).await
        } => {
            if let Err(e) = pushed {
                debug!(%key, error = %e, "retry dropped");
            }
        }
    }
}
