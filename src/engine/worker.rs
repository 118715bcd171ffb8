//! Worker loop: pull an attempt, fetch it, forward the outcome.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::message::{AttemptResult, Outcome};
use super::queue::WorkQueue;
use super::report::FetchStats;
use crate::fetch::Fetcher;

/// Everything one worker needs. Each worker owns its own copy.
pub(super) struct Worker {
    pub id: usize,
    pub base_url: Arc<str>,
    pub fetcher: Arc<dyn Fetcher>,
    pub queue: WorkQueue,
    pub outcomes: mpsc::Sender<Outcome>,
    pub stats: Arc<FetchStats>,
    pub cancel: CancellationToken,
}

impl Worker {
    /// Runs until the queue is closed, the run is cancelled, or the
    /// coordinator stops accepting outcomes.
    #[instrument(level = "debug", skip(self), fields(worker = self.id))]
    pub async fn run(self) {
        loop {
            let attempt = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                attempt = self.queue.pull() => match attempt {
                    Some(attempt) => attempt,
                    None => break,
                },
            };

            trace!(key = %attempt.key, attempt = attempt.number, "fetching");
            self.stats.increment_calls();

            let fetched = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!(key = %attempt.key, "fetch abandoned on cancellation");
                    break;
                }
                fetched = self.fetcher.fetch(&self.base_url, &attempt.key) => fetched,
            };

            let result = match fetched {
                Ok(response) => AttemptResult::Response(response),
                Err(e) => {
                    debug!(key = %attempt.key, error = %e, "transport failure");
                    AttemptResult::Transport(e.to_string())
                }
            };

            if self.outcomes.send(Outcome { attempt, result }).await.is_err() {
                debug!("result sink closed");
                break;
            }
        }

        trace!("worker exiting");
    }
}
