//! Bounded work queue shared by the submission path, retry timers and workers.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::message::Attempt;

/// Returned by [`WorkQueue::push`] once the queue has been closed.
///
/// Carries the attempt that could not be queued.
#[derive(Debug, thiserror::Error)]
#[error("work queue closed")]
pub struct QueueClosed(pub Attempt);

/// Bounded multi-producer, multi-consumer FIFO of [`Attempt`]s.
///
/// Cloning yields another handle to the same queue. Consumers share the
/// receiving end behind an async mutex, so exactly one waiting worker
/// receives each attempt.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<Attempt>,
    rx: Arc<Mutex<mpsc::Receiver<Attempt>>>,
    closed: CancellationToken,
}

impl WorkQueue {
    /// Creates a queue holding at most `capacity` pending attempts.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. The engine validates capacity before
    /// building a queue.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            closed: CancellationToken::new(),
        }
    }

    /// Pushes an attempt, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the queue is closed before the attempt fits.
    pub async fn push(&self, attempt: Attempt) -> Result<(), QueueClosed> {
        if self.closed.is_cancelled() {
            return Err(QueueClosed(attempt));
        }

        let permit = tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            permit = self.tx.reserve() => permit.ok(),
        };

        match permit {
            Some(permit) => {
                trace!(key = %attempt.key, attempt = attempt.number, "queued attempt");
                permit.send(attempt);
                Ok(())
            }
            None => Err(QueueClosed(attempt)),
        }
    }

    /// Pulls the next attempt, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed.
    pub async fn pull(&self) -> Option<Attempt> {
        if self.closed.is_cancelled() {
            return None;
        }

        let mut rx = tokio::select! {
            biased;
            () = self.closed.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };

        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            attempt = rx.recv() => attempt,
        }
    }

    /// Closes the queue. Pending and future pushes fail, and every waiting
    /// or future pull returns `None`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Returns the number of attempts currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Returns `true` if no attempts are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
