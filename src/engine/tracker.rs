//! Outstanding-work counter with wait-until-zero.

use tokio::sync::watch;
use tracing::warn;

/// Counts items that have not reached a terminal state.
///
/// The count is published through a watch channel, so a waiter that
/// subscribes after the count already reached zero still observes it.
#[derive(Debug)]
pub struct CompletionTracker {
    outstanding: watch::Sender<usize>,
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionTracker {
    /// Creates a tracker with zero outstanding items.
    #[must_use]
    pub fn new() -> Self {
        let (outstanding, _) = watch::channel(0);
        Self { outstanding }
    }

    /// Records one more outstanding item.
    ///
    /// Must be called before the item's initial attempt is queued.
    pub fn increment(&self) {
        self.outstanding.send_modify(|count| *count += 1);
    }

    /// Records that one item reached a terminal state.
    pub fn decrement(&self) {
        let decremented = self.outstanding.send_if_modified(|count| {
            if *count == 0 {
                false
            } else {
                *count -= 1;
                true
            }
        });
        if !decremented {
            warn!("completion tracker decremented below zero; ignoring");
        }
    }

    /// Returns the current outstanding count.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Waits until the outstanding count is zero.
    ///
    /// Returns immediately if it already is.
    pub async fn wait_zero(&self) {
        let mut rx = self.outstanding.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}
