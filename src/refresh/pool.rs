use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use super::refresher::{FeedOutcome, RefreshFeed};
use crate::storage::Feed;

/// Outcome counts for one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub record_errors: usize,
    pub new_items: usize,
}

impl RoundSummary {
    /// Feeds that reported an outcome
    pub fn total(&self) -> usize {
        self.updated + self.unchanged + self.failed + self.record_errors
    }

    pub fn record(&mut self, outcome: &FeedOutcome) {
        match outcome {
            FeedOutcome::Updated { new_items } => {
                self.updated += 1;
                self.new_items += new_items;
            }
            FeedOutcome::Unchanged => self.unchanged += 1,
            FeedOutcome::Failed(_) => self.failed += 1,
            FeedOutcome::RecordFailed(_) => self.record_errors += 1,
        }
    }
}

/// Fixed-size set of workers draining a shared feed queue.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    /// A pool of at least one worker
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Refresh every feed exactly once and wait for all workers to finish.
    ///
    /// Starts `size` workers that pull from a shared queue, so at most
    /// `size` feeds are in flight at any time. Returns once the queue is
    /// drained and every worker has exited.
    pub async fn dispatch(&self, feeds: Vec<Feed>, handler: Arc<dyn RefreshFeed>) -> RoundSummary {
        let (tx, rx) = mpsc::channel::<Feed>(self.size);
        let rx = Arc::new(Mutex::new(rx));
        // Outcomes are reported per feed so a worker that panics still
        // counts the feeds it finished before.
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<FeedOutcome>();
        let mut workers = JoinSet::new();

        for _ in 0..self.size {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&handler);
            let outcome_tx = outcome_tx.clone();
            workers.spawn(async move {
                loop {
                    // The lock is held only while waiting for the next feed.
                    let next = rx.lock().await.recv().await;
                    let Some(feed) = next else { break };
                    let outcome = handler.refresh(&feed).await;
                    if outcome_tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(outcome_tx);

        let total = feeds.len();
        for (queued, feed) in feeds.into_iter().enumerate() {
            if tx.send(feed).await.is_err() {
                tracing::error!(
                    dropped = total - queued,
                    "All refresh workers exited before the queue drained"
                );
                break;
            }
        }
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Refresh worker panicked");
            }
        }

        let mut summary = RoundSummary::default();
        while let Some(outcome) = outcome_rx.recv().await {
            summary.record(&outcome);
        }
        summary
    }
}
