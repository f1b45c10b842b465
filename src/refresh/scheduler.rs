use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::pool::{RoundSummary, WorkerPool};
use super::refresher::RefreshFeed;
use crate::storage::{DatabaseError, FeedRepository};

/// Plain-value settings for [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrent refreshes per round
    pub pool_size: usize,
    /// A feed checked more recently than this is skipped
    pub stale_window: Duration,
    /// Rounds start this far apart, measured start to start
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 25,
            stale_window: Duration::from_secs(10 * 60),
            tick_interval: Duration::from_secs(60),
        }
    }
}

/// Drives refresh rounds forever.
///
/// Each round lists the feeds not checked within the stale window, hands
/// them to the worker pool and waits for all of them. The next round
/// starts one tick after the previous one *started*, or immediately if the
/// round took longer than a tick. Rounds never overlap.
pub struct Scheduler {
    repo: Arc<dyn FeedRepository>,
    handler: Arc<dyn RefreshFeed>,
    pool: WorkerPool,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn FeedRepository>,
        handler: Arc<dyn RefreshFeed>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repo,
            handler,
            pool: WorkerPool::new(config.pool_size),
            config,
        }
    }

    /// Run a single round.
    ///
    /// # Errors
    ///
    /// Returns the storage error if stale feeds cannot be listed; nothing
    /// is dispatched in that case.
    pub async fn run_round(&self) -> Result<RoundSummary, DatabaseError> {
        let cutoff = stale_cutoff(Utc::now(), self.config.stale_window);
        let feeds = self.repo.list_stale_feeds(cutoff).await?;
        if feeds.is_empty() {
            tracing::debug!("No stale feeds");
            return Ok(RoundSummary::default());
        }

        tracing::debug!(feeds = feeds.len(), "Refreshing stale feeds");
        Ok(self.pool.dispatch(feeds, Arc::clone(&self.handler)).await)
    }

    /// Run rounds until the task is dropped. Never returns.
    pub async fn run(&self) {
        tracing::info!(
            pool_size = self.pool.size(),
            stale_window_secs = self.config.stale_window.as_secs(),
            tick_secs = self.config.tick_interval.as_secs(),
            "Feed refresh scheduler started"
        );

        loop {
            let started = Instant::now();

            match self.run_round().await {
                Ok(summary) if summary.total() > 0 => {
                    tracing::info!(
                        feeds = summary.total(),
                        updated = summary.updated,
                        unchanged = summary.unchanged,
                        failed = summary.failed,
                        record_errors = summary.record_errors,
                        new_items = summary.new_items,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Refresh round complete"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to list stale feeds, skipping round");
                }
            }

            let Some(next) = started.checked_add(self.config.tick_interval) else {
                tracing::error!(
                    tick_secs = self.config.tick_interval.as_secs(),
                    "Tick interval is too large to schedule another round"
                );
                std::future::pending::<()>().await;
                continue;
            };
            if Instant::now() > next {
                tracing::warn!(
                    overrun_ms = (Instant::now() - next).as_millis() as u64,
                    "Refresh round outlasted the tick interval"
                );
            }
            tokio::time::sleep_until(next).await;
        }
    }

    /// Start [`run`](Self::run) as a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}

/// `now - window`, saturating at the earliest representable time.
pub fn stale_cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::FeedOutcome;
    use crate::storage::{Feed, MemoryRepository};
    use async_trait::async_trait;
    use chrono::TimeZone;

    #[test]
    fn test_stale_cutoff() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            stale_cutoff(now, Duration::from_secs(600)),
            Utc.with_ymd_and_hms(2024, 1, 1, 11, 50, 0).unwrap()
        );
        assert_eq!(stale_cutoff(now, Duration::ZERO), now);
        assert_eq!(stale_cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    struct Noop;

    #[async_trait]
    impl RefreshFeed for Noop {
        async fn refresh(&self, _feed: &Feed) -> FeedOutcome {
            FeedOutcome::Unchanged
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unschedulable_tick_keeps_loop_alive() {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_feed("https://example.com/rss");
        let config = SchedulerConfig {
            tick_interval: Duration::MAX,
            ..SchedulerConfig::default()
        };

        let task = Scheduler::new(repo, Arc::new(Noop), config).spawn();
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert!(!task.is_finished());
        task.abort();
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.pool_size, 25);
        assert_eq!(config.stale_window, Duration::from_secs(600));
        assert_eq!(config.tick_interval, Duration::from_secs(60));
    }
}
