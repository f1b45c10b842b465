use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::feed::{parse_feed, FetchOutcome, Fetcher};
use crate::storage::{DatabaseError, Feed, FeedRepository};

/// What happened to one feed during a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// 200 and parsed; `new_items` were not stored before
    Updated { new_items: usize },
    /// 304
    Unchanged,
    /// Fetch or parse failed; the message was recorded on the feed
    Failed(String),
    /// The outcome could not be written to storage
    RecordFailed(String),
}

/// Handles a single feed end to end. The worker pool calls this once per
/// feed per round.
#[async_trait]
pub trait RefreshFeed: Send + Sync {
    async fn refresh(&self, feed: &Feed) -> FeedOutcome;
}

/// Fetch, parse and record one feed.
pub struct FeedRefresher {
    fetcher: Fetcher,
    repo: Arc<dyn FeedRepository>,
}

impl FeedRefresher {
    pub fn new(fetcher: Fetcher, repo: Arc<dyn FeedRepository>) -> Self {
        Self { fetcher, repo }
    }

    async fn record_failure(&self, feed: &Feed, message: String) -> Result<FeedOutcome, DatabaseError> {
        let failures = self
            .repo
            .record_fetch_failure(feed.id, &message, Utc::now())
            .await?;
        tracing::warn!(
            feed_id = feed.id,
            url = %feed.url,
            failures,
            error = %message,
            "Feed refresh failed"
        );
        Ok(FeedOutcome::Failed(message))
    }
}

#[async_trait]
impl RefreshFeed for FeedRefresher {
    async fn refresh(&self, feed: &Feed) -> FeedOutcome {
        let fetched = self.fetcher.fetch(&feed.url, feed.etag.as_deref()).await;

        let recorded = match fetched {
            Ok(FetchOutcome::NotModified) => {
                tracing::debug!(feed_id = feed.id, url = %feed.url, "Feed unchanged (304)");
                self.repo
                    .record_fetch_unchanged(feed.id, Utc::now())
                    .await
                    .map(|()| FeedOutcome::Unchanged)
            }
            Ok(FetchOutcome::Fetched(raw)) => match parse_feed(&raw.body) {
                Ok(parsed) => self
                    .repo
                    .record_fetch_success(feed.id, &parsed, raw.etag.as_deref(), Utc::now())
                    .await
                    .map(|new_items| {
                        tracing::info!(
                            feed_id = feed.id,
                            url = %feed.url,
                            items = parsed.items.len(),
                            new_items,
                            "Feed refreshed"
                        );
                        FeedOutcome::Updated { new_items }
                    }),
                Err(e) => {
                    self.record_failure(feed, format!("Unable to parse feed: {e}"))
                        .await
                }
            },
            Err(e) => self.record_failure(feed, e.to_string()).await,
        };

        recorded.unwrap_or_else(|e| {
            tracing::error!(
                feed_id = feed.id,
                url = %feed.url,
                error = %e,
                "Failed to record feed refresh outcome"
            );
            FeedOutcome::RecordFailed(e.to_string())
        })
    }
}
