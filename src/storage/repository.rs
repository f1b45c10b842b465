use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{DatabaseError, Feed, ParsedFeed};

/// The storage capabilities the refresh pipeline depends on.
///
/// Each `record_*` call is one of three mutually exclusive outcomes of a
/// single fetch attempt. Implementations must be safe to call from many
/// tasks at once; calls for distinct feeds touch disjoint rows.
#[async_trait]
pub trait FeedRepository: Send + Sync {
    /// Feeds whose most recent check (success or failure) is older than
    /// `cutoff`, including feeds that were never checked.
    async fn list_stale_feeds(&self, cutoff: DateTime<Utc>) -> Result<Vec<Feed>, DatabaseError>;

    /// Store a successful fetch.
    ///
    /// Updates name, etag and `last_fetch_time`, clears failure state and
    /// inserts every item whose `(feed_id, url)` is not already stored. Each
    /// newly inserted item becomes unread for every subscriber of the feed.
    ///
    /// # Returns
    ///
    /// The number of newly inserted items.
    async fn record_fetch_success(
        &self,
        feed_id: i64,
        feed: &ParsedFeed,
        etag: Option<&str>,
        fetch_time: DateTime<Utc>,
    ) -> Result<usize, DatabaseError>;

    /// Store a "not modified" response: `last_fetch_time` only, failure state cleared.
    async fn record_fetch_unchanged(
        &self,
        feed_id: i64,
        fetch_time: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Store a failed attempt. `last_fetch_time`, name, etag and items stay as they are.
    ///
    /// # Returns
    ///
    /// The feed's failure count after this attempt.
    async fn record_fetch_failure(
        &self,
        feed_id: i64,
        message: &str,
        fetch_time: DateTime<Utc>,
    ) -> Result<i64, DatabaseError>;
}
