use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors surfaced to the refresh pipeline
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another instance of pithy appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// An outcome was recorded against a feed id that does not exist
    #[error("Feed {0} not found")]
    FeedNotFound(i64),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for feed queries:
/// (id, name, url, last_fetch_time, etag, last_failure, last_failure_time,
///  failure_count, creation_time)
pub(crate) type FeedRow = (
    i64,
    String,
    String,
    Option<i64>,
    Option<String>,
    Option<String>,
    Option<i64>,
    i64,
    i64,
);

/// Row type for item queries:
/// (id, feed_id, url, title, body, publication_time, creation_time)
pub(crate) type ItemRow = (
    i64,
    i64,
    String,
    String,
    Option<String>,
    Option<i64>,
    i64,
);

/// Timestamps are stored as Unix seconds.
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

pub(crate) fn feed_from_row(row: FeedRow) -> Feed {
    let (
        id,
        name,
        url,
        last_fetch_time,
        etag,
        last_failure,
        last_failure_time,
        failure_count,
        creation_time,
    ) = row;
    Feed {
        id,
        name,
        url,
        last_fetch_time: last_fetch_time.map(from_unix),
        etag,
        last_failure,
        last_failure_time: last_failure_time.map(from_unix),
        failure_count,
        creation_time: from_unix(creation_time),
    }
}

pub(crate) fn item_from_row(row: ItemRow) -> Item {
    let (id, feed_id, url, title, body, publication_time, creation_time) = row;
    Item {
        id,
        feed_id,
        url,
        title,
        body,
        publication_time: publication_time.map(from_unix),
        creation_time: from_unix(creation_time),
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed and the bookkeeping of its most recent fetch attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    /// Unique across all feeds
    pub url: String,
    /// Time of the last successful or not-modified fetch
    pub last_fetch_time: Option<DateTime<Utc>>,
    /// Entity tag returned by the origin on the last successful fetch
    pub etag: Option<String>,
    pub last_failure: Option<String>,
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Failures since the last successful or not-modified fetch
    pub failure_count: i64,
    pub creation_time: DateTime<Utc>,
}

impl Feed {
    /// The most recent check of this feed, successful or not.
    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        match (self.last_fetch_time, self.last_failure_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// A feed never checked is always stale.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_checked().is_none_or(|checked| checked < cutoff)
    }
}

/// A stored feed item. `(feed_id, url)` is unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub url: String,
    pub title: String,
    pub body: Option<String>,
    pub publication_time: Option<DateTime<Utc>>,
    pub creation_time: DateTime<Utc>,
}

/// A feed document after parsing, before it touches storage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedFeed {
    pub name: String,
    pub items: Vec<ParsedItem>,
}

/// One entry of a [`ParsedFeed`], in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedItem {
    pub url: String,
    pub title: String,
    pub publication_time: Option<DateTime<Utc>>,
    pub body: Option<String>,
}

impl ParsedFeed {
    /// Name is non-empty and every item has a url.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && self.items.iter().all(|item| !item.url.is_empty())
    }
}
