use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::repository::FeedRepository;
use super::schema::Database;
use super::types::{feed_from_row, item_from_row, DatabaseError, Feed, FeedRow, Item, ItemRow, ParsedFeed};

const FEED_COLUMNS: &str = "id, name, url, last_fetch_time, etag, last_failure, \
                            last_failure_time, failure_count, creation_time";

impl Database {
    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// Get a single feed by id
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"))
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(feed_from_row))
    }

    /// Get all feeds ordered by id
    pub async fn get_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows: Vec<FeedRow> =
            sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(feed_from_row).collect())
    }

    /// Get the items of a feed in insertion order
    pub async fn get_items_for_feed(&self, feed_id: i64) -> Result<Vec<Item>, DatabaseError> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            r#"
                SELECT id, feed_id, url, title, body, publication_time, creation_time
                FROM items
                WHERE feed_id = ?
                ORDER BY id
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(item_from_row).collect())
    }
}

// ============================================================================
// Fetch Outcome Recording
// ============================================================================

#[async_trait]
impl FeedRepository for Database {
    async fn list_stale_feeds(&self, cutoff: DateTime<Utc>) -> Result<Vec<Feed>, DatabaseError> {
        let rows: Vec<FeedRow> = sqlx::query_as(&format!(
            r#"
                SELECT {FEED_COLUMNS}
                FROM feeds
                WHERE (last_fetch_time IS NULL OR last_fetch_time < ?1)
                  AND (last_failure_time IS NULL OR last_failure_time < ?1)
                ORDER BY id
            "#
        ))
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(feed_from_row).collect())
    }

    /// Runs in a single transaction: the feed row, new items and unread
    /// markers either all land or none do.
    async fn record_fetch_success(
        &self,
        feed_id: i64,
        feed: &ParsedFeed,
        etag: Option<&str>,
        fetch_time: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let now = fetch_time.timestamp();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE feeds SET name = ?, etag = ?, last_fetch_time = ?,
                 last_failure = NULL, last_failure_time = NULL, failure_count = 0
             WHERE id = ?",
        )
        .bind(&feed.name)
        .bind(etag)
        .bind(now)
        .bind(feed_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(DatabaseError::FeedNotFound(feed_id));
        }

        let mut inserted = 0;
        for item in &feed.items {
            // RETURNING yields no row when the conflict clause skipped the insert.
            let new_id: Option<(i64,)> = sqlx::query_as(
                "INSERT INTO items (feed_id, url, title, body, publication_time, creation_time)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(feed_id, url) DO NOTHING
                 RETURNING id",
            )
            .bind(feed_id)
            .bind(&item.url)
            .bind(&item.title)
            .bind(&item.body)
            .bind(item.publication_time.map(|t| t.timestamp()))
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((item_id,)) = new_id {
                inserted += 1;
                sqlx::query(
                    "INSERT OR IGNORE INTO unread_items (user_id, feed_id, item_id)
                     SELECT user_id, feed_id, ? FROM subscriptions WHERE feed_id = ?",
                )
                .bind(item_id)
                .bind(feed_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn record_fetch_unchanged(
        &self,
        feed_id: i64,
        fetch_time: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let updated = sqlx::query(
            "UPDATE feeds SET last_fetch_time = ?,
                 last_failure = NULL, last_failure_time = NULL, failure_count = 0
             WHERE id = ?",
        )
        .bind(fetch_time.timestamp())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(DatabaseError::FeedNotFound(feed_id));
        }
        Ok(())
    }

    async fn record_fetch_failure(
        &self,
        feed_id: i64,
        message: &str,
        fetch_time: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let count: Option<(i64,)> = sqlx::query_as(
            "UPDATE feeds SET last_failure = ?, last_failure_time = ?,
                 failure_count = failure_count + 1
             WHERE id = ? RETURNING failure_count",
        )
        .bind(message)
        .bind(fetch_time.timestamp())
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        count
            .map(|(n,)| n)
            .ok_or(DatabaseError::FeedNotFound(feed_id))
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, DatabaseError, FeedRepository, ParsedFeed, ParsedItem};
    use chrono::{DateTime, TimeZone, Utc};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn parsed(urls: &[&str]) -> ParsedFeed {
        ParsedFeed {
            name: "Example Feed".to_string(),
            items: urls
                .iter()
                .map(|u| ParsedItem {
                    url: u.to_string(),
                    title: format!("Title of {u}"),
                    publication_time: Some(at(-3600)),
                    body: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_list_stale_includes_never_checked() {
        let db = test_db().await;
        let id = db.subscribe(1, "https://a.example.com/rss").await.unwrap();

        let stale = db.list_stale_feeds(at(0)).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, id);
    }

    #[tokio::test]
    async fn test_list_stale_uses_latest_check() {
        let db = test_db().await;
        let fetched = db.subscribe(1, "https://a.example.com/rss").await.unwrap();
        let failed_after_fetch = db.subscribe(1, "https://b.example.com/rss").await.unwrap();

        db.record_fetch_unchanged(fetched, at(0)).await.unwrap();
        db.record_fetch_unchanged(failed_after_fetch, at(0)).await.unwrap();
        db.record_fetch_failure(failed_after_fetch, "boom", at(600))
            .await
            .unwrap();

        let ids: Vec<i64> = db
            .list_stale_feeds(at(300))
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![fetched]);

        // The cutoff is exclusive
        let ids: Vec<i64> = db
            .list_stale_feeds(at(600))
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![fetched]);
    }

    #[tokio::test]
    async fn test_record_success_returns_new_item_count() {
        let db = test_db().await;
        let id = db.subscribe(1, "https://a.example.com/rss").await.unwrap();

        let first = db
            .record_fetch_success(id, &parsed(&["u1", "u2"]), Some("e1"), at(0))
            .await
            .unwrap();
        let second = db
            .record_fetch_success(id, &parsed(&["u2", "u3"]), Some("e2"), at(60))
            .await
            .unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 1);

        let urls: Vec<String> = db
            .get_items_for_feed(id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.url)
            .collect();
        assert_eq!(urls, vec!["u1", "u2", "u3"]);
    }

    #[tokio::test]
    async fn test_duplicate_urls_within_one_document_insert_once() {
        let db = test_db().await;
        let id = db.subscribe(1, "https://a.example.com/rss").await.unwrap();

        let inserted = db
            .record_fetch_success(id, &parsed(&["u1", "u1"]), None, at(0))
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(db.get_items_for_feed(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outcomes_for_unknown_feed_error() {
        let db = test_db().await;

        let result = db.record_fetch_unchanged(42, at(0)).await;
        assert!(matches!(result, Err(DatabaseError::FeedNotFound(42))));

        let result = db.record_fetch_failure(42, "boom", at(0)).await;
        assert!(matches!(result, Err(DatabaseError::FeedNotFound(42))));

        let result = db.record_fetch_success(42, &parsed(&["u1"]), None, at(0)).await;
        assert!(matches!(result, Err(DatabaseError::FeedNotFound(42))));
    }

    #[tokio::test]
    async fn test_failure_count_returned() {
        let db = test_db().await;
        let id = db.subscribe(1, "https://a.example.com/rss").await.unwrap();

        assert_eq!(db.record_fetch_failure(id, "one", at(0)).await.unwrap(), 1);
        assert_eq!(db.record_fetch_failure(id, "two", at(60)).await.unwrap(), 2);

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.last_failure.as_deref(), Some("two"));
        assert_eq!(feed.last_failure_time, Some(at(60)));
    }
}
