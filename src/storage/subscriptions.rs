use super::schema::Database;
use super::types::{item_from_row, DatabaseError, Item, ItemRow};

impl Database {
    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Subscribe a user to a feed URL, creating the feed on first use.
    ///
    /// There is exactly one feed row per URL, shared by all subscribers.
    /// A new feed is named after its URL until its first successful fetch.
    ///
    /// # Returns
    ///
    /// The feed id.
    pub async fn subscribe(&self, user_id: i64, url: &str) -> Result<i64, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO feeds (name, url, creation_time) VALUES (?, ?, ?)
             ON CONFLICT(url) DO NOTHING",
        )
        .bind(url)
        .bind(url)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let (feed_id,): (i64,) = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("INSERT OR IGNORE INTO subscriptions (user_id, feed_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(user_id, feed_id, url = %url, "Subscribed");
        Ok(feed_id)
    }

    /// Remove a user's subscription, deleting the feed once nobody subscribes to it.
    ///
    /// # Returns
    ///
    /// `true` if the feed itself was deleted.
    pub async fn unsubscribe(&self, user_id: i64, feed_id: i64) -> Result<bool, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM unread_items WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        // Items and unread markers cascade with the feed.
        let deleted = sqlx::query(
            "DELETE FROM feeds WHERE id = ?
             AND NOT EXISTS (SELECT 1 FROM subscriptions WHERE feed_id = ?)",
        )
        .bind(feed_id)
        .bind(feed_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }

    /// Ids of the users subscribed to a feed
    pub async fn get_subscribers(&self, feed_id: i64) -> Result<Vec<i64>, DatabaseError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT user_id FROM subscriptions WHERE feed_id = ? ORDER BY user_id")
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // ========================================================================
    // Unread Items
    // ========================================================================

    /// Items the user has not read yet, oldest insertion first
    pub async fn get_unread_items(&self, user_id: i64) -> Result<Vec<Item>, DatabaseError> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            r#"
                SELECT i.id, i.feed_id, i.url, i.title, i.body, i.publication_time, i.creation_time
                FROM unread_items u
                JOIN items i ON i.id = u.item_id
                WHERE u.user_id = ?
                ORDER BY i.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(item_from_row).collect())
    }

    /// Mark an item read for one user
    ///
    /// # Returns
    ///
    /// `false` if the item was not unread for that user.
    pub async fn mark_item_read(&self, user_id: i64, item_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM unread_items WHERE user_id = ? AND item_id = ?")
            .bind(user_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
