//! In-memory [`FeedRepository`] with the same outcome semantics as the
//! SQLite store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use super::repository::FeedRepository;
use super::types::{DatabaseError, Feed, Item, ParsedFeed};

#[derive(Default)]
struct State {
    feeds: BTreeMap<i64, Feed>,
    items: Vec<Item>,
    /// (user_id, feed_id)
    subscriptions: BTreeSet<(i64, i64)>,
    /// (user_id, item_id)
    unread: BTreeSet<(i64, i64)>,
    next_feed_id: i64,
    next_item_id: i64,
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation completes before the guard drops, so poisoned state is still consistent.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a feed with the given url, or return the existing one's id.
    pub fn add_feed(&self, url: &str) -> i64 {
        let mut state = self.state();
        if let Some(feed) = state.feeds.values().find(|f| f.url == url) {
            return feed.id;
        }
        state.next_feed_id += 1;
        let id = state.next_feed_id;
        state.feeds.insert(
            id,
            Feed {
                id,
                name: url.to_string(),
                url: url.to_string(),
                last_fetch_time: None,
                etag: None,
                last_failure: None,
                last_failure_time: None,
                failure_count: 0,
                creation_time: Utc::now(),
            },
        );
        id
    }

    /// Insert a feed exactly as given, replacing any feed with the same id.
    pub fn insert_feed(&self, feed: Feed) {
        let mut state = self.state();
        state.next_feed_id = state.next_feed_id.max(feed.id);
        state.feeds.insert(feed.id, feed);
    }

    pub fn subscribe(&self, user_id: i64, url: &str) -> i64 {
        let feed_id = self.add_feed(url);
        self.state().subscriptions.insert((user_id, feed_id));
        feed_id
    }

    pub fn feed(&self, feed_id: i64) -> Option<Feed> {
        self.state().feeds.get(&feed_id).cloned()
    }

    pub fn feeds(&self) -> Vec<Feed> {
        self.state().feeds.values().cloned().collect()
    }

    /// Items of one feed in insertion order
    pub fn items(&self, feed_id: i64) -> Vec<Item> {
        self.state()
            .items
            .iter()
            .filter(|i| i.feed_id == feed_id)
            .cloned()
            .collect()
    }

    pub fn unread_items(&self, user_id: i64) -> Vec<Item> {
        let state = self.state();
        state
            .items
            .iter()
            .filter(|i| state.unread.contains(&(user_id, i.id)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl FeedRepository for MemoryRepository {
    async fn list_stale_feeds(&self, cutoff: DateTime<Utc>) -> Result<Vec<Feed>, DatabaseError> {
        Ok(self
            .state()
            .feeds
            .values()
            .filter(|f| f.is_stale(cutoff))
            .cloned()
            .collect())
    }

    async fn record_fetch_success(
        &self,
        feed_id: i64,
        feed: &ParsedFeed,
        etag: Option<&str>,
        fetch_time: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let mut state = self.state();
        let stored = state
            .feeds
            .get_mut(&feed_id)
            .ok_or(DatabaseError::FeedNotFound(feed_id))?;
        stored.name = feed.name.clone();
        stored.etag = etag.map(str::to_string);
        stored.last_fetch_time = Some(fetch_time);
        stored.last_failure = None;
        stored.last_failure_time = None;
        stored.failure_count = 0;

        let subscribers: Vec<i64> = state
            .subscriptions
            .iter()
            .filter(|(_, f)| *f == feed_id)
            .map(|(u, _)| *u)
            .collect();

        let mut inserted = 0;
        for parsed in &feed.items {
            let exists = state
                .items
                .iter()
                .any(|i| i.feed_id == feed_id && i.url == parsed.url);
            if exists {
                continue;
            }
            state.next_item_id += 1;
            let item_id = state.next_item_id;
            state.items.push(Item {
                id: item_id,
                feed_id,
                url: parsed.url.clone(),
                title: parsed.title.clone(),
                body: parsed.body.clone(),
                publication_time: parsed.publication_time,
                creation_time: fetch_time,
            });
            for user_id in &subscribers {
                state.unread.insert((*user_id, item_id));
            }
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn record_fetch_unchanged(
        &self,
        feed_id: i64,
        fetch_time: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state();
        let stored = state
            .feeds
            .get_mut(&feed_id)
            .ok_or(DatabaseError::FeedNotFound(feed_id))?;
        stored.last_fetch_time = Some(fetch_time);
        stored.last_failure = None;
        stored.last_failure_time = None;
        stored.failure_count = 0;
        Ok(())
    }

    async fn record_fetch_failure(
        &self,
        feed_id: i64,
        message: &str,
        fetch_time: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let mut state = self.state();
        let stored = state
            .feeds
            .get_mut(&feed_id)
            .ok_or(DatabaseError::FeedNotFound(feed_id))?;
        stored.last_failure = Some(message.to_string());
        stored.last_failure_time = Some(fetch_time);
        stored.failure_count += 1;
        Ok(stored.failure_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ParsedItem;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn parsed(urls: &[&str]) -> ParsedFeed {
        ParsedFeed {
            name: "Feed".to_string(),
            items: urls
                .iter()
                .map(|u| ParsedItem {
                    url: u.to_string(),
                    title: u.to_uppercase(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_unchanged_keeps_name_and_etag() {
        let repo = MemoryRepository::new();
        let id = repo.add_feed("https://example.com/rss");
        repo.record_fetch_success(id, &parsed(&["a"]), Some("v1"), at(0))
            .await
            .unwrap();
        repo.record_fetch_failure(id, "timeout", at(30)).await.unwrap();

        repo.record_fetch_unchanged(id, at(60)).await.unwrap();

        let feed = repo.feed(id).unwrap();
        assert_eq!(feed.name, "Feed");
        assert_eq!(feed.etag.as_deref(), Some("v1"));
        assert_eq!(feed.last_fetch_time, Some(at(60)));
        assert_eq!(feed.failure_count, 0);
        assert!(feed.last_failure.is_none());
        assert_eq!(repo.items(id).len(), 1);
    }

    #[tokio::test]
    async fn test_success_is_idempotent() {
        let repo = MemoryRepository::new();
        let id = repo.subscribe(7, "https://example.com/rss");
        let doc = parsed(&["a", "b"]);

        assert_eq!(repo.record_fetch_success(id, &doc, None, at(0)).await.unwrap(), 2);
        let once = repo.items(id);
        assert_eq!(repo.record_fetch_success(id, &doc, None, at(60)).await.unwrap(), 0);

        assert_eq!(repo.items(id), once);
        assert_eq!(repo.unread_items(7).len(), 2);
    }

    #[tokio::test]
    async fn test_failure_leaves_fetch_state_alone() {
        let repo = MemoryRepository::new();
        let id = repo.add_feed("https://example.com/rss");
        let other = repo.add_feed("https://other.example.com/rss");
        repo.record_fetch_success(id, &parsed(&["a"]), Some("v1"), at(0))
            .await
            .unwrap();
        let other_before = repo.feed(other).unwrap();

        assert_eq!(repo.record_fetch_failure(id, "boom", at(60)).await.unwrap(), 1);

        let feed = repo.feed(id).unwrap();
        assert_eq!(feed.last_fetch_time, Some(at(0)));
        assert_eq!(feed.etag.as_deref(), Some("v1"));
        assert_eq!(feed.name, "Feed");
        assert_eq!(feed.last_failure.as_deref(), Some("boom"));
        assert_eq!(repo.feed(other).unwrap(), other_before);
    }

    #[tokio::test]
    async fn test_unknown_feed() {
        let repo = MemoryRepository::new();
        assert!(matches!(
            repo.record_fetch_unchanged(1, at(0)).await,
            Err(DatabaseError::FeedNotFound(1))
        ));
    }

    fn check_time() -> impl Strategy<Value = Option<i64>> {
        prop::option::of(-1000i64..1000)
    }

    proptest! {
        #[test]
        fn stale_listing_matches_latest_check(
            checks in prop::collection::vec((check_time(), check_time()), 0..20),
            cutoff in -1000i64..1000,
        ) {
            let repo = MemoryRepository::new();
            for (n, (fetched, failed)) in checks.iter().enumerate() {
                let id = repo.add_feed(&format!("https://{n}.example.com/rss"));
                let mut feed = repo.feed(id).unwrap();
                feed.last_fetch_time = fetched.map(at);
                feed.last_failure_time = failed.map(at);
                repo.insert_feed(feed);
            }

            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let stale = runtime.block_on(repo.list_stale_feeds(at(cutoff))).unwrap();
            let stale_ids: Vec<i64> = stale.iter().map(|f| f.id).collect();

            let expected: Vec<i64> = checks
                .iter()
                .enumerate()
                .filter(|(_, (fetched, failed))| {
                    let latest = match (fetched, failed) {
                        (Some(a), Some(b)) => Some(*a.max(b)),
                        (a, b) => a.or(*b),
                    };
                    latest.map_or(true, |t| t < cutoff)
                })
                .map(|(n, _)| n as i64 + 1)
                .collect();

            prop_assert_eq!(stale_ids, expected);
        }
    }
}
