//! Persistent store boundary and a JSON-file backed implementation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::{
    Article, ArticleId, ArticlePriority, ArticleStatus, Feed, FeedId, NewArticle, NewFeed,
    ScheduleConfig,
};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Record store for feeds, articles and schedules.
///
/// Article listings are returned newest first (`created_at` descending).
/// Feed URLs are unique: `insert_feed` and `update_feed` reject a URL already
/// used by another feed with [`StoreError::DuplicateFeedUrl`]. URL uniqueness
/// of articles is not enforced here; that is the dedup engine's job.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_feed(&self, feed: NewFeed, created_at: DateTime<Utc>) -> StoreResult<Feed>;
    async fn feed(&self, id: FeedId) -> StoreResult<Option<Feed>>;
    async fn feed_by_url(&self, url: &str) -> StoreResult<Option<Feed>>;
    async fn list_feeds(&self, active_only: bool) -> StoreResult<Vec<Feed>>;
    /// Replace a stored feed. Returns `false` when it no longer exists.
    async fn update_feed(&self, feed: &Feed) -> StoreResult<bool>;
    async fn delete_feed(&self, id: FeedId) -> StoreResult<bool>;

    async fn insert_article(&self, article: NewArticle) -> StoreResult<Article>;
    async fn article(&self, id: ArticleId) -> StoreResult<Option<Article>>;
    async fn article_by_url(&self, url: &str) -> StoreResult<Option<Article>>;
    async fn articles_by_source(&self, source: &str, limit: usize) -> StoreResult<Vec<Article>>;
    async fn articles_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Article>>;
    async fn update_article_state(
        &self,
        id: ArticleId,
        status: ArticleStatus,
        priority: ArticlePriority,
    ) -> StoreResult<Option<Article>>;
    async fn delete_article(&self, id: ArticleId) -> StoreResult<bool>;

    async fn list_schedules(&self) -> StoreResult<Vec<ScheduleConfig>>;
    async fn upsert_schedule(&self, schedule: &ScheduleConfig) -> StoreResult<()>;
    async fn delete_schedule(&self, name: &str) -> StoreResult<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoreData {
    next_feed_id: FeedId,
    next_article_id: ArticleId,
    feeds: BTreeMap<FeedId, Feed>,
    articles: BTreeMap<ArticleId, Article>,
    schedules: BTreeMap<String, ScheduleConfig>,
}

impl StoreData {
    fn allocate_feed_id(&mut self) -> FeedId {
        self.next_feed_id += 1;
        self.next_feed_id
    }

    /// Whether a feed other than `except` already uses `url`.
    fn has_feed_url(&self, url: &str, except: Option<FeedId>) -> bool {
        self.feeds
            .values()
            .any(|feed| feed.url == url && Some(feed.id) != except)
    }

    fn allocate_article_id(&mut self) -> ArticleId {
        self.next_article_id += 1;
        self.next_article_id
    }
}

fn newest_first(mut articles: Vec<Article>, limit: usize) -> Vec<Article> {
    articles.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    articles.truncate(limit);
    articles
}

/// In-memory record store, optionally mirrored to a JSON file.
///
/// Every mutation rewrites the file atomically (write `*.json.tmp`, then
/// rename) and only takes effect in memory once the write succeeded. On load, a corrupt main file falls back to the temp file.
#[derive(Debug, Clone)]
pub struct JsonStore {
    inner: Arc<RwLock<StoreData>>,
    path: Option<PathBuf>,
}

impl JsonStore {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreData::default())),
            path: None,
        }
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = read_json_with_tmp_fallback::<StoreData>(&path).await;
        debug!(
            path = %path.display(),
            feeds = data.feeds.len(),
            articles = data.articles.len(),
            schedules = data.schedules.len(),
            "loaded store"
        );
        Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, data: &StoreData) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(data)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Write `next` out, then make it the live state. A failed write leaves
    /// the live state as it was.
    async fn commit(&self, live: &mut StoreData, next: StoreData) -> StoreResult<()> {
        self.persist(&next).await?;
        *live = next;
        Ok(())
    }
}

async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "failed to parse store, trying tmp fallback");
                let tmp = path.with_extension("json.tmp");
                match tokio::fs::read(&tmp).await {
                    Ok(tmp_bytes) => serde_json::from_slice::<T>(&tmp_bytes).unwrap_or_default(),
                    Err(_) => T::default(),
                }
            }
        },
        Err(_) => T::default(),
    }
}

#[async_trait]
impl Store for JsonStore {
    async fn insert_feed(&self, feed: NewFeed, created_at: DateTime<Utc>) -> StoreResult<Feed> {
        let mut data = self.inner.write().await;
        if data.has_feed_url(&feed.url, None) {
            return Err(StoreError::DuplicateFeedUrl(feed.url));
        }
        let mut next = data.clone();
        let id = next.allocate_feed_id();
        let stored = Feed {
            id,
            name: feed.name,
            url: feed.url,
            description: feed.description,
            tags: feed.tags,
            active: true,
            last_fetched: None,
            created_at,
        };
        next.feeds.insert(id, stored.clone());
        self.commit(&mut data, next).await?;
        Ok(stored)
    }

    async fn feed(&self, id: FeedId) -> StoreResult<Option<Feed>> {
        Ok(self.inner.read().await.feeds.get(&id).cloned())
    }

    async fn feed_by_url(&self, url: &str) -> StoreResult<Option<Feed>> {
        let data = self.inner.read().await;
        Ok(data.feeds.values().find(|feed| feed.url == url).cloned())
    }

    async fn list_feeds(&self, active_only: bool) -> StoreResult<Vec<Feed>> {
        let data = self.inner.read().await;
        let mut feeds: Vec<Feed> = data
            .feeds
            .values()
            .filter(|feed| !active_only || feed.active)
            .cloned()
            .collect();
        feeds.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(feeds)
    }

    async fn update_feed(&self, feed: &Feed) -> StoreResult<bool> {
        let mut data = self.inner.write().await;
        if !data.feeds.contains_key(&feed.id) {
            return Ok(false);
        }
        if data.has_feed_url(&feed.url, Some(feed.id)) {
            return Err(StoreError::DuplicateFeedUrl(feed.url.clone()));
        }
        let mut next = data.clone();
        next.feeds.insert(feed.id, feed.clone());
        self.commit(&mut data, next).await?;
        Ok(true)
    }

    async fn delete_feed(&self, id: FeedId) -> StoreResult<bool> {
        let mut data = self.inner.write().await;
        let mut next = data.clone();
        if next.feeds.remove(&id).is_none() {
            return Ok(false);
        }
        self.commit(&mut data, next).await?;
        Ok(true)
    }

    async fn insert_article(&self, article: NewArticle) -> StoreResult<Article> {
        let mut data = self.inner.write().await;
        let mut next = data.clone();
        let id = next.allocate_article_id();
        let stored = article.into_article(id);
        next.articles.insert(id, stored.clone());
        self.commit(&mut data, next).await?;
        Ok(stored)
    }

    async fn article(&self, id: ArticleId) -> StoreResult<Option<Article>> {
        Ok(self.inner.read().await.articles.get(&id).cloned())
    }

    async fn article_by_url(&self, url: &str) -> StoreResult<Option<Article>> {
        let data = self.inner.read().await;
        Ok(data.articles.values().find(|a| a.url == url).cloned())
    }

    async fn articles_by_source(&self, source: &str, limit: usize) -> StoreResult<Vec<Article>> {
        let data = self.inner.read().await;
        let matching = data
            .articles
            .values()
            .filter(|a| a.source == source)
            .cloned()
            .collect();
        Ok(newest_first(matching, limit))
    }

    async fn articles_since(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Article>> {
        let data = self.inner.read().await;
        let matching = data
            .articles
            .values()
            .filter(|a| a.created_at >= cutoff)
            .cloned()
            .collect();
        Ok(newest_first(matching, limit))
    }

    async fn update_article_state(
        &self,
        id: ArticleId,
        status: ArticleStatus,
        priority: ArticlePriority,
    ) -> StoreResult<Option<Article>> {
        let mut data = self.inner.write().await;
        let mut next = data.clone();
        let updated = match next.articles.get_mut(&id) {
            Some(article) => {
                article.status = status;
                article.priority = priority;
                article.clone()
            }
            None => return Ok(None),
        };
        self.commit(&mut data, next).await?;
        Ok(Some(updated))
    }

    async fn delete_article(&self, id: ArticleId) -> StoreResult<bool> {
        let mut data = self.inner.write().await;
        let mut next = data.clone();
        if next.articles.remove(&id).is_none() {
            return Ok(false);
        }
        self.commit(&mut data, next).await?;
        Ok(true)
    }

    async fn list_schedules(&self) -> StoreResult<Vec<ScheduleConfig>> {
        Ok(self.inner.read().await.schedules.values().cloned().collect())
    }

    async fn upsert_schedule(&self, schedule: &ScheduleConfig) -> StoreResult<()> {
        let mut data = self.inner.write().await;
        let mut next = data.clone();
        next.schedules
            .insert(schedule.name.clone(), schedule.clone());
        self.commit(&mut data, next).await
    }

    async fn delete_schedule(&self, name: &str) -> StoreResult<bool> {
        let mut data = self.inner.write().await;
        let mut next = data.clone();
        if next.schedules.remove(name).is_none() {
            return Ok(false);
        }
        self.commit(&mut data, next).await?;
        Ok(true)
    }
}
