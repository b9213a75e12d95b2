#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedbrief_core::models::{
    Article, ArticleId, ArticlePriority, ArticleStatus, Feed, FeedId, NewArticle, NewFeed,
    ScheduleConfig,
};
use feedbrief_core::{FetchError, JsonStore, RawEntry, SourceFetcher, Store, StoreError, StoreResult};

/// Fetcher answering from a per-URL script.
#[derive(Default)]
pub struct StubFetcher {
    scripts: Mutex<HashMap<String, Option<Vec<RawEntry>>>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn serve(&self, url: &str, entries: Vec<RawEntry>) {
        self.scripts.lock().unwrap().insert(url.to_owned(), Some(entries));
    }

    pub fn fail(&self, url: &str) {
        self.scripts.lock().unwrap().insert(url.to_owned(), None);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceFetcher for StubFetcher {
    async fn fetch_entries(&self, url: &str) -> Result<Vec<RawEntry>, FetchError> {
        self.calls.lock().unwrap().push(url.to_owned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let script = self.scripts.lock().unwrap().get(url).cloned();
        match script {
            Some(Some(entries)) => Ok(entries),
            Some(None) => Err(FetchError::Parse(format!("scripted failure for {url}"))),
            None => Err(FetchError::NotFound(url.to_owned())),
        }
    }
}

/// Store whose article lookups always fail; everything else is delegated.
pub struct FlakyStore {
    pub inner: JsonStore,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: JsonStore::in_memory(),
        }
    }

    fn down<T>() -> StoreResult<T> {
        Err(StoreError::Unavailable("connection reset".into()))
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_feed(&self, feed: NewFeed, created_at: DateTime<Utc>) -> StoreResult<Feed> {
        self.inner.insert_feed(feed, created_at).await
    }
    async fn feed(&self, id: FeedId) -> StoreResult<Option<Feed>> {
        self.inner.feed(id).await
    }
    async fn feed_by_url(&self, url: &str) -> StoreResult<Option<Feed>> {
        self.inner.feed_by_url(url).await
    }
    async fn list_feeds(&self, active_only: bool) -> StoreResult<Vec<Feed>> {
        self.inner.list_feeds(active_only).await
    }
    async fn update_feed(&self, feed: &Feed) -> StoreResult<bool> {
        self.inner.update_feed(feed).await
    }
    async fn delete_feed(&self, id: FeedId) -> StoreResult<bool> {
        self.inner.delete_feed(id).await
    }
    async fn insert_article(&self, article: NewArticle) -> StoreResult<Article> {
        self.inner.insert_article(article).await
    }
    async fn article(&self, id: ArticleId) -> StoreResult<Option<Article>> {
        self.inner.article(id).await
    }
    async fn article_by_url(&self, _url: &str) -> StoreResult<Option<Article>> {
        Self::down()
    }
    async fn articles_by_source(&self, _source: &str, _limit: usize) -> StoreResult<Vec<Article>> {
        Self::down()
    }
    async fn articles_since(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Article>> {
        self.inner.articles_since(cutoff, limit).await
    }
    async fn update_article_state(
        &self,
        id: ArticleId,
        status: ArticleStatus,
        priority: ArticlePriority,
    ) -> StoreResult<Option<Article>> {
        self.inner.update_article_state(id, status, priority).await
    }
    async fn delete_article(&self, _id: ArticleId) -> StoreResult<bool> {
        Self::down()
    }
    async fn list_schedules(&self) -> StoreResult<Vec<ScheduleConfig>> {
        self.inner.list_schedules().await
    }
    async fn upsert_schedule(&self, schedule: &ScheduleConfig) -> StoreResult<()> {
        self.inner.upsert_schedule(schedule).await
    }
    async fn delete_schedule(&self, name: &str) -> StoreResult<bool> {
        self.inner.delete_schedule(name).await
    }
}

pub fn entry(n: usize, feed: &str) -> RawEntry {
    RawEntry::new(
        format!("{feed} story number {n} about topic {}", n * 7919),
        format!("https://{feed}.test/articles/{n}"),
    )
}

pub fn entries(count: usize, feed: &str) -> Vec<RawEntry> {
    (1..=count).map(|n| entry(n, feed)).collect()
}

pub async fn add_feed(store: &dyn Store, name: &str, url: &str) -> Feed {
    store
        .insert_feed(NewFeed::new(name, url), Utc::now())
        .await
        .unwrap()
}

pub fn rss_document(items: &[(&str, &str)]) -> String {
    let body: String = items
        .iter()
        .map(|(title, link)| {
            format!("<item><title>{title}</title><link>{link}</link><description>About {title}</description></item>")
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title><link>http://e</link><description>d</description>{body}</channel></rss>"#
    )
}

pub fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "{prefix}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    dir
}

pub fn shared<S: Store + 'static>(store: S) -> Arc<dyn Store> {
    Arc::new(store)
}
