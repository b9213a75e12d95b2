use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::dedup::{DedupEngine, DedupSettings, DuplicateTracker};
use crate::fetcher::SourceFetcher;
use crate::models::{Article, Feed, FeedId, NewArticle};
use crate::storage::Store;

/// Outcome of a manual single-feed refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub success: bool,
    pub feed_id: FeedId,
    pub feed_name: Option<String>,
    pub new_articles: usize,
    pub articles: Vec<Article>,
    pub error: Option<String>,
}

impl RefreshReport {
    fn failed(feed_id: FeedId, feed_name: Option<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            feed_id,
            feed_name,
            new_articles: 0,
            articles: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Outcome of a manual refresh over every active feed.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshAllReport {
    pub success: bool,
    pub feeds_processed: usize,
    pub new_articles: usize,
    /// feed name -> number of new articles
    pub per_feed: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub success: bool,
    pub total_scanned: usize,
    pub duplicates_found: usize,
    pub duplicates_removed: usize,
    pub sources_checked: usize,
    pub error: Option<String>,
}

/// Drives the fetcher for each feed and persists whatever survives dedup.
pub struct FeedIngestor {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn SourceFetcher>,
    dedup: DedupEngine,
    cleanup_scan_limit: usize,
}

impl FeedIngestor {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn SourceFetcher>,
        settings: DedupSettings,
    ) -> Self {
        let dedup = DedupEngine::new(store.clone(), settings);
        Self {
            store,
            fetcher,
            dedup,
            cleanup_scan_limit: 1000,
        }
    }

    pub fn with_cleanup_scan_limit(mut self, limit: usize) -> Self {
        self.cleanup_scan_limit = limit;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn dedup(&self) -> &DedupEngine {
        &self.dedup
    }

    /// Fetch `feed`, persist up to `max_articles` new entries and return them.
    ///
    /// A fetch failure is logged and yields an empty list. Once the fetch
    /// succeeded, `last_fetched` is stamped even if nothing new was found.
    pub async fn ingest(&self, feed: &Feed, max_articles: usize) -> Vec<Article> {
        let entries = match self.fetcher.fetch_entries(&feed.url).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(feed = %feed.name, url = %feed.url, error = %err, "failed to fetch feed");
                return Vec::new();
            }
        };

        let mut saved = Vec::new();
        for entry in entries.into_iter().take(max_articles) {
            let candidate = NewArticle::from_entry(entry, feed, Utc::now());
            if self.dedup.is_duplicate(&candidate, feed).await {
                continue;
            }
            match self.store.insert_article(candidate).await {
                Ok(article) => saved.push(article),
                Err(err) => {
                    error!(feed = %feed.name, error = %err, "failed to store article");
                }
            }
        }

        self.touch(feed).await;

        if saved.is_empty() {
            debug!(feed = %feed.name, "feed updated: no new articles");
        } else {
            info!(feed = %feed.name, new = saved.len(), "feed updated");
        }
        saved
    }

    async fn touch(&self, feed: &Feed) {
        // Re-read so a concurrent toggle or rename is not clobbered.
        let current = match self.store.feed(feed.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!(feed = %feed.name, "feed removed while ingesting");
                return;
            }
            Err(err) => {
                error!(feed = %feed.name, error = %err, "failed to reload feed");
                return;
            }
        };
        let stamped = Feed {
            last_fetched: Some(Utc::now()),
            ..current
        };
        if let Err(err) = self.store.update_feed(&stamped).await {
            error!(feed = %feed.name, error = %err, "failed to update last_fetched");
        }
    }

    /// Ingest every active feed concurrently, one task per feed.
    ///
    /// A feed whose task fails contributes an empty list; it never aborts the
    /// others.
    pub async fn ingest_all(self: &Arc<Self>, max_per_feed: usize) -> BTreeMap<String, Vec<Article>> {
        let feeds = match self.store.list_feeds(true).await {
            Ok(feeds) => feeds,
            Err(err) => {
                error!(error = %err, "failed to list active feeds");
                return BTreeMap::new();
            }
        };

        let (names, handles): (Vec<_>, Vec<_>) = feeds
            .into_iter()
            .map(|feed| {
                let this = Arc::clone(self);
                let name = feed.name.clone();
                let handle = tokio::spawn(async move { this.ingest(&feed, max_per_feed).await });
                (name, handle)
            })
            .unzip();

        let outcomes = join_all(handles).await;
        let mut results = BTreeMap::new();
        for (name, outcome) in names.into_iter().zip(outcomes) {
            let articles = outcome.unwrap_or_else(|err| {
                error!(feed = %name, error = %err, "ingest task failed");
                Vec::new()
            });
            results.insert(name, articles);
        }
        results
    }

    pub async fn refresh_feed(&self, feed_id: FeedId, max_articles: usize) -> RefreshReport {
        let feed = match self.store.feed(feed_id).await {
            Ok(Some(feed)) => feed,
            Ok(None) => return RefreshReport::failed(feed_id, None, "feed not found"),
            Err(err) => return RefreshReport::failed(feed_id, None, err.to_string()),
        };
        if !feed.active {
            return RefreshReport::failed(feed_id, Some(feed.name), "feed is not active");
        }

        let articles = self.ingest(&feed, max_articles).await;
        RefreshReport {
            success: true,
            feed_id,
            feed_name: Some(feed.name),
            new_articles: articles.len(),
            articles,
            error: None,
        }
    }

    pub async fn refresh_all(self: &Arc<Self>, max_per_feed: usize) -> RefreshAllReport {
        let results = self.ingest_all(max_per_feed).await;
        let per_feed: BTreeMap<String, usize> = results
            .iter()
            .map(|(name, articles)| (name.clone(), articles.len()))
            .collect();
        RefreshAllReport {
            success: true,
            feeds_processed: per_feed.len(),
            new_articles: per_feed.values().sum(),
            per_feed,
        }
    }

    /// Retroactively remove duplicates created within the last `days_back`
    /// days, keeping the newest article of each duplicate group per source.
    ///
    /// Catches duplicates that raced past [`DedupEngine`] while several feeds
    /// were ingested concurrently.
    pub async fn cleanup_duplicates(&self, days_back: u32) -> CleanupReport {
        let cutoff = Utc::now() - Duration::days(i64::from(days_back));
        let recent = match self.store.articles_since(cutoff, self.cleanup_scan_limit).await {
            Ok(recent) => recent,
            Err(err) => {
                error!(error = %err, "duplicate cleanup could not load articles");
                return CleanupReport {
                    error: Some(err.to_string()),
                    ..CleanupReport::default()
                };
            }
        };

        let mut by_source: BTreeMap<String, Vec<Article>> = BTreeMap::new();
        for article in &recent {
            let key = if article.is_from_feed() {
                article.source.clone()
            } else {
                "Unknown".to_owned()
            };
            by_source.entry(key).or_default().push(article.clone());
        }

        let mut report = CleanupReport {
            success: true,
            total_scanned: recent.len(),
            sources_checked: by_source.len(),
            ..CleanupReport::default()
        };

        for (source, mut articles) in by_source {
            debug!(source = %source, count = articles.len(), "checking source for duplicates");
            articles.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

            let mut tracker = DuplicateTracker::new(*self.dedup.settings());
            for article in &articles {
                let Some(reason) = tracker.observe(article) else {
                    continue;
                };
                report.duplicates_found += 1;
                match self.store.delete_article(article.id).await {
                    Ok(true) => {
                        report.duplicates_removed += 1;
                        debug!(id = article.id, ?reason, "removed duplicate article");
                    }
                    Ok(false) => {
                        debug!(id = article.id, "duplicate already gone");
                    }
                    Err(err) => {
                        warn!(id = article.id, error = %err, "failed to remove duplicate article");
                    }
                }
            }
        }

        info!(
            scanned = report.total_scanned,
            found = report.duplicates_found,
            removed = report.duplicates_removed,
            "duplicate cleanup completed"
        );
        report
    }
}
