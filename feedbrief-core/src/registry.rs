//! Feed and article bookkeeping used by the control surface.

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::error::{CoreError, Result, StoreError};
use crate::models::{
    Article, ArticleId, ArticlePriority, ArticleStatus, Feed, FeedId, FeedUpdate, NewFeed,
};
use crate::storage::Store;

/// Articles inspected per feed when computing statistics.
const STATS_SCAN_LIMIT: usize = 10_000;

pub fn validate_feed_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|err| CoreError::InvalidUrl {
        url: raw.to_owned(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CoreError::InvalidUrl {
            url: raw.to_owned(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Register a new, active feed. Feed URLs are unique.
pub async fn add_feed(store: &dyn Store, feed: NewFeed) -> Result<Feed> {
    let url = validate_feed_url(&feed.url)?;
    let feed = NewFeed {
        url: url.to_string(),
        ..feed
    };
    match store.insert_feed(feed, Utc::now()).await {
        Ok(feed) => Ok(feed),
        Err(StoreError::DuplicateFeedUrl(url)) => Err(CoreError::DuplicateFeedUrl(url)),
        Err(err) => Err(err.into()),
    }
}

pub async fn update_feed(store: &dyn Store, id: FeedId, update: FeedUpdate) -> Result<Feed> {
    let mut feed = store.feed(id).await?.ok_or(CoreError::FeedNotFound(id))?;
    if update.is_empty() {
        return Ok(feed);
    }
    update.apply(&mut feed);
    if !store.update_feed(&feed).await? {
        return Err(CoreError::FeedNotFound(id));
    }
    Ok(feed)
}

/// Flip `active`, or force it when `active` is given.
pub async fn toggle_feed(store: &dyn Store, id: FeedId, active: Option<bool>) -> Result<Feed> {
    let current = store.feed(id).await?.ok_or(CoreError::FeedNotFound(id))?;
    let next = active.unwrap_or(!current.active);
    update_feed(store, id, FeedUpdate::new().with_active(next)).await
}

/// Hard-delete a feed. Its articles are kept and still name it as `source`.
pub async fn remove_feed(store: &dyn Store, id: FeedId) -> Result<()> {
    if store.delete_feed(id).await? {
        Ok(())
    } else {
        Err(CoreError::FeedNotFound(id))
    }
}

pub async fn list_feeds(store: &dyn Store, active_only: bool) -> Result<Vec<Feed>> {
    Ok(store.list_feeds(active_only).await?)
}

/// Case-insensitive match on name, description or any tag.
pub async fn search_feeds(store: &dyn Store, query: &str) -> Result<Vec<Feed>> {
    let needle = query.to_lowercase();
    let feeds = store.list_feeds(false).await?;
    Ok(feeds
        .into_iter()
        .filter(|feed| {
            feed.name.to_lowercase().contains(&needle)
                || feed
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
                || feed.tags.iter().any(|tag| tag.to_lowercase().contains(&needle))
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedStats {
    pub feed: Feed,
    pub article_count: usize,
    pub last_fetched: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedStatsSummary {
    pub feeds: Vec<FeedStats>,
    pub total_feeds: usize,
    pub active_feeds: usize,
    pub total_articles: usize,
}

async fn stats_for(store: &dyn Store, feed: Feed) -> Result<FeedStats> {
    let article_count = store.articles_by_source(&feed.name, STATS_SCAN_LIMIT).await?.len();
    Ok(FeedStats {
        article_count,
        last_fetched: feed.last_fetched,
        active: feed.active,
        feed,
    })
}

/// Statistics for one feed, or for every feed when `id` is `None`.
pub async fn feed_stats(store: &dyn Store, id: Option<FeedId>) -> Result<FeedStatsSummary> {
    let targets = match id {
        Some(id) => vec![store.feed(id).await?.ok_or(CoreError::FeedNotFound(id))?],
        None => store.list_feeds(false).await?,
    };
    let mut feeds = Vec::with_capacity(targets.len());
    for feed in targets {
        feeds.push(stats_for(store, feed).await?);
    }
    Ok(FeedStatsSummary {
        total_feeds: feeds.len(),
        active_feeds: feeds.iter().filter(|s| s.active).count(),
        total_articles: feeds.iter().map(|s| s.article_count).sum(),
        feeds,
    })
}

/// Mark an article as consumed by a presentation layer.
pub async fn mark_delivered(store: &dyn Store, id: ArticleId) -> Result<Option<Article>> {
    let Some(article) = store.article(id).await? else {
        return Ok(None);
    };
    Ok(store
        .update_article_state(id, ArticleStatus::Delivered, article.priority)
        .await?)
}

pub async fn set_priority(
    store: &dyn Store,
    id: ArticleId,
    priority: ArticlePriority,
) -> Result<Option<Article>> {
    let Some(article) = store.article(id).await? else {
        return Ok(None);
    };
    Ok(store.update_article_state(id, article.status, priority).await?)
}
