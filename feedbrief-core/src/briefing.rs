//! Digest of recent feed articles.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::models::{Article, Feed};
use crate::storage::Store;

/// Section name used when articles are not grouped by source.
pub const ALL_FEEDS: &str = "All Feeds";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BriefingRequest {
    pub days_back: u32,
    pub max_per_source: usize,
    pub max_total: usize,
    pub group_by_source: bool,
    pub sort_by_priority: bool,
    /// Upper bound on articles loaded from the store.
    pub scan_limit: usize,
}

impl Default for BriefingRequest {
    fn default() -> Self {
        Self {
            days_back: 7,
            max_per_source: 5,
            max_total: 25,
            group_by_source: true,
            sort_by_priority: true,
            scan_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BriefingStats {
    pub total_articles: usize,
    pub total_feeds: usize,
    pub active_feeds: usize,
    pub total_reading_time: u64,
    pub total_words: u64,
    pub days_back: u32,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Briefing {
    /// Section name (feed name, or [`ALL_FEEDS`]) -> articles.
    pub sections: BTreeMap<String, Vec<Article>>,
    pub feeds: Vec<Feed>,
    pub stats: BriefingStats,
}

impl Briefing {
    pub fn article_count(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }
}

/// Urgent first, then newer first within a priority.
fn by_priority(a: &Article, b: &Article) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

fn finish_section(articles: &mut Vec<Article>, cap: usize, sort_by_priority: bool) {
    if sort_by_priority {
        articles.sort_by(by_priority);
    }
    articles.truncate(cap);
}

/// Assemble a briefing over feed articles created in the last
/// `request.days_back` days. Manually added articles are left out.
///
/// Lists are sorted before they are capped, so the cap keeps the most urgent
/// articles when `sort_by_priority` is set and the newest otherwise.
pub async fn assemble(store: &dyn Store, request: &BriefingRequest) -> Result<Briefing> {
    let now = Utc::now();
    let cutoff = now - Duration::days(i64::from(request.days_back));
    let articles: Vec<Article> = store
        .articles_since(cutoff, request.scan_limit)
        .await?
        .into_iter()
        .filter(Article::is_from_feed)
        .collect();
    let feeds = store.list_feeds(false).await?;

    let stats = BriefingStats {
        total_articles: articles.len(),
        total_feeds: feeds.len(),
        active_feeds: feeds.iter().filter(|f| f.active).count(),
        total_reading_time: articles
            .iter()
            .map(|a| u64::from(a.reading_time_minutes))
            .sum(),
        total_words: articles.iter().map(|a| u64::from(a.word_count)).sum(),
        days_back: request.days_back,
        generated_at: now,
    };

    let mut sections: BTreeMap<String, Vec<Article>> = BTreeMap::new();
    if request.group_by_source {
        for article in articles {
            sections.entry(article.source.clone()).or_default().push(article);
        }
        for list in sections.values_mut() {
            finish_section(list, request.max_per_source, request.sort_by_priority);
        }
    } else {
        let mut all = articles;
        finish_section(&mut all, request.max_total, request.sort_by_priority);
        sections.insert(ALL_FEEDS.to_owned(), all);
    }

    debug!(
        sections = sections.len(),
        articles = stats.total_articles,
        "assembled briefing"
    );

    Ok(Briefing {
        sections,
        feeds: feeds.into_iter().filter(|f| f.active).collect(),
        stats,
    })
}
