use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::RawEntry;

pub type FeedId = i64;
pub type ArticleId = i64;

/// Words per minute used for reading-time estimates.
const WORDS_PER_MINUTE: u32 = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feed {
    pub id: FeedId,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    pub active: bool,
    pub last_fetched: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A feed that has not been stored yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewFeed {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
}

impl NewFeed {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            description: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Partial update of a feed's user-editable fields.
#[derive(Debug, Clone, Default)]
pub struct FeedUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub tags: Option<BTreeSet<String>>,
    pub active: Option<bool>,
}

impl FeedUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.tags.is_none() && self.active.is_none()
    }

    pub(crate) fn apply(self, feed: &mut Feed) {
        if let Some(name) = self.name {
            feed.name = name;
        }
        if let Some(description) = self.description {
            feed.description = description;
        }
        if let Some(tags) = self.tags {
            feed.tags = tags;
        }
        if let Some(active) = self.active {
            feed.active = active;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Fetched,
    Delivered,
}

/// Ordering follows urgency: `Low < Medium < High < Urgent`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ArticlePriority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: ArticleId,
    pub url: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Name of the originating feed; empty for manually added articles.
    pub source: String,
    pub tags: BTreeSet<String>,
    pub status: ArticleStatus,
    pub priority: ArticlePriority,
    pub word_count: u32,
    pub reading_time_minutes: u32,
    pub created_at: DateTime<Utc>,
}

impl Article {
    pub fn is_from_feed(&self) -> bool {
        !self.source.trim().is_empty()
    }
}

/// An article candidate, not yet persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source: String,
    pub tags: BTreeSet<String>,
    pub status: ArticleStatus,
    pub priority: ArticlePriority,
    pub word_count: u32,
    pub reading_time_minutes: u32,
    pub created_at: DateTime<Utc>,
}

impl NewArticle {
    /// Build a manually added article (no originating feed).
    pub fn new(url: impl Into<String>, title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            body: String::new(),
            author: None,
            published_at: None,
            source: String::new(),
            tags: BTreeSet::new(),
            status: ArticleStatus::Fetched,
            priority: ArticlePriority::Medium,
            word_count: 0,
            reading_time_minutes: 1,
            created_at,
        }
    }

    /// Stamp a fetched entry with its feed's identity.
    pub fn from_entry(entry: RawEntry, feed: &Feed, created_at: DateTime<Utc>) -> Self {
        let body = entry.body.unwrap_or_default();
        let word_count = count_words(&body);
        Self {
            url: entry.link,
            title: entry.title,
            body,
            author: entry.author,
            published_at: entry.published_at,
            source: feed.name.clone(),
            tags: feed.tags.clone(),
            status: ArticleStatus::Fetched,
            priority: ArticlePriority::Medium,
            word_count,
            reading_time_minutes: reading_time_minutes(word_count),
            created_at,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self.word_count = count_words(&self.body);
        self.reading_time_minutes = reading_time_minutes(self.word_count);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    pub fn with_priority(mut self, priority: ArticlePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn into_article(self, id: ArticleId) -> Article {
        Article {
            id,
            url: self.url,
            title: self.title,
            body: self.body,
            author: self.author,
            published_at: self.published_at,
            source: self.source,
            tags: self.tags,
            status: self.status,
            priority: self.priority,
            word_count: self.word_count,
            reading_time_minutes: self.reading_time_minutes,
            created_at: self.created_at,
        }
    }
}

/// Count whitespace-separated words of a body after dropping markup tags.
/// A `<` only opens a tag when a letter, `/` or `!` follows it.
pub fn count_words(body: &str) -> u32 {
    let mut plain = String::with_capacity(body.len());
    let mut in_tag = false;
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '<' if !in_tag && chars.peek().is_some_and(opens_tag) => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                plain.push(' ');
            }
            _ if !in_tag => plain.push(ch),
            _ => {}
        }
    }
    u32::try_from(plain.split_whitespace().count()).unwrap_or(u32::MAX)
}

fn opens_tag(next: &char) -> bool {
    next.is_ascii_alphabetic() || matches!(next, '/' | '!')
}

pub fn reading_time_minutes(word_count: u32) -> u32 {
    (word_count / WORDS_PER_MINUTE).max(1)
}

/// Which feeds a schedule polls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "feed_id", rename_all = "snake_case")]
pub enum FeedScope {
    All,
    Single(FeedId),
}

impl FeedScope {
    pub fn feed_id(&self) -> Option<FeedId> {
        match self {
            FeedScope::All => None,
            FeedScope::Single(id) => Some(*id),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    /// Disabled; never fires.
    Idle,
    /// Enabled and waiting for `next_run`.
    Armed,
    /// Enabled and `next_run` has passed.
    Due,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    pub name: String,
    pub scope: FeedScope,
    pub interval_minutes: u32,
    pub max_articles: usize,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub callback_url: Option<String>,
    pub callback_payload: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ScheduleConfig {
    pub fn new(
        name: impl Into<String>,
        scope: FeedScope,
        interval_minutes: u32,
        max_articles: usize,
    ) -> Self {
        Self {
            name: name.into(),
            scope,
            interval_minutes,
            max_articles,
            enabled: true,
            last_run: None,
            next_run: None,
            callback_url: None,
            callback_payload: None,
        }
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn with_callback_payload(
        mut self,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.callback_payload = Some(payload);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes))
    }

    /// Recompute `next_run` from `last_run`, or from `now` when the schedule
    /// has never run.
    pub fn arm(&mut self, now: DateTime<Utc>) {
        let base = self.last_run.unwrap_or(now);
        self.next_run = Some(base + self.interval());
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == ScheduleState::Due
    }

    pub fn state(&self, now: DateTime<Utc>) -> ScheduleState {
        if !self.enabled {
            return ScheduleState::Idle;
        }
        match self.next_run {
            Some(next) if next <= now => ScheduleState::Due,
            _ => ScheduleState::Armed,
        }
    }

    /// Stamp a run that started at `started_at`.
    ///
    /// A run that serves a due slot records that slot as `last_run`, so the
    /// cadence stays anchored to the original schedule rather than drifting by
    /// tick latency. When several slots were missed, only the latest one is
    /// recorded. An early (manual) run records `started_at` itself.
    pub fn record_run(&mut self, started_at: DateTime<Utc>) {
        let interval_secs = self.interval().num_seconds().max(1);
        let anchor = match self.next_run {
            Some(due) if due <= started_at => {
                let missed = (started_at - due).num_seconds() / interval_secs;
                due + Duration::seconds(missed * interval_secs)
            }
            _ => started_at,
        };
        self.last_run = Some(anchor);
        self.next_run = Some(anchor + self.interval());
    }
}

/// Partial update of a schedule. Applying it re-arms `next_run`.
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub scope: Option<FeedScope>,
    pub interval_minutes: Option<u32>,
    pub max_articles: Option<usize>,
    pub enabled: Option<bool>,
    pub callback_url: Option<Option<String>>,
    pub callback_payload: Option<Option<serde_json::Map<String, serde_json::Value>>>,
}

impl ScheduleUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, scope: FeedScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_interval_minutes(mut self, minutes: u32) -> Self {
        self.interval_minutes = Some(minutes);
        self
    }

    pub fn with_max_articles(mut self, max: usize) -> Self {
        self.max_articles = Some(max);
        self
    }

    pub fn enable(mut self) -> Self {
        self.enabled = Some(true);
        self
    }

    pub fn disable(mut self) -> Self {
        self.enabled = Some(false);
        self
    }

    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = Some(url);
        self
    }

    pub fn with_callback_payload(
        mut self,
        payload: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        self.callback_payload = Some(payload);
        self
    }

    pub(crate) fn apply(self, config: &mut ScheduleConfig, now: DateTime<Utc>) {
        if let Some(scope) = self.scope {
            config.scope = scope;
        }
        if let Some(minutes) = self.interval_minutes {
            config.interval_minutes = minutes;
        }
        if let Some(max) = self.max_articles {
            config.max_articles = max;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(url) = self.callback_url {
            config.callback_url = url;
        }
        if let Some(payload) = self.callback_payload {
            config.callback_payload = payload;
        }
        config.arm(now);
    }
}
