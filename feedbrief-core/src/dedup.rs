//! Duplicate detection.
//!
//! A candidate is a duplicate when any of three signals fires, checked in
//! order: exact URL, similar title (within a publication-date window), or an
//! identical hash over the leading part of the body.
//!
//! Store failures while checking are treated as "duplicate": content that
//! cannot be verified is never ingested. This conservative policy may drop a
//! genuinely new article, which the next poll will pick up once the store
//! answers again.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::models::{Article, Feed, NewArticle};
use crate::storage::{Store, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupSettings {
    /// Minimum Jaccard similarity over title words (inclusive).
    pub title_threshold: f64,
    /// Titles only match when publication times (if both known) are closer than this.
    pub date_proximity: Duration,
    /// Number of leading body characters fed to the content hash.
    pub hash_prefix_chars: usize,
    /// How many recent same-source articles are compared against.
    pub recent_window: usize,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            title_threshold: 0.8,
            date_proximity: Duration::hours(24),
            hash_prefix_chars: 1000,
            recent_window: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    Url,
    Title,
    ContentHash,
}

/// Lowercase, turn punctuation into spaces, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let mapped: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    mapped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard similarity of the whitespace-separated word sets of two
/// normalized titles.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

pub fn titles_similar(a: &str, b: &str, threshold: f64) -> bool {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    // containment catches truncated titles
    if a == b || a.contains(&b) || b.contains(&a) {
        return true;
    }
    jaccard(&a, &b) >= threshold
}

/// `true` unless both timestamps are known and at least `window` apart.
pub fn published_close(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
    window: Duration,
) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).abs() < window,
        _ => true,
    }
}

/// SHA-256 (hex) over the first `prefix_chars` characters of `body`.
pub fn content_hash(body: &str, prefix_chars: usize) -> String {
    let sample: String = body.chars().take(prefix_chars).collect();
    hex::encode(Sha256::digest(sample.as_bytes()))
}

#[derive(Clone)]
pub struct DedupEngine {
    store: Arc<dyn Store>,
    settings: DedupSettings,
}

impl DedupEngine {
    pub fn new(store: Arc<dyn Store>, settings: DedupSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &DedupSettings {
        &self.settings
    }

    /// Decide whether `candidate` from `source` was already ingested.
    ///
    /// Never mutates the store. Any store error counts as a duplicate.
    pub async fn is_duplicate(&self, candidate: &NewArticle, source: &Feed) -> bool {
        match self.classify(candidate, source).await {
            Ok(Some(reason)) => {
                debug!(url = %candidate.url, source = %source.name, ?reason, "skipping duplicate");
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(
                    url = %candidate.url,
                    source = %source.name,
                    error = %err,
                    "duplicate check failed, refusing to ingest unverifiable candidate"
                );
                true
            }
        }
    }

    /// Run the three checks and report which one fired, if any.
    pub async fn classify(
        &self,
        candidate: &NewArticle,
        source: &Feed,
    ) -> StoreResult<Option<DuplicateReason>> {
        if self.store.article_by_url(&candidate.url).await?.is_some() {
            return Ok(Some(DuplicateReason::Url));
        }

        let has_title = !candidate.title.trim().is_empty();
        let has_body = !candidate.body.is_empty();
        if !has_title && !has_body {
            return Ok(None);
        }

        let recent = self
            .store
            .articles_by_source(&source.name, self.settings.recent_window)
            .await?;

        if has_title
            && recent
                .iter()
                .any(|existing| self.title_matches(&candidate.title, candidate.published_at, existing))
        {
            return Ok(Some(DuplicateReason::Title));
        }

        if has_body {
            let hash = content_hash(&candidate.body, self.settings.hash_prefix_chars);
            let same_content = recent.iter().any(|existing| {
                !existing.body.is_empty()
                    && content_hash(&existing.body, self.settings.hash_prefix_chars) == hash
            });
            if same_content {
                return Ok(Some(DuplicateReason::ContentHash));
            }
        }

        Ok(None)
    }

    fn title_matches(
        &self,
        title: &str,
        published_at: Option<DateTime<Utc>>,
        existing: &Article,
    ) -> bool {
        titles_similar(title, &existing.title, self.settings.title_threshold)
            && published_close(published_at, existing.published_at, self.settings.date_proximity)
    }
}

/// Running record of what a retroactive pass has already kept.
///
/// Feed articles newest first; every article that matches something kept
/// earlier is reported as a duplicate, everything else is remembered.
#[derive(Debug)]
pub struct DuplicateTracker {
    settings: DedupSettings,
    urls: HashSet<String>,
    titles: Vec<(String, Option<DateTime<Utc>>)>,
    hashes: HashSet<String>,
}

impl DuplicateTracker {
    pub fn new(settings: DedupSettings) -> Self {
        Self {
            settings,
            urls: HashSet::new(),
            titles: Vec::new(),
            hashes: HashSet::new(),
        }
    }

    pub fn observe(&mut self, article: &Article) -> Option<DuplicateReason> {
        if !self.urls.insert(article.url.clone()) {
            return Some(DuplicateReason::Url);
        }

        if !article.title.trim().is_empty() {
            let repeated = self.titles.iter().any(|(kept, kept_published)| {
                titles_similar(&article.title, kept, self.settings.title_threshold)
                    && published_close(
                        article.published_at,
                        *kept_published,
                        self.settings.date_proximity,
                    )
            });
            if repeated {
                return Some(DuplicateReason::Title);
            }
        }

        let hash = (!article.body.is_empty())
            .then(|| content_hash(&article.body, self.settings.hash_prefix_chars));
        if let Some(hash) = &hash {
            if self.hashes.contains(hash) {
                return Some(DuplicateReason::ContentHash);
            }
        }

        if !article.title.trim().is_empty() {
            self.titles
                .push((article.title.clone(), article.published_at));
        }
        if let Some(hash) = hash {
            self.hashes.insert(hash);
        }
        None
    }
}
