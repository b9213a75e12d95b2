use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// One entry as returned by a source, before any dedup decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEntry {
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub body: Option<String>,
}

impl RawEntry {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            published_at: None,
            author: None,
            body: None,
        }
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn from_rss_item(item: &rss::Item) -> Self {
        let published_at = item
            .pub_date()
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|dt| dt.with_timezone(&Utc));

        // Dublin Core creator wins over the bare author field
        let author = item
            .dublin_core_ext()
            .and_then(|dc| dc.creators().first().map(|s| s.to_string()))
            .or_else(|| item.author().map(|s| s.to_string()));

        let body = item
            .content()
            .or_else(|| item.description())
            .map(ToOwned::to_owned);

        Self {
            title: item.title().unwrap_or_default().trim().to_owned(),
            link: item.link().unwrap_or_default().trim().to_owned(),
            published_at,
            author,
            body,
        }
    }

    pub fn from_atom_entry(entry: &atom_syndication::Entry) -> Self {
        let link = entry
            .links()
            .iter()
            .find(|link| link.rel() == "alternate")
            .or_else(|| entry.links().first())
            .map(|link| link.href().trim().to_owned())
            .unwrap_or_default();

        let published_at = entry
            .published()
            .copied()
            .unwrap_or_else(|| *entry.updated())
            .with_timezone(&Utc);

        let body = entry
            .content()
            .and_then(|content| content.value())
            .map(ToOwned::to_owned)
            .or_else(|| entry.summary().map(|summary| summary.value.clone()));

        Self {
            title: entry.title().value.trim().to_owned(),
            link,
            published_at: Some(published_at),
            author: entry.authors().first().map(|person| person.name().to_owned()),
            body,
        }
    }
}

/// Parse an RSS 2.0 document, falling back to Atom.
///
/// Entries without a link are dropped since the link is the article's
/// identity downstream. Document order is preserved.
pub fn parse_document(bytes: &[u8]) -> Result<Vec<RawEntry>, FetchError> {
    let entries = match rss::Channel::read_from(bytes) {
        Ok(channel) => channel
            .items()
            .iter()
            .map(RawEntry::from_rss_item)
            .collect::<Vec<_>>(),
        Err(rss_err) => match atom_syndication::Feed::read_from(bytes) {
            Ok(feed) => feed
                .entries()
                .iter()
                .map(RawEntry::from_atom_entry)
                .collect(),
            Err(atom_err) => {
                return Err(FetchError::Parse(format!(
                    "not RSS ({rss_err}) nor Atom ({atom_err})"
                )))
            }
        },
    };

    Ok(entries
        .into_iter()
        .filter(|entry| !entry.link.is_empty())
        .collect())
}
