use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::FetchError;
use crate::feed::{parse_document, RawEntry};

/// Source of raw entries for a feed URL.
///
/// Implementations own their network policy (timeouts, retries); the engine
/// only consumes the result.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_entries(&self, url: &str) -> Result<Vec<RawEntry>, FetchError>;
}

/// Fetches RSS/Atom documents over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn download(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(FetchError::NotFound(url.to_owned()))
            }
            _ => {}
        }
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(bytes)
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch_entries(&self, url: &str) -> Result<Vec<RawEntry>, FetchError> {
        let bytes = self.download(url).await?;
        let entries = parse_document(&bytes)?;
        debug!(feed = %url, entries = entries.len(), "fetched feed document");
        Ok(entries)
    }
}
