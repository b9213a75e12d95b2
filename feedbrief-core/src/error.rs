use thiserror::Error;

use crate::models::FeedId;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("feed parsing error: {0}")]
    Parse(String),
    #[error("feed not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("a feed with url {0} already exists")]
    DuplicateFeedUrl(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned HTTP {0}")]
    Status(u16),
    #[error("notifier rejected result: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}

/// Errors surfaced synchronously to callers of the control surface.
///
/// Recoverable failures (a feed that cannot be fetched, a callback that
/// errors, a cleanup removal that fails) never show up here; they are logged
/// and folded into the structured reports instead.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("feed {0} not found")]
    FeedNotFound(FeedId),
    #[error("a feed with url {0} already exists")]
    DuplicateFeedUrl(String),
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("schedule '{0}' not found")]
    ScheduleNotFound(String),
    #[error("schedule '{0}' already exists")]
    ScheduleExists(String),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("schedule '{0}' is already executing")]
    ScheduleBusy(String),
    #[error("scheduler is not running")]
    NotRunning,
    #[error("scheduler task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
