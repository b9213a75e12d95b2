pub mod briefing;
pub mod config;
pub mod dedup;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod ingest;
pub mod models;
pub mod notify;
pub mod registry;
pub mod scheduler;
pub mod storage;

pub use briefing::{assemble, Briefing, BriefingRequest, BriefingStats};
pub use config::AppConfig;
pub use dedup::{DedupEngine, DedupSettings, DuplicateReason};
pub use error::{ConfigError, CoreError, FetchError, NotifyError, Result, StoreError};
pub use feed::{parse_document, RawEntry};
pub use fetcher::{HttpFetcher, SourceFetcher};
pub use ingest::{CleanupReport, FeedIngestor, RefreshAllReport, RefreshReport};
pub use models::{
    Article, ArticleId, ArticlePriority, ArticleStatus, Feed, FeedId, FeedScope, FeedUpdate,
    NewArticle, NewFeed, ScheduleConfig, ScheduleState, ScheduleUpdate,
};
pub use notify::{LogNotifier, Notifier, NotifierRegistry, WebhookNotifier};
pub use scheduler::{RunReport, ScheduleStatus, Scheduler, SchedulerSettings, SchedulerStatus};
pub use storage::{JsonStore, Store, StoreResult};
