use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::briefing::BriefingRequest;
use crate::dedup::DedupSettings;
use crate::error::ConfigError;
use crate::scheduler::SchedulerSettings;

/// Overrides the configuration directory when set.
pub const HOME_ENV: &str = "FEEDBRIEF_HOME";

const CONFIG_FILE: &str = "config.json";
const STORE_FILE: &str = "store.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub dedup: DedupConfig,
    pub scheduler: SchedulerConfig,
    pub briefing: BriefingConfig,
    pub cleanup: CleanupConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub request_timeout_seconds: u64,
    pub max_redirects: usize,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    pub title_threshold: f64,
    pub date_proximity_hours: i64,
    pub hash_prefix_chars: usize,
    /// Same-source articles compared against each candidate.
    pub recent_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_seconds: u64,
    pub webhook_timeout_seconds: u64,
    /// Used for the schedule created when none exist yet.
    pub default_interval_minutes: u32,
    pub default_max_articles: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BriefingConfig {
    pub days_back: u32,
    pub max_per_source: usize,
    pub max_total: usize,
    pub group_by_source: bool,
    pub sort_by_priority: bool,
    pub scan_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanupConfig {
    pub days_back: u32,
    pub scan_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            max_redirects: 5,
            user_agent: format!("feedbrief/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            title_threshold: 0.8,
            date_proximity_hours: 24,
            hash_prefix_chars: 1000,
            recent_window: 500,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 60,
            webhook_timeout_seconds: 60,
            default_interval_minutes: 240,
            default_max_articles: 5,
        }
    }
}

impl Default for BriefingConfig {
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

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            days_back: 30,
            scan_limit: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl DedupConfig {
    pub fn settings(&self) -> DedupSettings {
        DedupSettings {
            title_threshold: self.title_threshold,
            date_proximity: chrono::Duration::hours(self.date_proximity_hours),
            hash_prefix_chars: self.hash_prefix_chars,
            recent_window: self.recent_window,
        }
    }
}

impl SchedulerConfig {
    pub fn settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            tick: Duration::from_secs(self.tick_seconds.max(1)),
            webhook_timeout: Duration::from_secs(self.webhook_timeout_seconds),
        }
    }
}

impl BriefingConfig {
    pub fn request(&self) -> BriefingRequest {
        BriefingRequest {
            days_back: self.days_back,
            max_per_source: self.max_per_source,
            max_total: self.max_total,
            group_by_source: self.group_by_source,
            sort_by_priority: self.sort_by_priority,
            scan_limit: self.scan_limit,
        }
    }
}

impl AppConfig {
    /// Directory holding `config.json` and the store: `$FEEDBRIEF_HOME`, or
    /// the platform config directory.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(home));
        }
        dirs::config_dir()
            .map(|dir| dir.join("feedbrief"))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn store_file_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(STORE_FILE))
    }

    /// Load the configuration, falling back to the defaults when the file is
    /// missing or unreadable. The reason for a fallback is handed back rather
    /// than logged, since logging is set up from the loaded config.
    pub fn load() -> (Self, Option<ConfigError>) {
        match Self::config_file_path() {
            Ok(path) => Self::load_or_default(&path),
            Err(err) => (Self::default(), Some(err)),
        }
    }

    pub fn load_or_default(path: &Path) -> (Self, Option<ConfigError>) {
        match Self::load_from(path) {
            Ok(config) => (config, None),
            Err(err) => (Self::default(), Some(err)),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
