//! Interval scheduler.
//!
//! A single loop task wakes up every tick, finds the schedules whose
//! `next_run` has passed and spawns one execution per due schedule. A
//! schedule never has two executions in flight; a still-running schedule is
//! skipped by later ticks and rejected by [`Scheduler::run_now`].
//!
//! Stopping cancels the loop only. Executions it already spawned run to
//! completion.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{CoreError, Result};
use crate::ingest::FeedIngestor;
use crate::models::{
    Article, FeedId, FeedScope, ScheduleConfig, ScheduleState, ScheduleUpdate,
};
use crate::notify::{Notifier, NotifierRegistry, WebhookNotifier};
use crate::storage::Store;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub webhook_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            webhook_timeout: Duration::from_secs(60),
        }
    }
}

/// Result of one schedule execution, handed to notifiers and the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schedule_name: String,
    pub feed_id: Option<FeedId>,
    pub feed_name: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub feeds_processed: usize,
    pub new_articles: usize,
    /// feed name -> number of new articles
    pub per_feed: BTreeMap<String, usize>,
    pub articles: Vec<Article>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    pub name: String,
    pub enabled: bool,
    pub state: ScheduleState,
    pub interval_minutes: u32,
    pub scope: FeedScope,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub has_callback: bool,
    pub in_flight: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub total_schedules: usize,
    pub enabled_schedules: usize,
    pub registered_notifiers: Vec<String>,
    pub schedules: Vec<ScheduleStatus>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    configs: BTreeMap<String, ScheduleConfig>,
    in_flight: HashSet<String>,
    running: bool,
}

struct LoopHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    async fn stop(self) -> Result<()> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(CoreError::from)
    }
}

struct Inner {
    ingestor: Arc<FeedIngestor>,
    store: Arc<dyn Store>,
    state: Mutex<SchedulerState>,
    notifiers: RwLock<NotifierRegistry>,
    webhook: WebhookNotifier,
    tick: Duration,
    handle: Mutex<Option<LoopHandle>>,
}

/// Cheap to clone; all clones drive the same schedules.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate(config: &ScheduleConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(CoreError::InvalidSchedule("name must not be empty".into()));
    }
    if config.interval_minutes == 0 {
        return Err(CoreError::InvalidSchedule(format!(
            "'{}': interval_minutes must be at least 1",
            config.name
        )));
    }
    if config.max_articles == 0 {
        return Err(CoreError::InvalidSchedule(format!(
            "'{}': max_articles must be at least 1",
            config.name
        )));
    }
    if let Some(raw) = &config.callback_url {
        let url = Url::parse(raw).map_err(|err| {
            CoreError::InvalidSchedule(format!("'{}': bad callback_url: {err}", config.name))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::InvalidSchedule(format!(
                "'{}': callback_url must be http or https",
                config.name
            )));
        }
    }
    Ok(())
}

/// Clears a schedule's in-flight mark when the execution ends, even if the
/// execution task panics.
struct InFlightGuard {
    inner: Arc<Inner>,
    name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.inner.state).in_flight.remove(&self.name);
    }
}

impl Scheduler {
    pub fn new(ingestor: Arc<FeedIngestor>, client: Client, settings: SchedulerSettings) -> Self {
        let store = ingestor.store().clone();
        let webhook = WebhookNotifier::new(client).with_timeout(settings.webhook_timeout);
        Self {
            inner: Arc::new(Inner {
                ingestor,
                store,
                state: Mutex::new(SchedulerState::default()),
                notifiers: RwLock::new(NotifierRegistry::new()),
                webhook,
                tick: settings.tick,
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn ingestor(&self) -> &Arc<FeedIngestor> {
        &self.inner.ingestor
    }

    /// Load persisted schedules. Schedules already registered under the same
    /// name are kept. Returns how many were restored.
    pub async fn restore_schedules(&self) -> Result<usize> {
        let persisted = self.inner.store.list_schedules().await?;
        let now = Utc::now();
        let mut restored = 0;
        let mut state = lock(&self.inner.state);
        for mut config in persisted {
            if let Err(err) = validate(&config) {
                warn!(schedule = %config.name, error = %err, "skipping invalid persisted schedule");
                continue;
            }
            if state.configs.contains_key(&config.name) {
                continue;
            }
            if config.next_run.is_none() {
                config.arm(now);
            }
            state.configs.insert(config.name.clone(), config);
            restored += 1;
        }
        info!(restored, "restored schedules");
        Ok(restored)
    }

    /// Register a new schedule. `next_run` is armed from `last_run`, or from
    /// now when it never ran.
    pub async fn add_schedule(&self, mut config: ScheduleConfig) -> Result<ScheduleConfig> {
        validate(&config)?;
        config.arm(Utc::now());
        {
            let mut state = lock(&self.inner.state);
            if state.configs.contains_key(&config.name) {
                return Err(CoreError::ScheduleExists(config.name));
            }
            state.configs.insert(config.name.clone(), config.clone());
        }
        if let Err(err) = self.inner.store.upsert_schedule(&config).await {
            lock(&self.inner.state).configs.remove(&config.name);
            return Err(err.into());
        }
        info!(schedule = %config.name, interval = config.interval_minutes, "schedule added");
        Ok(config)
    }

    /// Remove a schedule. An execution already in flight finishes but no
    /// longer touches the schedule.
    pub async fn remove_schedule(&self, name: &str) -> Result<()> {
        if lock(&self.inner.state).configs.remove(name).is_none() {
            return Err(CoreError::ScheduleNotFound(name.to_owned()));
        }
        self.inner.store.delete_schedule(name).await?;
        info!(schedule = %name, "schedule removed");
        Ok(())
    }

    pub async fn update_schedule(&self, name: &str, update: ScheduleUpdate) -> Result<ScheduleConfig> {
        let updated = {
            let mut state = lock(&self.inner.state);
            let current = state
                .configs
                .get_mut(name)
                .ok_or_else(|| CoreError::ScheduleNotFound(name.to_owned()))?;
            let mut candidate = current.clone();
            update.apply(&mut candidate, Utc::now());
            validate(&candidate)?;
            *current = candidate.clone();
            candidate
        };
        self.inner.store.upsert_schedule(&updated).await?;
        debug!(schedule = %name, "schedule updated");
        Ok(updated)
    }

    pub fn get_schedule(&self, name: &str) -> Option<ScheduleConfig> {
        lock(&self.inner.state).configs.get(name).cloned()
    }

    pub fn list_schedules(&self) -> Vec<ScheduleConfig> {
        lock(&self.inner.state).configs.values().cloned().collect()
    }

    pub fn register_notifier(&self, name: impl Into<String>, notifier: Arc<dyn Notifier>) {
        self.inner
            .notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name, notifier);
    }

    pub fn unregister_notifier(&self, name: &str) -> bool {
        self.inner
            .notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(name)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.state).running
    }

    /// Spawn the scheduling loop. Calling this while running does nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut handle = lock(&self.inner.handle);
        if handle.is_some() {
            warn!("scheduler already running");
            return;
        }
        lock(&self.inner.state).running = true;
        *handle = Some(spawn_loop(Arc::clone(&self.inner)));
        info!(tick_secs = self.inner.tick.as_secs(), "scheduler started");
    }

    /// Cancel the loop and wait for it to exit. No tick runs after this
    /// returns. Stopping a stopped scheduler does nothing.
    pub async fn stop(&self) -> Result<()> {
        let handle = {
            let mut handle = lock(&self.inner.handle);
            lock(&self.inner.state).running = false;
            handle.take()
        };
        if let Some(handle) = handle {
            handle.stop().await?;
            info!("scheduler stopped");
        }
        Ok(())
    }

    pub fn status(&self) -> SchedulerStatus {
        let now = Utc::now();
        let registered_notifiers = self
            .inner
            .notifiers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .names();
        let state = lock(&self.inner.state);
        let schedules: Vec<ScheduleStatus> = state
            .configs
            .values()
            .map(|config| ScheduleStatus {
                name: config.name.clone(),
                enabled: config.enabled,
                state: config.state(now),
                interval_minutes: config.interval_minutes,
                scope: config.scope,
                last_run: config.last_run,
                next_run: config.next_run,
                has_callback: config.callback_url.is_some(),
                in_flight: state.in_flight.contains(&config.name),
            })
            .collect();
        SchedulerStatus {
            running: state.running,
            total_schedules: schedules.len(),
            enabled_schedules: schedules.iter().filter(|s| s.enabled).count(),
            registered_notifiers,
            schedules,
        }
    }

    /// Execute a schedule immediately, regardless of `next_run`.
    pub async fn run_now(&self, name: &str) -> Result<RunReport> {
        let guard = {
            let mut state = lock(&self.inner.state);
            if !state.running {
                return Err(CoreError::NotRunning);
            }
            if !state.configs.contains_key(name) {
                return Err(CoreError::ScheduleNotFound(name.to_owned()));
            }
            if !state.in_flight.insert(name.to_owned()) {
                return Err(CoreError::ScheduleBusy(name.to_owned()));
            }
            InFlightGuard {
                inner: Arc::clone(&self.inner),
                name: name.to_owned(),
            }
        };
        info!(schedule = %name, "manual run requested");
        let report = execute(&self.inner, name).await;
        drop(guard);
        report
    }
}

fn spawn_loop(inner: Arc<Inner>) -> LoopHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(inner.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    info!("scheduler shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    fire_due(&inner, Utc::now());
                }
            }
        }
    });

    LoopHandle { cancel_tx, join }
}

/// Spawn an execution for every due schedule that is not already running.
fn fire_due(inner: &Arc<Inner>, now: DateTime<Utc>) {
    let due: Vec<String> = {
        let mut state = lock(&inner.state);
        let names: Vec<String> = state
            .configs
            .values()
            .filter(|config| config.is_due(now))
            .map(|config| config.name.clone())
            .filter(|name| !state.in_flight.contains(name))
            .collect();
        for name in &names {
            state.in_flight.insert(name.clone());
        }
        names
    };
    debug!(due = due.len(), "scheduler tick");

    for name in due {
        let guard = InFlightGuard {
            inner: Arc::clone(inner),
            name: name.clone(),
        };
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(err) = execute(&inner, &name).await {
                error!(schedule = %name, error = %err, "scheduled run failed");
            }
        });
    }
}

async fn execute(inner: &Arc<Inner>, name: &str) -> Result<RunReport> {
    let config = lock(&inner.state)
        .configs
        .get(name)
        .cloned()
        .ok_or_else(|| CoreError::ScheduleNotFound(name.to_owned()))?;
    let started_at = Utc::now();
    info!(schedule = %name, "executing schedule");

    let mut report = match config.scope {
        FeedScope::Single(feed_id) => {
            let refreshed = inner.ingestor.refresh_feed(feed_id, config.max_articles).await;
            let mut per_feed = BTreeMap::new();
            if let (true, Some(feed_name)) = (refreshed.success, &refreshed.feed_name) {
                per_feed.insert(feed_name.clone(), refreshed.new_articles);
            }
            RunReport {
                schedule_name: config.name.clone(),
                feed_id: Some(feed_id),
                feed_name: refreshed.feed_name,
                success: refreshed.success,
                error: refreshed.error,
                feeds_processed: usize::from(refreshed.success),
                new_articles: refreshed.new_articles,
                per_feed,
                articles: refreshed.articles,
                started_at,
                finished_at: started_at,
            }
        }
        FeedScope::All => {
            let results = inner.ingestor.ingest_all(config.max_articles).await;
            let per_feed: BTreeMap<String, usize> = results
                .iter()
                .map(|(feed, articles)| (feed.clone(), articles.len()))
                .collect();
            RunReport {
                schedule_name: config.name.clone(),
                feed_id: None,
                feed_name: None,
                success: true,
                error: None,
                feeds_processed: results.len(),
                new_articles: per_feed.values().sum(),
                per_feed,
                articles: results.into_values().flatten().collect(),
                started_at,
                finished_at: started_at,
            }
        }
    };
    report.finished_at = Utc::now();

    if !report.success {
        warn!(
            schedule = %name,
            error = report.error.as_deref().unwrap_or("unknown"),
            "schedule target unavailable"
        );
    }

    // A failed run still advances the cadence so a broken target is not
    // retried on every tick.
    let stamped = {
        let mut state = lock(&inner.state);
        let current = state.configs.get_mut(name).map(|current| {
            current.record_run(started_at);
            current.clone()
        });
        current
    };
    match &stamped {
        Some(stamped) => {
            if let Err(err) = inner.store.upsert_schedule(stamped).await {
                warn!(schedule = %name, error = %err, "failed to persist schedule timing");
            }
        }
        None => debug!(schedule = %name, "schedule removed during run"),
    }

    let notifiers = inner
        .notifiers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    notifiers.dispatch(name, &report).await;

    let target = stamped.as_ref().unwrap_or(&config);
    if target.callback_url.is_some() {
        if let Err(err) = inner.webhook.deliver(target, &report).await {
            warn!(schedule = %name, error = %err, "webhook delivery failed");
        }
    }

    info!(
        schedule = %name,
        new = report.new_articles,
        feeds = report.feeds_processed,
        "schedule executed"
    );
    Ok(report)
}
