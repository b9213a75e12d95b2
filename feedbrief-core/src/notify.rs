//! Post-run notifications: in-process notifiers and the per-schedule webhook.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::NotifyError;
use crate::models::ScheduleConfig;
use crate::scheduler::RunReport;

/// Receives the result of every schedule execution.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, schedule_name: &str, report: &RunReport) -> Result<(), NotifyError>;
}

/// Named notifiers, dispatched in name order.
#[derive(Clone, Default)]
pub struct NotifierRegistry {
    notifiers: BTreeMap<String, Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `notifier` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, notifier: Arc<dyn Notifier>) {
        self.notifiers.insert(name.into(), notifier);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.notifiers.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.notifiers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Call every notifier. Failures are logged and do not stop the others.
    /// Returns the number of notifiers that failed.
    pub async fn dispatch(&self, schedule_name: &str, report: &RunReport) -> usize {
        let mut failures = 0;
        for (name, notifier) in &self.notifiers {
            if let Err(err) = notifier.notify(schedule_name, report).await {
                failures += 1;
                warn!(
                    notifier = %name,
                    schedule = %schedule_name,
                    error = %err,
                    "notifier failed"
                );
            }
        }
        failures
    }
}

/// Writes a one-line summary of each run to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, schedule_name: &str, report: &RunReport) -> Result<(), NotifyError> {
        if report.success {
            info!(
                schedule = %schedule_name,
                feeds = report.feeds_processed,
                new = report.new_articles,
                "schedule run finished"
            );
        } else {
            warn!(
                schedule = %schedule_name,
                error = report.error.as_deref().unwrap_or("unknown"),
                "schedule run failed"
            );
        }
        Ok(())
    }
}

/// Build the webhook body: `{timestamp, result, config}` with the schedule's
/// static `callback_payload` merged in at the top level.
pub fn webhook_payload(
    config: &ScheduleConfig,
    report: &RunReport,
    timestamp: DateTime<Utc>,
) -> Result<Value, serde_json::Error> {
    let mut body = Map::new();
    body.insert(
        "timestamp".to_owned(),
        Value::String(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    body.insert("result".to_owned(), serde_json::to_value(report)?);
    body.insert("config".to_owned(), serde_json::to_value(config)?);
    if let Some(extra) = &config.callback_payload {
        body.extend(extra.iter().map(|(key, value)| (key.clone(), value.clone())));
    }
    Ok(Value::Object(body))
}

/// Delivers run results to a schedule's `callback_url`.
///
/// Delivery is at-most-once: there is no retry, and a non-2xx answer is
/// handled the same way as a connection failure.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn deliver(
        &self,
        config: &ScheduleConfig,
        report: &RunReport,
    ) -> Result<(), NotifyError> {
        let Some(url) = config.callback_url.as_deref() else {
            return Ok(());
        };
        let payload = webhook_payload(config, report, Utc::now())
            .map_err(|err| NotifyError::Rejected(format!("unencodable payload: {err}")))?;
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(schedule = %config.name, url = %url, "webhook delivered");
        Ok(())
    }
}
