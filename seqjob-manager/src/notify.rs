//! Job completion notifications
//!
//! The worker decides when to notify and what to say; delivery belongs to a
//! `Notifier`. Failures are returned to the worker, which logs them and
//! leaves the job status alone.

use seqjob_manager_sdk::{async_trait, Notification, Outcome};
use std::time::Duration;
use tracing::info;

use crate::error::NotifyError;

/// Lines of transcript included in a notification
pub const TRANSCRIPT_TAIL_LINES: usize = 40;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes the notification to the structured log only
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification.outcome {
            Outcome::Success => info!(
                job_id = %notification.job_id,
                tool = %notification.tool,
                recipient = %notification.recipient,
                "job finished successfully"
            ),
            Outcome::Failure => info!(
                job_id = %notification.job_id,
                tool = %notification.tool,
                recipient = %notification.recipient,
                error = notification.error.as_deref().unwrap_or("unknown error"),
                "job failed"
            ),
        }
        Ok(())
    }
}

/// POSTs the notification as JSON to a mail relay
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }

        info!(job_id = %notification.job_id, relay = %self.url, "notification delivered");
        Ok(())
    }
}

/// Last `max_lines` lines of a transcript, `None` when empty
pub fn transcript_tail(transcript: &str, max_lines: usize) -> Option<String> {
    let lines: Vec<&str> = transcript.lines().collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(max_lines);
    Some(lines[start..].join("\n"))
}
