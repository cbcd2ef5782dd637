//! Run summary delivery
//!
//! Notifications are best effort. A run never fails because its summary
//! could not be sent.

use crate::config::NotifyConfig;
use crate::error::{CliError, CliResult};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Request timeout for webhook delivery
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

/// Something that can deliver a text message
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Deliver `message`
    async fn notify(&self, message: &str) -> CliResult<()>;
}

/// JSON body posted to the webhook
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload<'a> {
    /// Recipient
    pub to: &'a str,
    /// Message text
    pub message: &'a str,
    /// Shared secret
    pub token: &'a str,
}

/// Posts `{"to", "message", "token"}` to a URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    token: String,
    to: String,
}

impl WebhookNotifier {
    /// Create a notifier for `url`
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>, to: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
            token: token.into(),
            to: to.into(),
        }
    }

    /// Body sent for `message`
    #[must_use]
    pub fn payload<'a>(&'a self, message: &'a str) -> WebhookPayload<'a> {
        WebhookPayload {
            to: &self.to,
            message,
            token: &self.token,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, message: &str) -> CliResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.payload(message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CliError::notification(format!("status {status}: {body}")));
        }
        tracing::info!(to = %self.to, "notification sent");
        Ok(())
    }
}

/// Writes messages to the log instead of sending them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, message: &str) -> CliResult<()> {
        tracing::info!(%message, "notifications disabled, summary logged only");
        Ok(())
    }
}

/// Notifier for `config`; incomplete webhook settings fall back to logging
#[must_use]
pub fn from_config(config: &NotifyConfig) -> Box<dyn Notifier> {
    if !config.enabled {
        return Box::new(LogNotifier);
    }
    match (&config.url, &config.token, &config.to) {
        (Some(url), Some(token), Some(to))
            if !url.is_empty() && !token.is_empty() && !to.is_empty() =>
        {
            Box::new(WebhookNotifier::new(url.as_str(), token.as_str(), to.as_str()))
        }
        _ => {
            tracing::warn!(missing = ?config.missing(), "notifications enabled but not configured");
            Box::new(LogNotifier)
        }
    }
}

/// Send `message`, logging instead of failing. Returns whether it was delivered.
pub async fn deliver(notifier: &dyn Notifier, message: &str) -> bool {
    match notifier.notify(message).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(notifier = notifier.name(), error = %e, "notification not delivered");
            false
        }
    }
}
