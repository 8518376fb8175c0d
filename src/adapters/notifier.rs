//! Notification channels.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ExternalError;
use crate::pipeline::Notifier;

/// Writes the summary to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, text: &str) -> Result<(), ExternalError> {
        info!(channel = "log", "\n{}", text);
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    text: &'a str,
}

/// Posts `{"text": ...}` to a webhook URL.
///
/// Non-2xx responses become [`ExternalError::Http`], so 429 and 5xx
/// responses are classified as transient.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            url: url.into(),
        }
    }

    /// Get the target URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, text: &str) -> Result<(), ExternalError> {
        let response = self
            .client
            .post(&self.url)
            .header("User-Agent", "digest-forge/0.1")
            .json(&WebhookBody { text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalError::http(status.as_u16(), body));
        }
        debug!(status = %status, "Webhook accepted notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier() {
        let notifier = LogNotifier::new();
        assert_eq!(notifier.name(), "log");
        assert!(notifier.notify("hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_network_error() {
        // Port 9 on localhost is the discard service and normally closed.
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook");
        let err = notifier.notify("hello").await.unwrap_err();
        assert!(
            matches!(err, ExternalError::Network { .. } | ExternalError::Other(_)),
            "unexpected error: {}",
            err
        );
    }
}
