//! Trade summary delivery.
//!
//! Summaries are best effort: delivery failures are logged by the caller and
//! never change an RPC result.

use crate::config::NotifierConfig;
use crate::executor::ResultCode;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Human-readable record of one mutating RPC call.
#[derive(Debug, Clone)]
pub struct TradeSummary {
    pub method: String,
    pub code: ResultCode,
    /// Request as compact JSON
    pub request: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl TradeSummary {
    /// Single-line text used by every notifier.
    pub fn text(&self) -> String {
        let status = match self.code {
            ResultCode::Success => "OK",
            ResultCode::TimedOut => "TIMEOUT",
            ResultCode::Failure => "FAILED",
        };
        let mut text = format!(
            "[{}] {} (code {}, {} ms) {}",
            status, self.method, self.code, self.duration_ms, self.request
        );
        if let Some(error) = &self.error {
            text.push_str(" | ");
            text.push_str(error);
        }
        text
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, summary: &TradeSummary) -> Result<()>;

    fn name(&self) -> &str;
}

/// Writes summaries to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, summary: &TradeSummary) -> Result<()> {
        info!(target: "trade_summary", "{}", summary.text());
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Posts summaries to a Slack-compatible incoming webhook.
pub struct WebhookNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(webhook_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            webhook_url: webhook_url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, summary: &TradeSummary) -> Result<()> {
        let payload = json!({ "text": summary.text() });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("Failed to post webhook notification")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Webhook returned HTTP {}: {}", status, body);
        }

        debug!(method = %summary.method, "Webhook notification sent");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Webhook notifier when enabled, log notifier otherwise.
pub fn from_config(config: &NotifierConfig) -> Result<Box<dyn Notifier>> {
    match (&config.webhook_url, config.enabled) {
        (Some(url), true) => Ok(Box::new(WebhookNotifier::new(url)?)),
        _ => Ok(Box::new(LogNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn summary(code: ResultCode) -> TradeSummary {
        TradeSummary {
            method: "Order".to_string(),
            code,
            request: r#"{"account":"main"}"#.to_string(),
            error: None,
            duration_ms: 12,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_summary_text() {
        assert_eq!(
            summary(ResultCode::Success).text(),
            r#"[OK] Order (code 1, 12 ms) {"account":"main"}"#
        );

        let mut failed = summary(ResultCode::Failure);
        failed.error = Some("unknown account: x".to_string());
        assert!(failed.text().ends_with("| unknown account: x"));
    }

    #[test]
    fn test_from_config_falls_back_to_log() {
        let disabled = NotifierConfig {
            webhook_url: Some("http://localhost/hook".to_string()),
            enabled: false,
        };
        assert_eq!(from_config(&disabled).unwrap().name(), "log");

        let enabled = NotifierConfig {
            webhook_url: Some("http://localhost/hook".to_string()),
            enabled: true,
        };
        assert_eq!(from_config(&enabled).unwrap().name(), "webhook");
    }

    #[tokio::test]
    async fn test_webhook_posts_text_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({
                "text": r#"[TIMEOUT] Order (code 2, 12 ms) {"account":"main"}"#
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(&format!("{}/hook", server.uri())).unwrap();
        notifier.notify(&summary(ResultCode::TimedOut)).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(&server.uri()).unwrap();
        assert_err!(notifier.notify(&summary(ResultCode::Success)).await);
    }
}
