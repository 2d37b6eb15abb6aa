//! Trade notifications via incoming webhook.
//!
//! Delivery is best-effort: a trade that executed must never be unwound
//! because a chat message failed, so errors are logged and swallowed.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

/// Sink for human-readable trade and snapshot messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Posts messages to a Slack-compatible incoming webhook.
pub struct SlackNotifier {
    http: Client,
    webhook_url: String,
}

impl SlackNotifier {
    /// An empty webhook URL disables delivery; messages go to the debug log.
    pub fn new(webhook_url: &str) -> Self {
        Self {
            http: Client::new(),
            webhook_url: webhook_url.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, text: &str) {
        if self.webhook_url.is_empty() {
            debug!(%text, "Notifications disabled, skipping");
            return;
        }

        let result = self
            .http
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await;

        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(status = %response.status(), "Webhook rejected notification");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "Failed to deliver notification");
            }
        }
    }
}

/// Discards every message. Used in tests.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _text: &str) {}
}

/// Captures every message for assertions. Used in tests.
#[cfg(test)]
pub struct RecordingNotifier {
    messages: tokio::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            messages: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) {
        self.messages.lock().await.push(text.to_string());
    }
}
