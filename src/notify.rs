//! Operator notifications.
//!
//! Notifications are fire-and-forget: delivery failures are logged and
//! never propagated into control flow.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, warn};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// One-way message-send capability injected into each component.
pub trait Notifier: Send + Sync {
    fn notify(&self, text: &str);
}

/// Fallback notifier that only writes to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, text: &str) {
        info!("[NOTIFY] {}", text);
    }
}

/// Sends messages to a Telegram chat via the Bot API.
#[derive(Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::with_api_base(TELEGRAM_API_BASE, token, chat_id)
    }

    /// Point the notifier at a different API host. Used by tests.
    pub fn with_api_base(
        api_base: impl Into<String>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }

    pub async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        self.http
            .post(&url)
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await
            .context("Telegram request failed")?
            .error_for_status()
            .context("Telegram API returned an error")?;
        Ok(())
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, text: &str) {
        info!("[NOTIFY] {}", text);
        let this = self.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.send(&text).await {
                warn!("[NOTIFY] Failed to deliver notification: {:#}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn telegram_send_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST-TOKEN/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "42",
                "text": "hello"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::with_api_base(server.uri(), "TEST-TOKEN", "42");
        notifier.send("hello").await.unwrap();
    }

    #[tokio::test]
    async fn telegram_send_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::with_api_base(server.uri(), "BAD", "42");
        assert!(notifier.send("hello").await.is_err());
    }
}
