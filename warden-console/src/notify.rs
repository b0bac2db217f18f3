//! Operator notifications
//!
//! One authorized operator, best-effort delivery. The tracker fires and
//! forgets; a lost message is logged, never propagated.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a text message to the operator. `markdown` enables rich
    /// formatting where the transport supports it.
    async fn send(&self, text: &str, markdown: bool);
}

/// Notifier backed by the Telegram Bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    token: String,
    chat_id: i64,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: i64) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.to_string(),
            chat_id,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str, markdown: bool) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": text,
        });
        if markdown {
            body["parse_mode"] = json!("Markdown");
        }

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("notification delivered");
            }
            Ok(response) => {
                warn!("notification rejected: {}", response.status());
            }
            Err(e) => {
                warn!("notification send failed: {e:#}");
            }
        }
    }
}
