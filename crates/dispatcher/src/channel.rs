//! Notification channels

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ChannelError;

/// A destination for notification text
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Unique channel name
    fn name(&self) -> &str;

    /// Deliver one message
    async fn send(&self, text: &str) -> Result<(), ChannelError>;
}

/// Telegram bot channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token
    pub bot_token: String,
    /// Recipient chat
    pub chat_id: String,
    /// API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// `Markdown`, `HTML`, or none
    #[serde(default)]
    pub parse_mode: Option<String>,
    /// Request timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Sends through the Telegram Bot API `sendMessage` call
pub struct TelegramChannel {
    name: String,
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(name: impl Into<String>, config: TelegramConfig) -> Result<Self, ChannelError> {
        if config.bot_token.trim().is_empty() {
            return Err(ChannelError::Config("telegram bot token is empty".into()));
        }
        if config.chat_id.trim().is_empty() {
            return Err(ChannelError::Config("telegram chat id is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        let name = name.into();
        info!("Creating telegram channel {} for chat {}", name, config.chat_id);
        Ok(Self { name, config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let mut payload = json!({
            "chat_id": self.config.chat_id,
            "text": text,
        });
        if let Some(mode) = &self.config.parse_mode {
            payload["parse_mode"] = json!(mode);
        }

        let response = self.client.post(self.endpoint()).json(&payload).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!("Telegram accepted message on {}", self.name);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ChannelError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Writes notifications to the log. Never fails.
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        info!(channel = %self.name, "{}", text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telegram(token: &str, chat: &str) -> TelegramConfig {
        TelegramConfig {
            bot_token: token.to_string(),
            chat_id: chat.to_string(),
            api_base: "https://api.telegram.org/".to_string(),
            parse_mode: None,
            timeout_secs: 10,
        }
    }

    #[test]
    fn test_telegram_requires_credentials() {
        assert!(matches!(
            TelegramChannel::new("ops", telegram("", "42")),
            Err(ChannelError::Config(_))
        ));
        assert!(matches!(
            TelegramChannel::new("ops", telegram("123:abc", " ")),
            Err(ChannelError::Config(_))
        ));
    }

    #[test]
    fn test_telegram_endpoint() {
        let channel = TelegramChannel::new("ops", telegram("123:abc", "42")).unwrap();
        assert_eq!(channel.endpoint(), "https://api.telegram.org/bot123:abc/sendMessage");
        assert_eq!(channel.name(), "ops");
    }

    #[tokio::test]
    async fn test_log_channel_always_succeeds() {
        let channel = LogChannel::new("log");
        assert!(channel.send("hello").await.is_ok());
    }
}
