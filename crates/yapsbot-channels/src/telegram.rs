//! Telegram Bot channel: long polling for commands, `sendMessage` for replies
//! and tracking notifications.

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use yapsbot_core::config::TelegramConfig;
use yapsbot_core::error::{Result, YapsError};
use yapsbot_core::traits::Notifier;
use yapsbot_core::types::IncomingMessage;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram Bot channel. Shared behind an `Arc` between the polling task
/// and everything that sends messages.
pub struct TelegramChannel {
    config: TelegramConfig,
    api_base: String,
    client: reqwest::Client,
    last_update_id: AtomicI64,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self::with_api_base(config, DEFAULT_API_BASE)
    }

    /// Point the channel at another Bot API host (local bot API server, tests).
    pub fn with_api_base(config: TelegramConfig, api_base: &str) -> Self {
        Self {
            config,
            api_base: api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            last_update_id: AtomicI64::new(0),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.config.bot_token, method)
    }

    /// Next `offset` to acknowledge everything seen so far.
    pub fn next_offset(&self) -> i64 {
        self.last_update_id.load(Ordering::SeqCst) + 1
    }

    /// Get updates using long polling.
    pub async fn get_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let long_poll = self.config.long_poll_timeout;
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", self.next_offset().to_string()),
                ("timeout", long_poll.to_string()),
                ("allowed_updates", "[\"message\"]".into()),
            ])
            .timeout(Duration::from_secs(long_poll + 10))
            .send()
            .await
            .map_err(|e| YapsError::Channel(format!("Telegram getUpdates failed: {e}")))?;

        let body: TelegramApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| YapsError::Channel(format!("Invalid Telegram response: {e}")))?;

        let updates = body.into_result("getUpdates")?.unwrap_or_default();
        self.acknowledge(&updates);
        Ok(updates)
    }

    fn acknowledge(&self, updates: &[TelegramUpdate]) {
        if let Some(max) = updates.iter().map(|u| u.update_id).max() {
            self.last_update_id.fetch_max(max, Ordering::SeqCst);
        }
    }

    /// Send a Markdown text message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| YapsError::Channel(format!("sendMessage failed: {e}")))?;

        let result: TelegramApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| YapsError::Channel(format!("Invalid send response: {e}")))?;

        result.into_result("sendMessage")?;
        Ok(())
    }

    /// Get bot info.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| YapsError::Channel(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| YapsError::Channel(format!("Invalid getMe response: {e}")))?;
        body.into_result("getMe")?
            .ok_or_else(|| YapsError::Channel("No bot info".into()))
    }

    /// Verify the token and log the bot identity.
    pub async fn connect(&self) -> Result<TelegramUser> {
        let me = self.get_me().await?;
        tracing::info!(
            "🤖 Telegram bot: @{} ({})",
            me.username.as_deref().unwrap_or("unknown"),
            me.first_name
        );
        Ok(me)
    }

    /// Start the polling loop. Returns a stream of incoming messages; the
    /// loop ends once the stream is dropped.
    pub fn start_polling(self: Arc<Self>) -> TelegramPollingStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            tracing::info!("📡 Telegram polling loop started");
            let idle = Duration::from_secs(self.config.poll_interval);

            loop {
                match self.get_updates().await {
                    Ok(updates) => {
                        for update in updates {
                            let Some(msg) = update.to_incoming() else {
                                continue;
                            };
                            if tx.send(msg).is_err() {
                                tracing::info!("Telegram polling stopped (receiver dropped)");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("❌ Telegram polling error: {e}");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }

                if tx.is_closed() {
                    tracing::info!("Telegram polling stopped (receiver dropped)");
                    return;
                }
                tokio::time::sleep(idle).await;
            }
        });

        TelegramPollingStream { rx }
    }
}

#[async_trait]
impl Notifier for TelegramChannel {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await
    }
}

/// Stream of incoming Telegram messages from polling.
pub struct TelegramPollingStream {
    rx: tokio::sync::mpsc::UnboundedReceiver<IncomingMessage>,
}

impl Stream for TelegramPollingStream {
    type Item = IncomingMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

impl<T> TelegramApiResponse<T> {
    fn into_result(self, method: &str) -> Result<Option<T>> {
        if !self.ok {
            return Err(YapsError::Channel(format!(
                "Telegram {method} error: {}",
                self.description.unwrap_or_default()
            )));
        }
        Ok(self.result)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    pub date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
}

impl TelegramUpdate {
    /// Text messages from humans only.
    pub fn to_incoming(&self) -> Option<IncomingMessage> {
        let msg = self.message.as_ref()?;
        let text = msg.text.as_ref()?;
        let from = msg.from.as_ref()?;

        if from.is_bot {
            return None;
        }

        Some(IncomingMessage {
            chat_id: msg.chat.id,
            sender: from.username.clone().or_else(|| Some(from.first_name.clone())),
            text: text.clone(),
        })
    }
}
