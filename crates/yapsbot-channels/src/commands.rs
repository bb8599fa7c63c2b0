//! Chat command parsing and handling.

use std::sync::Arc;
use yapsbot_core::error::Result;
use yapsbot_core::traits::{Notifier, ScoreSource, TrackedHandleStore};
use yapsbot_core::types::{IncomingMessage, ScoreSnapshot};

use crate::format;
use crate::handle::extract_handle;

const MAX_COMPARE: usize = 4;

/// A parsed chat command. Handle arguments are kept raw; they are validated
/// when the command runs so the reply can say what was wrong.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Help,
    Scan(Option<String>),
    Track(Option<String>),
    List,
    Stop(Option<String>),
    Compare(Vec<String>),
    /// Slash command we don't know.
    Unknown(String),
    /// Plain text, not a command.
    Text,
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if !text.starts_with('/') {
            return Command::Text;
        }

        let mut parts = text.split_whitespace();
        let head = parts.next().unwrap_or_default();
        // "/scan@YapsBot" → "scan"
        let name = head[1..].split('@').next().unwrap_or_default().to_lowercase();
        let args: Vec<String> = parts.map(str::to_string).collect();
        let first = args.first().cloned();

        match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "scan" => Command::Scan(first),
            "track" => Command::Track(first),
            "list" => Command::List,
            "stop" => Command::Stop(first),
            "compare" => Command::Compare(args),
            _ => Command::Unknown(head.to_string()),
        }
    }
}

/// Runs chat commands against the score source and the store, replying
/// through the notifier.
#[derive(Clone)]
pub struct CommandHandler {
    source: Arc<dyn ScoreSource>,
    store: Arc<dyn TrackedHandleStore>,
    replier: Arc<dyn Notifier>,
}

impl CommandHandler {
    pub fn new(
        source: Arc<dyn ScoreSource>,
        store: Arc<dyn TrackedHandleStore>,
        replier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            store,
            replier,
        }
    }

    /// Handle one incoming message. Never fails; errors become a generic
    /// reply and a log line.
    pub async fn handle(&self, msg: IncomingMessage) {
        let command = Command::parse(&msg.text);
        tracing::debug!(
            "💬 chat {} ({}): {:?}",
            msg.chat_id,
            msg.sender.as_deref().unwrap_or("?"),
            command
        );

        if let Err(e) = self.dispatch(msg.chat_id, command).await {
            tracing::error!("❌ Command failed in chat {}: {e}", msg.chat_id);
            self.reply(msg.chat_id, "❌ An error occurred. Please try again later.")
                .await;
        }
    }

    async fn dispatch(&self, chat_id: i64, command: Command) -> Result<()> {
        match command {
            Command::Start => self.reply(chat_id, &format::welcome_message()).await,
            Command::Help => self.reply(chat_id, &format::help_message()).await,
            Command::Scan(arg) => self.scan(chat_id, arg).await?,
            Command::Track(arg) => self.track(chat_id, arg).await?,
            Command::List => self.list(chat_id).await?,
            Command::Stop(arg) => self.stop(chat_id, arg).await?,
            Command::Compare(args) => self.compare(chat_id, args).await?,
            Command::Unknown(name) => {
                self.reply(chat_id, &format!("Unknown command {name}. Use /help to see what I can do."))
                    .await
            }
            Command::Text => {
                let text = format!(
                    "❓ Unknown command. Here's what I can do:\n\n{}",
                    format::help_message()
                );
                self.reply(chat_id, &text).await
            }
        }
        Ok(())
    }

    /// Resolve a handle argument, replying with a hint when it is missing or
    /// malformed.
    async fn require_handle(&self, chat_id: i64, arg: Option<String>, usage: &str) -> Option<String> {
        let Some(raw) = arg else {
            self.reply(chat_id, &format!("Please provide a Twitter handle or URL. Example: `{usage}`"))
                .await;
            return None;
        };
        let handle = extract_handle(&raw);
        if handle.is_none() {
            self.reply(
                chat_id,
                &format!(
                    "❌ `{}` doesn't look like a Twitter handle or profile link.",
                    format::escape_markdown(&raw)
                ),
            )
            .await;
        }
        handle
    }

    async fn scan(&self, chat_id: i64, arg: Option<String>) -> Result<()> {
        let Some(handle) = self.require_handle(chat_id, arg, "/scan VitalikButerin").await else {
            return Ok(());
        };

        self.reply(chat_id, &format!("🔍 Looking up Kaito Yaps for {}...", format::handle_link(&handle)))
            .await;

        match self.source.fetch(&handle).await? {
            Some(score) => self.reply(chat_id, &format::score_message(&handle, &score)).await,
            None => self.reply(chat_id, &not_found(&handle)).await,
        }
        Ok(())
    }

    async fn track(&self, chat_id: i64, arg: Option<String>) -> Result<()> {
        let Some(handle) = self.require_handle(chat_id, arg, "/track VitalikButerin").await else {
            return Ok(());
        };

        let Some(score) = self.source.fetch(&handle).await? else {
            self.reply(chat_id, &not_found(&handle)).await;
            return Ok(());
        };

        self.store.track(chat_id, &handle, &score).await?;
        tracing::info!("➕ chat {chat_id} now tracks @{handle}");
        self.reply(
            chat_id,
            &format!(
                "✅ Now tracking {}\nCurrent Yaps: {:.2}\n\nYou'll be notified when their score increases.",
                format::handle_link(&handle),
                score.total()
            ),
        )
        .await;
        Ok(())
    }

    async fn list(&self, chat_id: i64) -> Result<()> {
        let entries = self.store.list_for_chat(chat_id).await?;
        if entries.is_empty() {
            self.reply(
                chat_id,
                "You're not tracking any Twitter handles yet. Use /track <handle> to start.",
            )
            .await;
        } else {
            self.reply(chat_id, &format::list_message(&entries)).await;
        }
        Ok(())
    }

    async fn stop(&self, chat_id: i64, arg: Option<String>) -> Result<()> {
        let Some(handle) = self.require_handle(chat_id, arg, "/stop VitalikButerin").await else {
            return Ok(());
        };

        if self.store.untrack(chat_id, &handle).await? {
            tracing::info!("➖ chat {chat_id} stopped tracking @{handle}");
            self.reply(chat_id, &format!("✅ Stopped tracking {}", format::handle_link(&handle)))
                .await;
        } else {
            self.reply(
                chat_id,
                &format!("You weren't tracking {}", format::handle_link(&handle)),
            )
            .await;
        }
        Ok(())
    }

    async fn compare(&self, chat_id: i64, args: Vec<String>) -> Result<()> {
        let handles: Vec<String> = args
            .iter()
            .filter_map(|a| extract_handle(a))
            .take(MAX_COMPARE)
            .collect();

        if handles.len() < 2 {
            self.reply(
                chat_id,
                "Please provide 2 to 4 Twitter handles. Example: `/compare VitalikButerin elonmusk`",
            )
            .await;
            return Ok(());
        }

        self.reply(chat_id, &format!("🔍 Comparing {} accounts...", handles.len()))
            .await;

        let mut results: Vec<(String, ScoreSnapshot)> = Vec::with_capacity(handles.len());
        for handle in handles {
            match self.source.fetch(&handle).await? {
                Some(score) => results.push((handle, score)),
                None => self.reply(chat_id, &format!("⚠️ {}", not_found(&handle))).await,
            }
        }

        if results.is_empty() {
            self.reply(chat_id, "❌ No data found for any of the provided handles.")
                .await;
            return Ok(());
        }

        results.sort_by(|a, b| b.1.yaps_l24h.total_cmp(&a.1.yaps_l24h));
        self.reply(chat_id, &format::comparison_message(&results)).await;
        Ok(())
    }

    /// Best effort: a failed reply is logged, never propagated.
    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.replier.send(chat_id, text).await {
            tracing::warn!("⚠️ Reply to chat {chat_id} failed: {e}");
        }
    }
}

fn not_found(handle: &str) -> String {
    format!(
        "Could not find Kaito Yaps data for {}. Make sure the handle is correct.",
        format::handle_link(handle)
    )
}
