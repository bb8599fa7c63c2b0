//! # Yapsbot Channels
//! Chat-facing side of the bot.
//!
//! - [`telegram`]: Bot API long polling + `sendMessage` (implements `Notifier`)
//! - [`commands`]: `/scan`, `/track`, `/list`, `/stop`, `/compare`, `/help`
//! - [`format`]: Markdown message rendering
//! - [`handle`]: Twitter/X handle and URL parsing

pub mod commands;
pub mod format;
pub mod handle;
pub mod telegram;

pub use commands::{Command, CommandHandler};
pub use telegram::{TelegramChannel, TelegramPollingStream};
