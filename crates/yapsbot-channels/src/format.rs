//! Telegram message rendering (legacy Markdown parse mode).

use yapsbot_core::delta::ScoreDelta;
use yapsbot_core::types::{ScoreSnapshot, ScoreWindow, TrackedEntry};

use crate::handle::profile_url;

const MEDALS: [&str; 4] = ["🥇", "🥈", "🥉", "4️⃣"];

/// Escape Telegram MarkdownV1 special characters.
pub fn escape_markdown(s: &str) -> String {
    s.replace('_', "\\_")
        .replace('*', "\\*")
        .replace('[', "\\[")
        .replace('`', "\\`")
}

/// `[@handle](https://x.com/handle)`
pub fn handle_link(handle: &str) -> String {
    format!("[@{}]({})", escape_markdown(handle), profile_url(handle))
}

/// Current scores for one handle (`/scan`).
pub fn score_message(handle: &str, score: &ScoreSnapshot) -> String {
    let mut msg = format!("📊 Kaito Yaps for *{}*\n\n", handle_link(handle));
    msg.push_str(&format!("• Total: {:.2}\n", score.total()));
    msg.push_str(&format!("• Last 24h: {:.2}\n\n", score.yaps_l24h));
    msg.push_str("🔎 *More details:*\n");
    let details = [
        ScoreWindow::L7d,
        ScoreWindow::L30d,
        ScoreWindow::L3m,
        ScoreWindow::L6m,
        ScoreWindow::L12m,
    ];
    let lines: Vec<String> = details
        .iter()
        .map(|w| format!("• {}: {:.2}", w.label(), score.window(*w)))
        .collect();
    msg.push_str(&lines.join("\n"));
    msg
}

/// Tracked handles of one chat (`/list`).
pub fn list_message(entries: &[TrackedEntry]) -> String {
    let lines: Vec<String> = entries
        .iter()
        .map(|e| format!("• {} - {:.2} Yaps", handle_link(&e.handle), e.snapshot.total()))
        .collect();
    format!("📋 *Your tracked Twitter handles:*\n\n{}", lines.join("\n"))
}

/// Increase notification sent by the tracking loop.
pub fn score_change_message(handle: &str, current: &ScoreSnapshot, delta: &ScoreDelta) -> String {
    let mut msg = format!("🚀 {} gained Yaps!\n\n", handle_link(handle));

    match delta.percent_increase {
        Some(pct) => msg.push_str(&format!(
            "*Total increase:* +{:.2} Yaps (↑{:.2}%)\n",
            delta.total_increase, pct
        )),
        None => msg.push_str(&format!("*Total increase:* +{:.2} Yaps\n", delta.total_increase)),
    }
    msg.push_str(&format!("*Current Yaps:* {:.2} Yaps\n", current.total()));

    if !delta.windows.is_empty() {
        msg.push_str("\n*Breakdown by time period:*\n");
        for w in &delta.windows {
            msg.push_str(&format!("• {}: +{:.2}\n", w.window.label(), w.increase));
        }
    }
    msg
}

/// Same as [`score_change_message`], shaped for the scheduler's formatter hook.
pub fn tracked_change_message(entry: &TrackedEntry, current: &ScoreSnapshot, delta: &ScoreDelta) -> String {
    score_change_message(&entry.handle, current, delta)
}

/// Ranking for `/compare`, in the order given (caller sorts).
pub fn comparison_message(results: &[(String, ScoreSnapshot)]) -> String {
    let mut msg = String::from("🏆 *Kaito Yaps Comparison (Last 24h)*\n\n");
    let blocks: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, (handle, score))| {
            let rank = MEDALS
                .get(i)
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("{}.", i + 1));
            format!(
                "{rank} {}\n   • Last 24h: {:.2}\n   • Total: {:.2}",
                handle_link(handle),
                score.yaps_l24h,
                score.total()
            )
        })
        .collect();
    msg.push_str(&blocks.join("\n\n"));
    msg
}

pub fn help_message() -> String {
    "🤖 *Kaito Yaps Tracker Bot Help*\n\n\
     Available commands:\n\n\
     • `/scan <twitter_handle or URL>` - Check current Kaito Yaps\n\
     • `/track <twitter_handle or URL>` - Track a Twitter handle\n\
     • `/list` - Show all Twitter handles you're tracking\n\
     • `/stop <twitter_handle or URL>` - Stop tracking a handle\n\
     • `/compare <handle1> <handle2> ...` - Compare up to 4 accounts\n\
     • `/help` - Show this help message\n\n\
     You can provide Twitter handles as @username, username, or a \
     twitter.com / x.com profile or status link.\n\n\
     This bot will notify you when tracked users gain Yaps points!"
        .to_string()
}

pub fn welcome_message() -> String {
    format!("👋 Welcome to Kaito Yaps Tracker Bot!\n\n{}", help_message())
}
