//! Domain types: score snapshots, tracked entries, chat messages.

use serde::{Deserialize, Serialize};

/// Point-in-time Yaps measurement for one handle.
///
/// Field names follow the Kaito API payload so the same JSON is used on the
/// wire and in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    /// Total cumulative score.
    pub yaps_all: f64,
    #[serde(default)]
    pub yaps_l24h: f64,
    #[serde(default)]
    pub yaps_l48h: f64,
    #[serde(default)]
    pub yaps_l7d: f64,
    #[serde(default)]
    pub yaps_l30d: f64,
    #[serde(default)]
    pub yaps_l3m: f64,
    #[serde(default)]
    pub yaps_l6m: f64,
    #[serde(default)]
    pub yaps_l12m: f64,
}

impl ScoreSnapshot {
    /// Snapshot with only a total; windows start at zero.
    pub fn with_total(username: &str, total: f64) -> Self {
        Self {
            user_id: String::new(),
            username: username.to_string(),
            yaps_all: total,
            yaps_l24h: 0.0,
            yaps_l48h: 0.0,
            yaps_l7d: 0.0,
            yaps_l30d: 0.0,
            yaps_l3m: 0.0,
            yaps_l6m: 0.0,
            yaps_l12m: 0.0,
        }
    }

    /// Builder-style setter for a single window.
    pub fn with_window(mut self, window: ScoreWindow, value: f64) -> Self {
        *window.slot_mut(&mut self) = value;
        self
    }

    pub fn total(&self) -> f64 {
        self.yaps_all
    }

    pub fn window(&self, window: ScoreWindow) -> f64 {
        match window {
            ScoreWindow::L24h => self.yaps_l24h,
            ScoreWindow::L48h => self.yaps_l48h,
            ScoreWindow::L7d => self.yaps_l7d,
            ScoreWindow::L30d => self.yaps_l30d,
            ScoreWindow::L3m => self.yaps_l3m,
            ScoreWindow::L6m => self.yaps_l6m,
            ScoreWindow::L12m => self.yaps_l12m,
        }
    }
}

/// Rolling windows reported by Kaito, shortest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreWindow {
    L24h,
    L48h,
    L7d,
    L30d,
    L3m,
    L6m,
    L12m,
}

impl ScoreWindow {
    pub const ALL: [ScoreWindow; 7] = [
        ScoreWindow::L24h,
        ScoreWindow::L48h,
        ScoreWindow::L7d,
        ScoreWindow::L30d,
        ScoreWindow::L3m,
        ScoreWindow::L6m,
        ScoreWindow::L12m,
    ];

    /// Human label used in chat messages.
    pub fn label(&self) -> &'static str {
        match self {
            ScoreWindow::L24h => "Last 24h",
            ScoreWindow::L48h => "Last 48h",
            ScoreWindow::L7d => "Last 7d",
            ScoreWindow::L30d => "Last 30d",
            ScoreWindow::L3m => "Last 3m",
            ScoreWindow::L6m => "Last 6m",
            ScoreWindow::L12m => "Last 12m",
        }
    }

    fn slot_mut<'a>(&self, snapshot: &'a mut ScoreSnapshot) -> &'a mut f64 {
        match self {
            ScoreWindow::L24h => &mut snapshot.yaps_l24h,
            ScoreWindow::L48h => &mut snapshot.yaps_l48h,
            ScoreWindow::L7d => &mut snapshot.yaps_l7d,
            ScoreWindow::L30d => &mut snapshot.yaps_l30d,
            ScoreWindow::L3m => &mut snapshot.yaps_l3m,
            ScoreWindow::L6m => &mut snapshot.yaps_l6m,
            ScoreWindow::L12m => &mut snapshot.yaps_l12m,
        }
    }
}

impl std::fmt::Display for ScoreWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One subscription: a chat following a handle, with the last seen snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntry {
    pub chat_id: i64,
    /// Lowercased handle (store key).
    pub handle: String,
    pub snapshot: ScoreSnapshot,
}

/// A text message received from a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub sender: Option<String>,
    pub text: String,
}

/// Normalize a handle into its store key.
pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}
