//! Score delta engine: decides whether a handle gained Yaps between two
//! snapshots and describes by how much. Pure, no I/O.

use serde::{Deserialize, Serialize};

use crate::types::{ScoreSnapshot, ScoreWindow};

/// Increase observed between two snapshots of the same handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDelta {
    pub total_increase: f64,
    /// `None` when the previous total was zero (percentage undefined).
    pub percent_increase: Option<f64>,
    /// Windows that strictly increased, shortest window first.
    pub windows: Vec<WindowDelta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowDelta {
    pub window: ScoreWindow,
    pub increase: f64,
}

impl ScoreDelta {
    /// Increase for one window, if it went up.
    pub fn window(&self, window: ScoreWindow) -> Option<f64> {
        self.windows
            .iter()
            .find(|w| w.window == window)
            .map(|w| w.increase)
    }
}

/// Compare `previous` with `current`. Returns `None` unless the total grew.
pub fn compute_delta(previous: &ScoreSnapshot, current: &ScoreSnapshot) -> Option<ScoreDelta> {
    if current.total() <= previous.total() {
        return None;
    }

    let total_increase = current.total() - previous.total();
    let percent_increase = if previous.total() == 0.0 {
        None
    } else {
        Some(total_increase / previous.total() * 100.0)
    };

    let windows = ScoreWindow::ALL
        .iter()
        .filter(|w| current.window(**w) > previous.window(**w))
        .map(|w| WindowDelta {
            window: *w,
            increase: current.window(*w) - previous.window(*w),
        })
        .collect();

    Some(ScoreDelta {
        total_increase,
        percent_increase,
        windows,
    })
}
