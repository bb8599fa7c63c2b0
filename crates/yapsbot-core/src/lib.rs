//! # Yapsbot Core
//!
//! Shared building blocks for the yapsbot workspace:
//! - [`types`]: score snapshots, tracked entries, incoming chat messages
//! - [`delta`]: score delta engine
//! - [`traits`]: the collaborator seams (score source, store, notifier)
//! - [`config`]: TOML configuration with env overrides
//! - [`error`]: the crate-wide error type

pub mod config;
pub mod delta;
pub mod error;
pub mod traits;
pub mod types;

pub use config::YapsConfig;
pub use delta::{ScoreDelta, WindowDelta, compute_delta};
pub use error::{Result, YapsError};
pub use traits::{Notifier, ScoreSource, TrackedHandleStore};
pub use types::{IncomingMessage, ScoreSnapshot, ScoreWindow, TrackedEntry};
