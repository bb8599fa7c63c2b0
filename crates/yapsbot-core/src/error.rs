//! Error type shared across all yapsbot crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum YapsError {
    #[error("Config error: {0}")]
    Config(String),

    /// Transport-level failure (connect, timeout, body decode).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Upstream answered with an unexpected status.
    #[error("API error: {0}")]
    Api(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, YapsError>;
