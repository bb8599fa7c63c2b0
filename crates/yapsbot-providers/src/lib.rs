//! # Yapsbot Providers
//! Score API clients implementing [`yapsbot_core::ScoreSource`].

pub mod kaito;

pub use kaito::KaitoClient;
