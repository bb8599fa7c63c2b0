//! Collaborator traits: the seams between the tracking core and the
//! outside world (score API, persistence, chat delivery).

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ScoreSnapshot, TrackedEntry};

/// Source of current scores for a handle.
#[async_trait]
pub trait ScoreSource: Send + Sync {
    /// Fetch the current snapshot.
    ///
    /// `Ok(None)` means the handle is unknown upstream. `Err` is a transient
    /// failure (network, 5xx); callers treat both as "skip this handle".
    async fn fetch(&self, handle: &str) -> Result<Option<ScoreSnapshot>>;
}

/// Durable mapping of `(chat_id, handle)` to the last seen snapshot.
///
/// Implementations own their synchronization; callers never coordinate.
#[async_trait]
pub trait TrackedHandleStore: Send + Sync {
    async fn list_all(&self) -> Result<Vec<TrackedEntry>>;

    async fn list_for_chat(&self, chat_id: i64) -> Result<Vec<TrackedEntry>>;

    /// Insert or replace the subscription with `snapshot` as baseline.
    async fn track(&self, chat_id: i64, handle: &str, snapshot: &ScoreSnapshot) -> Result<()>;

    /// Remove a subscription. Returns whether one existed.
    async fn untrack(&self, chat_id: i64, handle: &str) -> Result<bool>;

    /// Replace the stored snapshot of an existing subscription.
    async fn update_snapshot(
        &self,
        chat_id: i64,
        handle: &str,
        snapshot: &ScoreSnapshot,
    ) -> Result<()>;
}

/// Best-effort delivery of a text message to a chat.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()>;
}
