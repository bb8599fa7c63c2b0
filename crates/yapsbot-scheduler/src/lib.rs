//! # Yapsbot Scheduler
//!
//! Periodic score tracking: re-reads every tracked handle, fetches fresh
//! scores in rate-limited batches and notifies chats whose handles gained Yaps.
//!
//! ## Architecture
//! ```text
//! TrackingScheduler (one tokio task, Idle → Scheduled → Running → Scheduled)
//!   └── cycle
//!         ├── store.list_all()
//!         ├── batch 1: fetch ×N concurrently → compute_delta → notify + persist
//!         ├── sleep(batch_delay)
//!         └── batch 2 ...
//! ```
//!
//! Persistence lives in [`persistence::SqliteStore`].

pub mod engine;
pub mod persistence;

pub use engine::{CycleReport, SchedulerState, TrackingScheduler, TrackingSettings};
pub use persistence::SqliteStore;
