//! Tracking scheduler: the loop that re-checks every tracked handle and
//! notifies chats when a score goes up.
//!
//! Lifecycle is one state value behind a mutex:
//!
//! ```text
//!   Idle ──start()──▶ Scheduled ──timer──▶ Running ──cycle done──▶ Scheduled
//!    ▲                    │                   │
//!    └──────stop()────────┴───────stop()──────┘ (cycle finishes, no re-arm)
//! ```
//!
//! A cycle only starts on a transition into `Running` made under the lock,
//! so two cycles never overlap (single-flight).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use yapsbot_core::config::TrackingConfig;
use yapsbot_core::delta::{ScoreDelta, compute_delta};
use yapsbot_core::traits::{Notifier, ScoreSource, TrackedHandleStore};
use yapsbot_core::types::{ScoreSnapshot, TrackedEntry};

/// Renders the notification text for an increase.
pub type MessageFormatter =
    Arc<dyn Fn(&TrackedEntry, &ScoreSnapshot, &ScoreDelta) -> String + Send + Sync>;

/// Timing and batching knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    /// Delay between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Entries processed concurrently per batch.
    pub batch_size: usize,
    /// Pause between batches (not after the last one).
    pub batch_delay: Duration,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self::from(&TrackingConfig::default())
    }
}

impl From<&TrackingConfig> for TrackingSettings {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            interval: config.interval(),
            batch_size: config.batch_size.max(1),
            batch_delay: config.batch_delay(),
        }
    }
}

/// Externally visible scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Scheduled,
    /// `rearm` is cleared by `stop()` while a cycle is in flight.
    Running { rearm: bool },
}

struct Control {
    phase: Phase,
    /// Bumped on every start/stop; timer tasks from an older generation exit.
    generation: u64,
}

enum Begin {
    Run,
    Skip,
    Stale,
}

/// Summary of one cycle, logged and kept as `last_report`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub entries: usize,
    pub batches: usize,
    pub unchanged: usize,
    pub not_found: usize,
    pub fetch_failed: usize,
    pub notified: usize,
    pub delivery_failed: usize,
    pub persisted: usize,
    pub persist_failed: usize,
    /// Entry tasks that panicked.
    pub crashed: usize,
    /// Listing tracked handles failed; nothing was checked.
    pub list_failed: bool,
    pub duration: Duration,
}

impl CycleReport {
    fn record(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Unchanged => self.unchanged += 1,
            EntryOutcome::NotFound => self.not_found += 1,
            EntryOutcome::FetchFailed => self.fetch_failed += 1,
            EntryOutcome::Increased {
                delivered,
                persisted,
            } => {
                if delivered {
                    self.notified += 1;
                } else {
                    self.delivery_failed += 1;
                }
                if persisted {
                    self.persisted += 1;
                } else {
                    self.persist_failed += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Unchanged,
    NotFound,
    FetchFailed,
    Increased { delivered: bool, persisted: bool },
}

struct Inner {
    source: Arc<dyn ScoreSource>,
    store: Arc<dyn TrackedHandleStore>,
    notifier: Arc<dyn Notifier>,
    formatter: MessageFormatter,
    settings: TrackingSettings,
    control: Mutex<Control>,
    wake: Notify,
    /// Signalled whenever a cycle leaves `Running`.
    cycle_done: Notify,
    cycles_completed: AtomicU64,
    last_report: Mutex<Option<CycleReport>>,
}

/// Periodic score tracker. Cheap to clone; clones share one state machine.
#[derive(Clone)]
pub struct TrackingScheduler {
    inner: Arc<Inner>,
}

impl TrackingScheduler {
    pub fn new(
        source: Arc<dyn ScoreSource>,
        store: Arc<dyn TrackedHandleStore>,
        notifier: Arc<dyn Notifier>,
        formatter: MessageFormatter,
        settings: TrackingSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                store,
                notifier,
                formatter,
                settings,
                control: Mutex::new(Control {
                    phase: Phase::Idle,
                    generation: 0,
                }),
                wake: Notify::new(),
                cycle_done: Notify::new(),
                cycles_completed: AtomicU64::new(0),
                last_report: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &TrackingSettings {
        &self.inner.settings
    }

    /// Arm the timer. Returns `false` (and warns) if already active.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut control = self.inner.control();
        match control.phase {
            Phase::Scheduled | Phase::Running { rearm: true } => {
                tracing::warn!("Score tracking service is already running");
                return false;
            }
            Phase::Idle => control.phase = Phase::Scheduled,
            // Stopped mid-cycle: the in-flight cycle hands over to the new timer.
            Phase::Running { rearm: false } => control.phase = Phase::Running { rearm: true },
        }
        control.generation += 1;
        let generation = control.generation;
        drop(control);

        tokio::spawn(run_loop(Arc::clone(&self.inner), generation));
        tracing::info!(
            "⏰ Score tracking service started (interval: {} minutes, batch: {}, delay: {}ms)",
            self.inner.settings.interval.as_secs() / 60,
            self.inner.settings.batch_size,
            self.inner.settings.batch_delay.as_millis()
        );
        true
    }

    /// Disarm the timer. A running cycle finishes but does not re-arm.
    pub fn stop(&self) {
        let mut control = self.inner.control();
        if control.phase == Phase::Idle {
            return;
        }
        control.generation += 1;
        control.phase = match control.phase {
            Phase::Running { .. } => Phase::Running { rearm: false },
            _ => Phase::Idle,
        };
        drop(control);

        self.inner.wake.notify_waiters();
        tracing::info!("🛑 Score tracking service stopped");
    }

    pub fn state(&self) -> SchedulerState {
        match self.inner.control().phase {
            Phase::Idle => SchedulerState::Idle,
            Phase::Scheduled => SchedulerState::Scheduled,
            Phase::Running { .. } => SchedulerState::Running,
        }
    }

    /// Run one cycle right now through the single-flight guard.
    /// Returns `None` if a cycle is already running.
    pub async fn run_now(&self) -> Option<CycleReport> {
        match self.inner.begin_cycle(None) {
            Begin::Run => execute_cycle(&self.inner).await,
            Begin::Skip | Begin::Stale => {
                tracing::warn!("Previous check still in progress, skipping manual run");
                None
            }
        }
    }

    pub fn cycles_completed(&self) -> u64 {
        self.inner.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.inner
            .last_report
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        // Nothing panics while holding this lock; recover the value if it ever does.
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.control().generation == generation
    }

    /// Try to enter `Running`. `generation` is set for timer firings.
    fn begin_cycle(&self, generation: Option<u64>) -> Begin {
        let mut control = self.control();
        if generation.is_some_and(|g| g != control.generation) {
            return Begin::Stale;
        }
        match (control.phase, generation) {
            (Phase::Running { .. }, _) => Begin::Skip,
            (Phase::Scheduled, _) => {
                control.phase = Phase::Running { rearm: true };
                Begin::Run
            }
            (Phase::Idle, None) => {
                control.phase = Phase::Running { rearm: false };
                Begin::Run
            }
            (Phase::Idle, Some(_)) => Begin::Stale,
        }
    }

    fn is_running(&self) -> bool {
        matches!(self.control().phase, Phase::Running { .. })
    }

    fn finish_cycle(&self) {
        let mut control = self.control();
        control.phase = match control.phase {
            Phase::Running { rearm: true } => Phase::Scheduled,
            Phase::Running { rearm: false } => Phase::Idle,
            other => other,
        };
        drop(control);
        self.cycle_done.notify_waiters();
    }

    fn store_report(&self, report: &CycleReport) {
        if let Ok(mut last) = self.last_report.lock() {
            *last = Some(report.clone());
        }
    }
}

/// Timer task for one generation: sleep, fire, repeat until stale.
async fn run_loop(inner: Arc<Inner>, generation: u64) {
    loop {
        let woken = inner.wake.notified();
        let done = inner.cycle_done.notified();
        tokio::pin!(woken, done);
        woken.as_mut().enable();
        done.as_mut().enable();

        if !inner.is_current(generation) {
            tracing::debug!("Tracking timer generation {generation} retired");
            return;
        }

        // Handed over mid-cycle: the interval starts once that cycle ends.
        if inner.is_running() {
            tokio::select! {
                _ = &mut done => {}
                _ = &mut woken => {}
            }
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(inner.settings.interval) => {}
            _ = &mut woken => continue,
        }

        match inner.begin_cycle(Some(generation)) {
            Begin::Run => {
                execute_cycle(&inner).await;
            }
            Begin::Skip => {
                tracing::warn!("Previous check still in progress, skipping this cycle");
            }
            Begin::Stale => return,
        }
    }
}

/// Run a cycle and leave `Running`, all on a detached task: dropping the
/// caller's future does not skip the bookkeeping. The cycle itself runs on a
/// nested task so a panic cannot take the timer down.
async fn execute_cycle(inner: &Arc<Inner>) -> Option<CycleReport> {
    let inner = Arc::clone(inner);
    let supervisor = tokio::spawn(async move {
        let task_inner = Arc::clone(&inner);
        let result = tokio::spawn(async move { run_cycle(&task_inner).await }).await;
        inner.finish_cycle();
        inner.cycles_completed.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(report) => {
                inner.store_report(&report);
                Some(report)
            }
            Err(e) => {
                tracing::error!("💥 Error in tracking scores: {e}");
                None
            }
        }
    });

    match supervisor.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("💥 Tracking cycle supervisor failed: {e}");
            None
        }
    }
}

/// One full pass over every tracked entry.
async fn run_cycle(inner: &Arc<Inner>) -> CycleReport {
    let started = Instant::now();
    let mut report = CycleReport::default();

    let entries = match inner.store.list_all().await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("❌ Error in score tracking service: failed to list tracked users: {e}");
            report.list_failed = true;
            report.duration = started.elapsed();
            return report;
        }
    };
    report.entries = entries.len();
    tracing::info!("🔍 Checking scores for {} tracked Twitter users", entries.len());

    let batch_size = inner.settings.batch_size.max(1);
    let total_batches = entries.len().div_ceil(batch_size);

    for (index, batch) in entries.chunks(batch_size).enumerate() {
        let mut set = JoinSet::new();
        for entry in batch {
            let inner = Arc::clone(inner);
            let entry = entry.clone();
            set.spawn(async move { process_entry(&inner, entry).await });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::error!("💥 Error processing tracked user: {e}");
                    report.crashed += 1;
                }
            }
        }
        report.batches += 1;

        if index + 1 < total_batches {
            tokio::time::sleep(inner.settings.batch_delay).await;
        }
    }

    report.duration = started.elapsed();
    tracing::info!(
        "✅ Completed checking scores for {} users in {:.2} seconds ({} notified, {} skipped, {} failed)",
        report.entries,
        report.duration.as_secs_f64(),
        report.notified,
        report.not_found + report.fetch_failed,
        report.delivery_failed + report.persist_failed + report.crashed
    );
    report
}

/// Fetch, compare, and on increase notify + persist. Never returns an error:
/// every failure is logged and folded into the outcome.
async fn process_entry(inner: &Inner, entry: TrackedEntry) -> EntryOutcome {
    let current = match inner.source.fetch(&entry.handle).await {
        Ok(Some(current)) => current,
        Ok(None) => {
            tracing::warn!("Could not fetch data for user {}", entry.handle);
            return EntryOutcome::NotFound;
        }
        Err(e) => {
            tracing::warn!("⚠️ Error fetching score for {}: {e}", entry.handle);
            return EntryOutcome::FetchFailed;
        }
    };

    let Some(delta) = compute_delta(&entry.snapshot, &current) else {
        tracing::debug!("No change in score for {}", entry.handle);
        return EntryOutcome::Unchanged;
    };

    let message = (inner.formatter)(&entry, &current, &delta);

    // Delivery and persistence are independent; the next cycle re-derives
    // state from whatever was persisted.
    let delivered = match inner.notifier.send(entry.chat_id, &message).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(
                "❌ Failed to notify chat {} about {}: {e}",
                entry.chat_id,
                entry.handle
            );
            false
        }
    };

    let persisted = match inner
        .store
        .update_snapshot(entry.chat_id, &entry.handle, &current)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(
                "❌ Failed to store new score for {} (chat {}): {e}",
                entry.handle,
                entry.chat_id
            );
            false
        }
    };

    tracing::info!(
        "📈 Updated score for {}: {:.2} -> {:.2}",
        entry.handle,
        entry.snapshot.total(),
        current.total()
    );

    EntryOutcome::Increased {
        delivered,
        persisted,
    }
}

/// Plain-text formatter for dry runs and tests.
pub fn plain_message(entry: &TrackedEntry, current: &ScoreSnapshot, delta: &ScoreDelta) -> String {
    let mut msg = format!(
        "@{} gained {:.2} Yaps (now {:.2})",
        entry.handle,
        delta.total_increase,
        current.total()
    );
    if let Some(pct) = delta.percent_increase {
        msg.push_str(&format!(", up {pct:.2}%"));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use yapsbot_core::error::{Result, YapsError};
    use yapsbot_core::types::ScoreWindow;

    #[derive(Clone)]
    enum Reply {
        Found(ScoreSnapshot),
        NotFound,
        Fail,
        Crash,
    }

    /// Score source with scripted replies, a fixed latency and concurrency stats.
    #[derive(Default)]
    struct FakeSource {
        replies: Mutex<HashMap<String, Reply>>,
        latency: Duration,
        calls: Mutex<Vec<(String, Instant)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeSource {
        fn with_latency(latency: Duration) -> Self {
            Self {
                latency,
                ..Default::default()
            }
        }

        fn set(&self, handle: &str, reply: Reply) {
            self.replies.lock().unwrap().insert(handle.to_string(), reply);
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }
    }

    #[async_trait]
    impl ScoreSource for FakeSource {
        async fn fetch(&self, handle: &str) -> Result<Option<ScoreSnapshot>> {
            self.calls
                .lock()
                .unwrap()
                .push((handle.to_string(), Instant::now()));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let reply = self.replies.lock().unwrap().get(handle).cloned();
            match reply {
                Some(Reply::Found(s)) => Ok(Some(s)),
                Some(Reply::NotFound) | None => Ok(None),
                Some(Reply::Fail) => Err(YapsError::Http("connection reset".into())),
                Some(Reply::Crash) => panic!("source blew up for {handle}"),
            }
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        entries: Mutex<Vec<TrackedEntry>>,
        updates: AtomicUsize,
        fail_list: bool,
        fail_update: bool,
    }

    impl MemoryStore {
        fn seeded(entries: Vec<TrackedEntry>) -> Self {
            Self {
                entries: Mutex::new(entries),
                ..Default::default()
            }
        }

        fn snapshot_of(&self, chat_id: i64, handle: &str) -> Option<ScoreSnapshot> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.chat_id == chat_id && e.handle == handle)
                .map(|e| e.snapshot.clone())
        }
    }

    #[async_trait]
    impl TrackedHandleStore for MemoryStore {
        async fn list_all(&self) -> Result<Vec<TrackedEntry>> {
            if self.fail_list {
                return Err(YapsError::Database("disk I/O error".into()));
            }
            Ok(self.entries.lock().unwrap().clone())
        }

        async fn list_for_chat(&self, chat_id: i64) -> Result<Vec<TrackedEntry>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.chat_id == chat_id)
                .cloned()
                .collect())
        }

        async fn track(&self, chat_id: i64, handle: &str, snapshot: &ScoreSnapshot) -> Result<()> {
            let mut entries = self.entries.lock().unwrap();
            entries.retain(|e| !(e.chat_id == chat_id && e.handle == handle));
            entries.push(entry(chat_id, handle, snapshot.clone()));
            Ok(())
        }

        async fn untrack(&self, chat_id: i64, handle: &str) -> Result<bool> {
            let mut entries = self.entries.lock().unwrap();
            let before = entries.len();
            entries.retain(|e| !(e.chat_id == chat_id && e.handle == handle));
            Ok(entries.len() < before)
        }

        async fn update_snapshot(
            &self,
            chat_id: i64,
            handle: &str,
            snapshot: &ScoreSnapshot,
        ) -> Result<()> {
            if self.fail_update {
                return Err(YapsError::Database("database is locked".into()));
            }
            self.updates.fetch_add(1, Ordering::SeqCst);
            let mut entries = self.entries.lock().unwrap();
            if let Some(e) = entries
                .iter_mut()
                .find(|e| e.chat_id == chat_id && e.handle == handle)
            {
                e.snapshot = snapshot.clone();
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(i64, String)>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<(i64, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
            if self.fail {
                return Err(YapsError::Channel("Forbidden: bot was blocked by the user".into()));
            }
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    fn entry(chat_id: i64, handle: &str, snapshot: ScoreSnapshot) -> TrackedEntry {
        TrackedEntry {
            chat_id,
            handle: handle.to_string(),
            snapshot,
        }
    }

    fn snap(total: f64) -> ScoreSnapshot {
        ScoreSnapshot::with_total("h", total)
    }

    fn settings(batch_size: usize) -> TrackingSettings {
        TrackingSettings {
            interval: Duration::from_secs(60),
            batch_size,
            batch_delay: Duration::from_millis(2000),
        }
    }

    fn scheduler(
        source: &Arc<FakeSource>,
        store: &Arc<MemoryStore>,
        notifier: &Arc<RecordingNotifier>,
        settings: TrackingSettings,
    ) -> TrackingScheduler {
        TrackingScheduler::new(
            source.clone(),
            store.clone(),
            notifier.clone(),
            Arc::new(plain_message),
            settings,
        )
    }

    #[test]
    fn test_settings_from_config() {
        let s = TrackingSettings::default();
        assert_eq!(s.interval, Duration::from_secs(3600));
        assert_eq!(s.batch_size, 5);
        assert_eq!(s.batch_delay, Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_of_five_with_two_delays() {
        let source = Arc::new(FakeSource::with_latency(Duration::from_millis(100)));
        let entries: Vec<_> = (0..12).map(|i| entry(1, &format!("user{i}"), snap(1.0))).collect();
        for e in &entries {
            source.set(&e.handle, Reply::Found(snap(1.0)));
        }
        let store = Arc::new(MemoryStore::seeded(entries));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        let start = Instant::now();
        let report = sched.run_now().await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(report.entries, 12);
        assert_eq!(report.batches, 3);
        assert_eq!(report.unchanged, 12);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 5);

        // Three fetch rounds of 100ms plus exactly two inter-batch delays.
        assert!(elapsed >= Duration::from_millis(3 * 100 + 2 * 2000));
        assert!(elapsed < Duration::from_millis(3 * 100 + 3 * 2000));

        // Group fetch start times into batches: 5, 5, 2.
        let times = source.call_times();
        let mut sizes: Vec<usize> = Vec::new();
        let mut last: Option<Instant> = None;
        for t in times {
            if last == Some(t) {
                if let Some(n) = sizes.last_mut() {
                    *n += 1;
                }
            } else {
                sizes.push(1);
                last = Some(t);
            }
        }
        assert_eq!(sizes, vec![5, 5, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_batch_has_no_delay() {
        let source = Arc::new(FakeSource::default());
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "a", snap(1.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        let start = Instant::now();
        let report = sched.run_now().await.unwrap();
        assert_eq!(report.batches, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_increase_notifies_and_persists() {
        let source = Arc::new(FakeSource::default());
        let prev = snap(100.0).with_window(ScoreWindow::L7d, 20.0);
        let cur = snap(115.0).with_window(ScoreWindow::L7d, 25.0);
        source.set("kaito", Reply::Found(cur.clone()));
        let store = Arc::new(MemoryStore::seeded(vec![entry(9, "kaito", prev)]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        let report = sched.run_now().await.unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(report.persisted, 1);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 9);
        assert_eq!(sent[0].1, "@kaito gained 15.00 Yaps (now 115.00), up 15.00%");
        assert_eq!(store.snapshot_of(9, "kaito"), Some(cur));
    }

    #[tokio::test]
    async fn test_zero_baseline_notifies_without_percent() {
        let source = Arc::new(FakeSource::default());
        source.set("fresh", Reply::Found(snap(10.0)));
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "fresh", snap(0.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        sched.run_now().await.unwrap();
        assert_eq!(notifier.sent()[0].1, "@fresh gained 10.00 Yaps (now 10.00)");
    }

    #[tokio::test]
    async fn test_no_change_sends_and_writes_nothing() {
        let source = Arc::new(FakeSource::default());
        source.set("flat", Reply::Found(snap(50.0)));
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "flat", snap(50.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        let report = sched.run_now().await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert!(notifier.sent().is_empty());
        assert_eq!(store.updates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_entries_do_not_block_the_batch() {
        let source = Arc::new(FakeSource::default());
        source.set("ok1", Reply::Found(snap(2.0)));
        source.set("broken", Reply::Fail);
        source.set("boom", Reply::Crash);
        source.set("ghost", Reply::NotFound);
        source.set("ok2", Reply::Found(snap(3.0)));
        let store = Arc::new(MemoryStore::seeded(vec![
            entry(1, "ok1", snap(1.0)),
            entry(1, "broken", snap(1.0)),
            entry(1, "boom", snap(1.0)),
            entry(1, "ghost", snap(1.0)),
            entry(2, "ok2", snap(1.0)),
        ]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        let report = sched.run_now().await.unwrap();
        assert_eq!(report.batches, 1);
        assert_eq!(report.notified, 2);
        assert_eq!(report.fetch_failed, 1);
        assert_eq!(report.not_found, 1);
        assert_eq!(report.crashed, 1);
        assert_eq!(notifier.sent().len(), 2);
        assert_eq!(sched.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_delivery_failure_still_persists() {
        let source = Arc::new(FakeSource::default());
        source.set("kaito", Reply::Found(snap(2.0)));
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "kaito", snap(1.0))]));
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let sched = scheduler(&source, &store, &notifier, settings(5));

        let report = sched.run_now().await.unwrap();
        assert_eq!(report.delivery_failed, 1);
        assert_eq!(report.persisted, 1);
        assert_eq!(store.snapshot_of(1, "kaito"), Some(snap(2.0)));
    }

    #[tokio::test]
    async fn test_persist_failure_still_notifies() {
        let source = Arc::new(FakeSource::default());
        source.set("kaito", Reply::Found(snap(2.0)));
        let store = Arc::new(MemoryStore {
            entries: Mutex::new(vec![entry(1, "kaito", snap(1.0))]),
            fail_update: true,
            ..Default::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        let report = sched.run_now().await.unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(report.persist_failed, 1);
        // Baseline untouched; the next cycle compares against it again.
        assert_eq!(store.snapshot_of(1, "kaito"), Some(snap(1.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_triggers_are_single_flight() {
        let source = Arc::new(FakeSource::with_latency(Duration::from_secs(5)));
        source.set("a", Reply::Found(snap(1.0)));
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "a", snap(1.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        let (first, second) = tokio::join!(sched.run_now(), sched.run_now());
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(sched.cycles_completed(), 1);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_skips_while_manual_cycle_runs() {
        // Cycle takes 150s, timer fires every 60s.
        let source = Arc::new(FakeSource::with_latency(Duration::from_secs(150)));
        source.set("a", Reply::Found(snap(1.0)));
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "a", snap(1.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        assert!(sched.start());
        let manual = sched.run_now().await;
        assert!(manual.is_some());
        assert_eq!(sched.state(), SchedulerState::Scheduled);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(sched.cycles_completed() >= 2);
        sched.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_transitions() {
        let source = Arc::new(FakeSource::default());
        let store = Arc::new(MemoryStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        assert_eq!(sched.state(), SchedulerState::Idle);
        assert!(sched.start());
        assert_eq!(sched.state(), SchedulerState::Scheduled);
        assert!(!sched.start());

        sched.stop();
        assert_eq!(sched.state(), SchedulerState::Idle);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(sched.cycles_completed(), 0);

        assert!(sched.start());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(sched.cycles_completed(), 1);
        assert_eq!(sched.state(), SchedulerState::Scheduled);
        sched.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_fires_every_interval() {
        let source = Arc::new(FakeSource::default());
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "a", snap(1.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        sched.start();
        tokio::time::sleep(Duration::from_secs(60 * 3 + 30)).await;
        assert_eq!(sched.cycles_completed(), 3);
        sched.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_failure_still_reschedules() {
        let source = Arc::new(FakeSource::default());
        let store = Arc::new(MemoryStore {
            fail_list: true,
            ..Default::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        sched.start();
        tokio::time::sleep(Duration::from_secs(130)).await;
        assert_eq!(sched.cycles_completed(), 2);
        assert_eq!(sched.state(), SchedulerState::Scheduled);
        assert!(sched.last_report().unwrap().list_failed);
        sched.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashing_entry_does_not_stop_the_loop() {
        let source = Arc::new(FakeSource::default());
        source.set("boom", Reply::Crash);
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "boom", snap(1.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        sched.start();
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(sched.cycles_completed(), 2);
        assert_eq!(sched.last_report().unwrap().crashed, 1);
        sched.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_cycle_lets_it_finish_without_rearm() {
        let source = Arc::new(FakeSource::with_latency(Duration::from_secs(30)));
        source.set("a", Reply::Found(snap(2.0)));
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "a", snap(1.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        sched.start();
        // Timer fires at 60s; cycle runs until 90s.
        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(sched.state(), SchedulerState::Running);

        sched.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sched.state(), SchedulerState::Idle);
        assert_eq!(sched.cycles_completed(), 1);
        assert_eq!(notifier.sent().len(), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(sched.cycles_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_while_stopping_cycle_runs() {
        let source = Arc::new(FakeSource::with_latency(Duration::from_secs(30)));
        source.set("a", Reply::Found(snap(1.0)));
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "a", snap(1.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        sched.start();
        tokio::time::sleep(Duration::from_secs(70)).await;
        sched.stop();
        assert!(sched.start());

        // In-flight cycle finishes at 90s and hands over to the new timer.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(sched.state(), SchedulerState::Scheduled);
        assert_eq!(sched.cycles_completed(), 1);

        // The interval counts from 90s, so nothing fires before 150s.
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(source.call_times().len(), 1);

        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(source.call_times().len(), 2);
        assert_eq!(sched.cycles_completed(), 2);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        sched.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_manual_run_still_finishes_cycle() {
        let source = Arc::new(FakeSource::with_latency(Duration::from_secs(30)));
        source.set("a", Reply::Found(snap(2.0)));
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "a", snap(1.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        assert!(sched.start());
        let cancelled = tokio::time::timeout(Duration::from_secs(5), sched.run_now()).await;
        assert!(cancelled.is_err());
        assert_eq!(sched.state(), SchedulerState::Running);

        // The detached cycle completes at 30s and re-arms the timer.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sched.state(), SchedulerState::Scheduled);
        assert_eq!(sched.cycles_completed(), 1);
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(store.snapshot_of(1, "a").unwrap().total(), 2.0);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(sched.cycles_completed() >= 5);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        sched.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_manual_run_from_idle_returns_to_idle() {
        let source = Arc::new(FakeSource::with_latency(Duration::from_secs(30)));
        let store = Arc::new(MemoryStore::seeded(vec![entry(1, "a", snap(1.0))]));
        let notifier = Arc::new(RecordingNotifier::default());
        let sched = scheduler(&source, &store, &notifier, settings(5));

        let cancelled = tokio::time::timeout(Duration::from_secs(1), sched.run_now()).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(sched.state(), SchedulerState::Idle);
        assert_eq!(sched.cycles_completed(), 1);
        assert!(sched.run_now().await.is_some());
    }
}
