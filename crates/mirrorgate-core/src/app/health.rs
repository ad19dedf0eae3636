//! HealthMonitor - stall detection and the warn→cancel policy.
//!
//! # Flow (one sweep)
//! 1. Snapshot the registry and drop state of tasks that left it
//! 2. Probe every running download (no guard held)
//! 3. Push the speed sample and ask the decider for a verdict
//! 4. Re-check the task is still registered, then warn or cancel
//!
//! The decider is pure: it sees the observation and the existing warning
//! and returns a `Verdict`. Side effects happen in `HealthMonitor::apply`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::HealthSettings;
use crate::domain::{HealthReason, TaskId, TaskKind, Verdict, format_duration};
use crate::ports::{CancelAck, Clock, Notifier, TransferTask, notify_expiring};
use crate::queue::{Placement, RollingWindow, TaskRegistry, TaskSnapshot};

/// Warning issued to one task. Created at most once while it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Warning {
    pub warned_at: DateTime<Utc>,
    pub reason: HealthReason,
}

/// What one sweep saw for one task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Window full and every sample at or below the slow threshold.
    pub is_slow: bool,
    pub elapsed: Duration,
    /// `None` is infinite.
    pub eta: Option<Duration>,
    /// Speed reported by this sweep in bytes per second.
    pub speed: Option<u64>,
    /// Bytes left; `None` while the size is unknown.
    pub remaining: Option<u64>,
}

impl Observation {
    /// Remaining bytes at the current speed. `None` when the size or speed is
    /// unknown, `Some(Duration::MAX)` when nothing is moving.
    pub fn completion(&self) -> Option<Duration> {
        let remaining = self.remaining?;
        match self.speed? {
            0 => Some(Duration::MAX),
            speed => Some(Duration::from_secs(remaining.div_ceil(speed))),
        }
    }
}

/// Pure verdict function (observation + warning + now → verdict).
pub trait HealthDecider: Send + Sync {
    fn decide(&self, obs: &Observation, warning: Option<&Warning>, now: DateTime<Utc>) -> Verdict;
}

/// Decision table evaluated top to bottom, first match wins.
#[derive(Debug, Clone)]
pub struct DefaultHealthDecider {
    settings: HealthSettings,
}

impl DefaultHealthDecider {
    pub fn new(settings: HealthSettings) -> Self {
        Self { settings }
    }

    fn eta_is_long(&self, eta: Option<Duration>) -> bool {
        match (eta, self.settings.long_eta()) {
            (None, _) => true,
            (Some(eta), Some(limit)) => eta > limit,
            (Some(_), None) => false,
        }
    }

    fn is_aged(&self, elapsed: Duration) -> bool {
        self.settings.elapsed().is_some_and(|limit| elapsed > limit)
    }

    fn completion_too_far(&self, obs: &Observation) -> bool {
        match (obs.completion(), self.settings.completion()) {
            (Some(completion), Some(limit)) => completion > limit,
            _ => false,
        }
    }
}

impl HealthDecider for DefaultHealthDecider {
    fn decide(&self, obs: &Observation, warning: Option<&Warning>, now: DateTime<Utc>) -> Verdict {
        let long_eta = self.eta_is_long(obs.eta);
        let aged = self.is_aged(obs.elapsed);

        if long_eta && aged {
            return match warning {
                None => Verdict::Warn(HealthReason::NoProgress),
                Some(warning) => {
                    let waited = (now - warning.warned_at).to_std().unwrap_or(Duration::ZERO);
                    if waited >= self.settings.warn_wait() {
                        Verdict::Cancel(warning.reason)
                    } else {
                        Verdict::Wait
                    }
                }
            };
        }

        if obs.is_slow && long_eta && aged {
            return Verdict::Cancel(HealthReason::SlowLongEta);
        }

        if obs.is_slow && self.completion_too_far(obs) {
            return Verdict::Cancel(HealthReason::SlowCompletion);
        }

        Verdict::Healthy
    }
}

/// Counters returned by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub checked: usize,
    pub warned: usize,
    pub cancelled: usize,
}

#[derive(Default)]
struct MonitorState {
    windows: HashMap<TaskId, RollingWindow<u64>>,
    warnings: HashMap<TaskId, Warning>,
}

pub struct HealthMonitor {
    settings: HealthSettings,
    decider: Arc<dyn HealthDecider>,
    registry: Arc<TaskRegistry>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    notice_ttl: Duration,
    state: Mutex<MonitorState>,
}

impl HealthMonitor {
    pub fn new(
        settings: HealthSettings,
        decider: Arc<dyn HealthDecider>,
        registry: Arc<TaskRegistry>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        notice_ttl: Duration,
    ) -> Self {
        Self {
            settings,
            decider,
            registry,
            notifier,
            clock,
            notice_ttl,
            state: Mutex::new(MonitorState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn warned_count(&self) -> usize {
        self.lock().warnings.len()
    }

    pub fn warning(&self, id: TaskId) -> Option<Warning> {
        self.lock().warnings.get(&id).copied()
    }

    pub async fn sweep(&self) -> HealthReport {
        let snapshot = self.registry.snapshot().await;
        self.prune(&snapshot);

        let mut report = HealthReport::default();
        for entry in snapshot {
            if entry.placement != Placement::Running(TaskKind::Download) || entry.cancel_requested
            {
                continue;
            }
            report.checked += 1;
            let now = self.clock.now();
            let (obs, warning) = self.observe(entry.task.as_ref(), now).await;
            let verdict = self.decider.decide(&obs, warning.as_ref(), now);
            match self.apply(&entry, verdict, now).await {
                Some(Verdict::Warn(_)) => report.warned += 1,
                Some(Verdict::Cancel(_)) => report.cancelled += 1,
                _ => {}
            }
        }

        debug!(
            checked = report.checked,
            warned = report.warned,
            cancelled = report.cancelled,
            "health sweep finished"
        );
        report
    }

    fn prune(&self, snapshot: &[TaskSnapshot]) {
        let live: HashSet<TaskId> = snapshot.iter().map(|e| e.id).collect();
        let mut state = self.lock();
        state.windows.retain(|id, _| live.contains(id));
        state.warnings.retain(|id, _| live.contains(id));
    }

    async fn observe(
        &self,
        task: &dyn TransferTask,
        now: DateTime<Utc>,
    ) -> (Observation, Option<Warning>) {
        let speed = task.speed().await;
        let eta = task.eta().await;
        let size = task.size().await.filter(|size| *size > 0);
        let processed = task.processed_bytes().await.unwrap_or(0);
        let elapsed = (now - task.started_at()).to_std().unwrap_or(Duration::ZERO);

        let id = task.id();
        let slow_speed = self.settings.slow_speed();
        let window_len = self.settings.window;
        let mut state = self.lock();
        let window = state
            .windows
            .entry(id)
            .or_insert_with(|| RollingWindow::new(window_len));
        if let Some(speed) = speed {
            window.push(speed);
        }
        let obs = Observation {
            is_slow: window.full_and_all(|s| s <= slow_speed),
            elapsed,
            eta,
            speed,
            remaining: size.map(|size| size.saturating_sub(processed)),
        };
        (obs, state.warnings.get(&id).copied())
    }

    /// Carry out `verdict`. Returns it when something was done.
    async fn apply(
        &self,
        entry: &TaskSnapshot,
        verdict: Verdict,
        now: DateTime<Utc>,
    ) -> Option<Verdict> {
        let (Verdict::Warn(_) | Verdict::Cancel(_)) = verdict else {
            return None;
        };
        if !self.registry.contains(entry.id).await {
            debug!(task = %entry.id, "task left the registry mid-sweep");
            return None;
        }
        let task = entry.task.as_ref();
        let owner = task.owner();

        match verdict {
            Verdict::Warn(reason) => {
                self.lock()
                    .warnings
                    .insert(entry.id, Warning { warned_at: now, reason });
                info!(task = %entry.id, %reason, "task warned");
                let text = format!(
                    "{}: {reason}. It will be cancelled in {} if it does not recover.",
                    task.name(),
                    format_duration(self.settings.warn_wait()),
                );
                notify_expiring(self.notifier.as_ref(), owner, &text, self.notice_ttl).await;
            }
            Verdict::Cancel(reason) => {
                info!(task = %entry.id, %reason, "cancelling unhealthy task");
                let text = format!("{} was cancelled: {reason}.", task.name());
                notify_expiring(self.notifier.as_ref(), owner, &text, self.notice_ttl).await;
                // Flagged first so neither sweep touches it while the engine winds down.
                self.registry.request_cancel(entry.id).await;
                if task.cancel().await == CancelAck::Unsupported {
                    debug!(task = %entry.id, "no cancel capability, engine must poll the flag");
                }
                let mut state = self.lock();
                state.warnings.remove(&entry.id);
                state.windows.remove(&entry.id);
            }
            Verdict::Healthy | Verdict::Wait => {}
        }
        Some(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSettings;
    use crate::domain::{GIB, KIB};
    use crate::ports::ManualClock;
    use crate::test_support::{FakeTask, RecordingNotifier, clock_at_noon};
    use chrono::Duration as ChronoDuration;
    use rstest::rstest;

    struct Fixture {
        monitor: HealthMonitor,
        registry: Arc<TaskRegistry>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let settings = HealthSettings::default();
        let registry = Arc::new(TaskRegistry::new(QueueSettings::default()));
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(clock_at_noon());
        let monitor = HealthMonitor::new(
            settings.clone(),
            Arc::new(DefaultHealthDecider::new(settings)),
            Arc::clone(&registry),
            notifier.clone(),
            clock.clone(),
            Duration::from_secs(60),
        );
        Fixture {
            monitor,
            registry,
            notifier,
            clock,
        }
    }

    /// Started two hours ago, crawling at 10 KiB/s with no ETA.
    fn stalled_task(f: &Fixture) -> Arc<FakeTask> {
        let task = FakeTask::download(1);
        task.set_started_at(f.clock.now() - ChronoDuration::hours(2));
        task.set_speed(Some(10 * KIB));
        task.set_eta(None);
        task
    }

    fn obs(is_slow: bool, elapsed_secs: u64, eta_secs: Option<u64>) -> Observation {
        Observation {
            is_slow,
            elapsed: Duration::from_secs(elapsed_secs),
            eta: eta_secs.map(Duration::from_secs),
            speed: Some(10 * KIB),
            remaining: None,
        }
    }

    #[rstest]
    #[case::young_task(obs(true, 60, None), Verdict::Healthy)]
    #[case::infinite_eta(obs(false, 7200, None), Verdict::Warn(HealthReason::NoProgress))]
    #[case::long_eta(obs(false, 7200, Some(90_000)), Verdict::Warn(HealthReason::NoProgress))]
    #[case::short_eta(obs(true, 7200, Some(600)), Verdict::Healthy)]
    fn decision_table(#[case] observation: Observation, #[case] expected: Verdict) {
        let decider = DefaultHealthDecider::new(HealthSettings::default());
        let now = clock_at_noon().now();
        assert_eq!(decider.decide(&observation, None, now), expected);
    }

    /// Young, slow, 10 GiB left at 10 KiB/s.
    fn far_from_done() -> Observation {
        Observation {
            remaining: Some(10 * GIB),
            ..obs(true, 60, Some(600))
        }
    }

    fn with(edit: impl FnOnce(&mut HealthSettings)) -> HealthSettings {
        let mut settings = HealthSettings::default();
        edit(&mut settings);
        settings
    }

    #[rstest]
    #[case::completion_default(HealthSettings::default(), far_from_done(), Verdict::Cancel(HealthReason::SlowCompletion))]
    #[case::completion_off(with(|s| s.completion_secs = 0), far_from_done(), Verdict::Healthy)]
    #[case::long_eta_off_finite(with(|s| s.long_eta_secs = 0), obs(true, 7200, Some(90_000)), Verdict::Healthy)]
    #[case::long_eta_off_infinite(with(|s| s.long_eta_secs = 0), obs(true, 7200, None), Verdict::Warn(HealthReason::NoProgress))]
    #[case::elapsed_off(with(|s| s.elapsed_secs = 0), obs(true, 7200, None), Verdict::Healthy)]
    fn zero_threshold_disables_its_rule(
        #[case] settings: HealthSettings,
        #[case] observation: Observation,
        #[case] expected: Verdict,
    ) {
        let decider = DefaultHealthDecider::new(settings);
        let now = clock_at_noon().now();
        assert_eq!(decider.decide(&observation, None, now), expected);
    }

    #[test]
    fn warned_task_waits_out_the_grace_period() {
        let decider = DefaultHealthDecider::new(HealthSettings::default());
        let now = clock_at_noon().now();
        let warning = Warning {
            warned_at: now - ChronoDuration::minutes(5),
            reason: HealthReason::NoProgress,
        };
        let stalled = obs(true, 7200, None);

        assert_eq!(decider.decide(&stalled, Some(&warning), now), Verdict::Wait);
        assert_eq!(
            decider.decide(&stalled, Some(&warning), now + ChronoDuration::minutes(5)),
            Verdict::Cancel(HealthReason::NoProgress)
        );
    }

    #[test]
    fn stopped_transfer_has_unbounded_completion() {
        let mut o = obs(true, 60, Some(600));
        o.remaining = Some(GIB);
        o.speed = Some(0);
        assert_eq!(o.completion(), Some(Duration::MAX));

        o.speed = None;
        assert_eq!(o.completion(), None);

        o.speed = Some(0);
        o.remaining = None;
        assert_eq!(o.completion(), None);
    }

    #[tokio::test]
    async fn missing_speed_reading_is_not_filled_from_earlier_sweeps() {
        let f = fixture();
        let task = FakeTask::download(1);
        task.set_started_at(f.clock.now());
        task.set_eta(Some(Duration::from_secs(600)));
        task.set_size(Some(10 * GIB));
        task.set_speed(Some(5 * 1024 * KIB));
        f.registry.register(task.clone()).await.unwrap();
        f.monitor.sweep().await;

        task.set_speed(None);
        let (observation, _) = f.monitor.observe(task.as_ref(), f.clock.now()).await;

        assert_eq!(observation.speed, None);
        assert_eq!(observation.completion(), None);
        assert!(!observation.is_slow);
    }

    #[tokio::test]
    async fn stalled_task_is_warned_then_cancelled() {
        let f = fixture();
        let task = stalled_task(&f);
        f.registry.register(task.clone()).await.unwrap();

        let first = f.monitor.sweep().await;
        assert_eq!(first.warned, 1);
        assert_eq!(f.notifier.count(), 1);
        assert!(f.notifier.texts()[0].contains("no progress"));
        assert!(f.monitor.warning(task.id()).is_some());

        f.clock.advance(ChronoDuration::minutes(5));
        let second = f.monitor.sweep().await;
        assert_eq!(second, HealthReport { checked: 1, ..Default::default() });
        assert_eq!(f.notifier.count(), 1);

        f.clock.advance(ChronoDuration::minutes(6));
        let third = f.monitor.sweep().await;
        assert_eq!(third.cancelled, 1);
        assert_eq!(f.notifier.count(), 2);
        assert!(f.notifier.texts()[1].contains("cancelled"));
        assert_eq!(task.cancel_calls(), 1);
        assert!(f.monitor.warning(task.id()).is_none());
        assert_eq!(f.monitor.warned_count(), 0);
    }

    #[tokio::test]
    async fn slow_download_with_distant_completion_is_cancelled_without_warning() {
        let f = fixture();
        let task = FakeTask::download(1);
        task.set_started_at(f.clock.now());
        task.set_speed(Some(10 * KIB));
        task.set_eta(Some(Duration::from_secs(3600)));
        task.set_size(Some(10 * GIB));
        task.set_processed(Some(GIB));
        f.registry.register(task.clone()).await.unwrap();

        assert_eq!(f.monitor.sweep().await.cancelled, 0);
        assert_eq!(f.monitor.sweep().await.cancelled, 0);
        assert_eq!(f.monitor.sweep().await.cancelled, 1);

        assert_eq!(f.notifier.count(), 1);
        assert!(f.notifier.texts()[0].contains("completion too far away"));
        assert_eq!(task.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn one_fast_sample_resets_slowness() {
        let f = fixture();
        let task = FakeTask::download(1);
        task.set_started_at(f.clock.now());
        task.set_eta(Some(Duration::from_secs(3600)));
        task.set_size(Some(10 * GIB));
        f.registry.register(task.clone()).await.unwrap();

        task.set_speed(Some(10 * KIB));
        f.monitor.sweep().await;
        task.set_speed(Some(10 * 1024 * KIB));
        f.monitor.sweep().await;
        task.set_speed(Some(10 * KIB));
        let report = f.monitor.sweep().await;

        assert_eq!(report.cancelled, 0);
        assert_eq!(task.cancel_calls(), 0);
    }

    #[tokio::test]
    async fn task_without_cancel_capability_gets_flagged() {
        let f = fixture();
        let task = stalled_task(&f);
        task.set_cancellable(false);
        f.registry.register(task.clone()).await.unwrap();

        f.monitor.sweep().await;
        f.clock.advance(ChronoDuration::minutes(11));
        f.monitor.sweep().await;

        assert!(f.registry.is_cancel_requested(task.id()).await);

        // Flagged tasks are not swept again while the engine winds down.
        f.clock.advance(ChronoDuration::hours(1));
        assert_eq!(f.monitor.sweep().await.checked, 0);
        assert_eq!(f.notifier.count(), 2);
    }

    #[tokio::test]
    async fn accepted_cancel_is_not_repeated_while_engine_winds_down() {
        let f = fixture();
        let task = stalled_task(&f);
        f.registry.register(task.clone()).await.unwrap();

        f.monitor.sweep().await;
        f.clock.advance(ChronoDuration::minutes(11));
        assert_eq!(f.monitor.sweep().await.cancelled, 1);
        assert!(f.registry.is_cancel_requested(task.id()).await);

        // Still registered: the engine removes it on its own schedule.
        for _ in 0..3 {
            f.clock.advance(ChronoDuration::minutes(11));
            assert_eq!(f.monitor.sweep().await, HealthReport::default());
        }
        assert!(f.registry.contains(task.id()).await);
        assert_eq!(f.notifier.count(), 2);
        assert_eq!(task.cancel_calls(), 1);
        assert_eq!(f.monitor.warned_count(), 0);
    }

    #[tokio::test]
    async fn only_running_downloads_are_checked() {
        let f = fixture();
        let upload = FakeTask::upload(1);
        upload.set_started_at(f.clock.now() - ChronoDuration::hours(2));
        f.registry.register(upload.clone()).await.unwrap();

        let queued = stalled_task(&f);
        f.registry.register(queued.clone()).await.unwrap();
        f.registry.displace(queued.id(), crate::queue::Pressure::Cpu).await;

        let report = f.monitor.sweep().await;
        assert_eq!(report.checked, 0);
        assert_eq!(f.notifier.count(), 0);
    }

    #[tokio::test]
    async fn state_of_unregistered_tasks_is_pruned() {
        let f = fixture();
        let task = stalled_task(&f);
        f.registry.register(task.clone()).await.unwrap();
        f.monitor.sweep().await;
        assert_eq!(f.monitor.warned_count(), 1);

        f.registry.unregister(task.id()).await;
        f.monitor.sweep().await;

        assert_eq!(f.monitor.warned_count(), 0);
        assert!(f.monitor.lock().windows.is_empty());
    }

    #[tokio::test]
    async fn warning_survives_recovery_until_unregistered() {
        let f = fixture();
        let task = stalled_task(&f);
        f.registry.register(task.clone()).await.unwrap();
        f.monitor.sweep().await;

        task.set_speed(Some(GIB));
        task.set_eta(Some(Duration::from_secs(60)));
        f.clock.advance(ChronoDuration::minutes(20));
        let report = f.monitor.sweep().await;

        assert_eq!(report.cancelled, 0);
        assert!(f.monitor.warning(task.id()).is_some());
    }
}
